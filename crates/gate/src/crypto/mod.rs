//! Cipher primitives, the cipher lifecycle provider, and the transport codec.
//!
//! This module is free of authenticator and stream concerns.
//!
//! # Transport format
//!
//! ```text
//! <base64url-no-pad(ciphertext+tag)>.<base64url-no-pad(iv)>
//! ```

pub mod cipher;
pub mod codec;
pub mod provider;

pub use cipher::{KEY_LEN, NONCE_LEN};
pub use codec::CryptoData;
pub use provider::{CipherLifecycleProvider, CipherOutput, PreparedCipher};
