//! Transport encoding of cipher output: `<base64url(data)>.<base64url(iv)>`.
//!
//! `.` is outside the base64url alphabet, so the separator count alone
//! decides whether a string is structurally valid.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use common::GateError;

/// Character separating the data field from the IV field.
pub const SEPARATOR: char = '.';

/// Cipher output (or input) paired with its initialisation vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoData {
    /// Ciphertext when produced by encryption; ciphertext to open when decoded.
    pub data: Vec<u8>,
    /// Initialisation vector bytes.
    pub iv: Vec<u8>,
}

/// Encode `data` and `iv` into a single transport string. Never fails.
pub fn encode(data: &[u8], iv: &[u8]) -> String {
    format!(
        "{}{}{}",
        URL_SAFE_NO_PAD.encode(data),
        SEPARATOR,
        URL_SAFE_NO_PAD.encode(iv),
    )
}

/// Decode a transport string back into [`CryptoData`].
///
/// # Errors
///
/// Returns [`GateError::MalformedTransportString`] if the separator does not
/// occur exactly once or either field is not canonical unpadded base64url.
pub fn decode(s: &str) -> Result<CryptoData, GateError> {
    let (data, iv) = split(s)?;
    let data = URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|e| GateError::MalformedTransportString(format!("data field: {e}")))?;
    let iv = URL_SAFE_NO_PAD
        .decode(iv)
        .map_err(|e| GateError::MalformedTransportString(format!("iv field: {e}")))?;
    Ok(CryptoData { data, iv })
}

/// Structural check applied to freshly encoded output before it is emitted.
///
/// Stricter than [`decode`]: both fields must also be non-empty.
///
/// # Errors
///
/// Returns [`GateError::MalformedTransportString`] on any violation.
pub fn verify(s: &str) -> Result<(), GateError> {
    let decoded = decode(s)?;
    if decoded.data.is_empty() {
        return Err(GateError::MalformedTransportString("empty data field".into()));
    }
    if decoded.iv.is_empty() {
        return Err(GateError::MalformedTransportString("empty iv field".into()));
    }
    Ok(())
}

fn split(s: &str) -> Result<(&str, &str), GateError> {
    let mut parts = s.split(SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(data), Some(iv), None) => Ok((data, iv)),
        (_, None, _) => Err(GateError::MalformedTransportString(
            "missing separator".into(),
        )),
        _ => Err(GateError::MalformedTransportString(
            "separator occurs more than once".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    fn assert_malformed(s: &str) {
        match decode(s) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::MalformedTransportString, "{s}"),
            Ok(d) => panic!("expected {s:?} to be rejected, decoded {d:?}"),
        }
    }

    #[test]
    fn round_trip() {
        let data = vec![0xFB, 0xFF, 0x00, 0x10, 0x3E];
        let iv = vec![7u8; 12];
        let s = encode(&data, &iv);
        assert_eq!(decode(&s).unwrap(), CryptoData { data, iv });
    }

    #[test]
    fn round_trip_empty_fields() {
        let s = encode(&[], &[]);
        assert_eq!(s, ".");
        let decoded = decode(&s).unwrap();
        assert!(decoded.data.is_empty());
        assert!(decoded.iv.is_empty());
    }

    #[test]
    fn encoding_uses_url_safe_alphabet() {
        let s = encode(&[0xFB, 0xFF], &[0xFE]);
        assert!(!s.contains('+') && !s.contains('/') && !s.contains('='));
        assert_eq!(s.matches(SEPARATOR).count(), 1);
    }

    #[test]
    fn rejects_missing_separator() {
        assert_malformed("YWJjZGVm");
        assert_malformed("");
    }

    #[test]
    fn rejects_extra_separator() {
        assert_malformed("YWJj.ZGVm.Z2hp");
        assert_malformed("..");
    }

    #[test]
    fn rejects_bad_alphabet() {
        assert_malformed("YW+j.ZGVm");
        assert_malformed("YWJj.ZG/m");
        assert_malformed("!!!.ZGVm");
        assert_malformed("YWJj.ZGVm==");
    }

    #[test]
    fn verify_accepts_encoded_output() {
        assert!(verify(&encode(b"cipher", &[1u8; 12])).is_ok());
    }

    #[test]
    fn verify_rejects_empty_fields() {
        assert!(verify(&encode(b"cipher", &[])).is_err());
        assert!(verify(&encode(&[], &[1u8; 12])).is_err());
        assert!(verify("not a transport string").is_err());
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_inverts_encode(
                data in proptest::collection::vec(any::<u8>(), 0..256),
                iv in proptest::collection::vec(any::<u8>(), 0..32),
            ) {
                let decoded = decode(&encode(&data, &iv)).unwrap();
                prop_assert_eq!(decoded, CryptoData { data, iv });
            }

            #[test]
            fn separator_count_other_than_one_is_malformed(
                parts in proptest::collection::vec("[A-Za-z0-9_-]{0,16}", 1..6)
                    .prop_filter("exactly one separator", |p| p.len() != 2),
            ) {
                let s = parts.join(".");
                let err = decode(&s).unwrap_err();
                prop_assert_eq!(err.kind(), ErrorKind::MalformedTransportString);
            }

            #[test]
            fn arbitrary_text_without_one_separator_is_malformed(
                s in any::<String>().prop_filter("exactly one separator", |s| {
                    s.matches(SEPARATOR).count() != 1
                }),
            ) {
                let err = decode(&s).unwrap_err();
                prop_assert_eq!(err.kind(), ErrorKind::MalformedTransportString);
            }
        }
    }
}
