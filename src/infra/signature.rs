//! HMAC-SHA256 webhook signatures (`x-webhook-signature: sha256=<hex>`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
const SCHEME: &str = "sha256=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must start with `sha256=`")]
    Scheme,
    #[error("signature is not valid hex")]
    Encoding,
    #[error("signature does not match body")]
    Mismatch,
    #[error("signing key rejected")]
    Key,
}

/// Header value for `body` signed with `secret`.
pub fn sign_body(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{SCHEME}{}", hex::encode(digest)))
}

/// Check a `sha256=<hex>` header value against `body`. Comparison is
/// constant time.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let digest = header
        .trim()
        .strip_prefix(SCHEME)
        .ok_or(SignatureError::Scheme)?;
    let expected = hex::decode(digest).map_err(|_| SignatureError::Encoding)?;
    mac(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

fn mac(secret: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Key)?;
    mac.update(body);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shared-secret";

    #[test]
    fn signature_verifies_exact_body() {
        let body = br#"{"tags":["a","b"]}"#;
        let header = sign_body(SECRET, body).expect("sign");

        assert!(header.starts_with("sha256="));
        assert_eq!(header.len(), "sha256=".len() + 64);
        assert!(verify_signature(SECRET, body, &header).is_ok());
    }

    #[test]
    fn changing_any_byte_breaks_signature() {
        let body = br#"{"tags":["a","b"]}"#.to_vec();
        let header = sign_body(SECRET, &body).expect("sign");

        for index in 0..body.len() {
            let mut tampered = body.clone();
            tampered[index] ^= 0x01;
            assert_eq!(
                verify_signature(SECRET, &tampered, &header),
                Err(SignatureError::Mismatch),
                "byte {index} changed"
            );
        }
    }

    #[test]
    fn wrong_secret_is_a_mismatch() {
        let body = br#"{"tags":["rooms"]}"#;
        let header = sign_body(SECRET, body).expect("sign");
        assert_eq!(
            verify_signature("other", body, &header),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let body = br#"{"tags":[]}"#;
        let digest = sign_body(SECRET, body).expect("sign");
        let bare = digest.trim_start_matches("sha256=");

        assert_eq!(
            verify_signature(SECRET, body, bare),
            Err(SignatureError::Scheme)
        );
        assert_eq!(
            verify_signature(SECRET, body, "sha256=zz"),
            Err(SignatureError::Encoding)
        );
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let header = sign_body("Jefe", b"what do ya want for nothing?").expect("sign");
        assert_eq!(
            header,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
