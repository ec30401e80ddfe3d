//! Inbound webhook signature verification.
//!
//! Channel adapters sign the raw request body with HMAC-SHA256 over a shared
//! secret and send it as `X-Signature-256: sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-signature-256";

const PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,
}

/// Check `header` against the HMAC-SHA256 of `body`.
///
/// The `sha256=` prefix is optional. Comparison is constant-time.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty()).ok_or(SignatureError::Missing)?;
    let hex_sig = header.strip_prefix(PREFIX).unwrap_or(header);
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;

    mac_for(secret, body)
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// `sha256=<hex>` signature of `body`, as an adapter would send it.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    format!("{PREFIX}{}", hex::encode(mac_for(secret, body).finalize().into_bytes()))
}

fn mac_for(secret: &[u8], body: &[u8]) -> HmacSha256 {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(body);
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 4231, test case 2.
    const KEY: &[u8] = b"Jefe";
    const DATA: &[u8] = b"what do ya want for nothing?";
    const MAC_HEX: &str = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";

    #[test]
    fn rfc4231_vector_verifies_with_and_without_prefix() {
        assert_eq!(sign(KEY, DATA), format!("sha256={MAC_HEX}"));
        assert_eq!(verify_signature(KEY, DATA, Some(&format!("sha256={MAC_HEX}"))), Ok(()));
        assert_eq!(verify_signature(KEY, DATA, Some(MAC_HEX)), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let sig = sign(KEY, DATA);
        assert_eq!(
            verify_signature(KEY, b"what do ya want for something?", Some(&sig)),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(verify_signature(b"other", DATA, Some(&sig)), Err(SignatureError::Mismatch));
    }

    #[test]
    fn missing_or_garbled_header_is_rejected() {
        assert_eq!(verify_signature(KEY, DATA, None), Err(SignatureError::Missing));
        assert_eq!(verify_signature(KEY, DATA, Some("  ")), Err(SignatureError::Missing));
        assert_eq!(
            verify_signature(KEY, DATA, Some("sha256=not-hex")),
            Err(SignatureError::Malformed)
        );
    }
}
