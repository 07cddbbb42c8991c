//! Base64 and UTF-8 helpers for payloads crossing a textual boundary.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use thiserror::Error;

/// Encode raw bytes as standard padded base64.
pub fn encode_base64(bytes: impl AsRef<[u8]>) -> String {
    BASE64_ENGINE.encode(bytes)
}

/// Decode standard padded base64 into raw bytes.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, EncodingError> {
    Ok(BASE64_ENGINE.decode(text.trim())?)
}

/// Decode base64 and interpret the bytes as UTF-8 text.
pub fn decode_base64_text(text: &str) -> Result<String, EncodingError> {
    let bytes = decode_base64(text)?;
    Ok(String::from_utf8(bytes)?)
}

/// Errors produced by the payload helpers.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_survives_encode_decode() {
        for text in ["", "plain ascii", "user:p@ss:word", "ünïcødé ✓ 漢字", "line\nbreaks\ttabs"] {
            let encoded = encode_base64(text);
            assert_eq!(decode_base64_text(&encoded).expect("round trip"), text);
        }
    }

    #[test]
    fn encodes_known_vector() {
        assert_eq!(encode_base64("user:secret"), "dXNlcjpzZWNyZXQ=");
        assert_eq!(decode_base64(" dXNlcjpzZWNyZXQ=\n").expect("trimmed input"), b"user:secret");
    }

    #[test]
    fn rejects_invalid_base64() {
        let error = decode_base64("not base64!").expect_err("invalid alphabet");
        assert!(matches!(error, EncodingError::Base64(_)));
    }

    #[test]
    fn rejects_non_utf8_bytes() {
        let encoded = encode_base64([0xff, 0xfe, 0x00]);
        assert!(decode_base64(&encoded).is_ok());
        let error = decode_base64_text(&encoded).expect_err("invalid utf-8");
        assert!(matches!(error, EncodingError::Utf8(_)));
    }
}
