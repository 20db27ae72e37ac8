//! Base64 encoding of embedded sample and wavetable data.
//!
//! Standard alphabet with `=` padding, matching what tracker configuration
//! files store.

use crate::{ChipError, Result};
use ::base64::{engine::general_purpose, Engine as _};

/// Encode bytes as padded standard base64.
pub fn encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

/// Decode padded standard base64.
///
/// Surrounding whitespace is ignored; any other invalid input is a
/// [`ChipError::Decode`].
pub fn decode(text: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| ChipError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "Zg==");
        assert_eq!(encode(b"fo"), "Zm8=");
        assert_eq!(encode(b"foo"), "Zm9v");
        assert_eq!(encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_roundtrip_padding_lengths() {
        for len in 0..8usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 37 + 200) as u8).collect();
            let text = encode(&data);
            assert_eq!(text.len() % 4, 0);
            assert_eq!(decode(&text).unwrap(), data, "length {len}");
        }
    }

    #[test]
    fn test_roundtrip_all_byte_values() {
        let data: Vec<u8> = (0..=255u8).rev().collect();
        assert_eq!(decode(&encode(&data)).unwrap(), data);
    }

    #[test]
    fn test_decode_trims_and_rejects_garbage() {
        assert_eq!(decode("  Zm9v\n").unwrap(), b"foo");
        assert!(matches!(decode("Zm9v!"), Err(ChipError::Decode(_))));
        assert!(decode("Zg=").is_err());
    }
}
