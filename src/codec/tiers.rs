//! Encode and decode strategies, tried in order.

use super::{CodecError, Tier};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::write::EncoderStringWriter;
use base64::Engine as _;
use serde_json::Value as Json;
use std::io::Write;

/// Base64 decoder that accepts missing padding, like the browser's `atob`.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// One way of turning JSON text into an unescaped token.
pub(super) struct EncodeStrategy {
    pub tier: Tier,
    pub needs_compression: bool,
    pub attempt: fn(&str, usize) -> Result<String, CodecError>,
}

/// One way of reading a percent-decoded token back into JSON.
pub(super) struct DecodeStrategy {
    pub tier: Tier,
    pub needs_compression: bool,
    pub attempt: fn(&str) -> Result<Json, CodecError>,
}

pub(super) const ENCODERS: &[EncodeStrategy] = &[
    EncodeStrategy {
        tier: Tier::Deflate,
        needs_compression: true,
        attempt: encode_deflate,
    },
    EncodeStrategy {
        tier: Tier::Base64,
        needs_compression: false,
        attempt: encode_base64,
    },
    EncodeStrategy {
        tier: Tier::Plain,
        needs_compression: false,
        attempt: encode_plain,
    },
];

pub(super) const DECODERS: &[DecodeStrategy] = &[
    DecodeStrategy {
        tier: Tier::Plain,
        needs_compression: false,
        attempt: decode_plain,
    },
    DecodeStrategy {
        tier: Tier::Deflate,
        needs_compression: true,
        attempt: decode_deflate,
    },
    DecodeStrategy {
        tier: Tier::Base64,
        needs_compression: false,
        attempt: decode_base64,
    },
];

fn encode_deflate(json: &str, chunk_bytes: usize) -> Result<String, CodecError> {
    let compressed = deflate(json.as_bytes())?;
    base64_chunked(&compressed, chunk_bytes)
}

fn encode_base64(json: &str, chunk_bytes: usize) -> Result<String, CodecError> {
    base64_chunked(json.as_bytes(), chunk_bytes)
}

fn encode_plain(json: &str, _chunk_bytes: usize) -> Result<String, CodecError> {
    Ok(json.to_string())
}

fn decode_plain(text: &str) -> Result<Json, CodecError> {
    parse_payload(text)
}

fn decode_deflate(text: &str) -> Result<Json, CodecError> {
    let bytes = inflate(&base64_lenient(text)?)?;
    let text = String::from_utf8(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
    parse_payload(&text)
}

fn decode_base64(text: &str) -> Result<Json, CodecError> {
    let bytes = base64_lenient(text)?;
    parse_payload(&bytes_to_text(bytes))
}

/// Base64 of `bytes`, fed to the encoder at most `chunk_bytes` at a time.
fn base64_chunked(bytes: &[u8], chunk_bytes: usize) -> Result<String, CodecError> {
    let mut writer = EncoderStringWriter::new(&STANDARD);
    for chunk in bytes.chunks(chunk_bytes.max(1)) {
        writer
            .write_all(chunk)
            .map_err(|e| CodecError::EncodeFailed(e.to_string()))?;
    }
    Ok(writer.into_inner())
}

/// Decodes base64 the way `atob` does after a trip through a query string:
/// spaces are `+` signs and other whitespace is ignored.
fn base64_lenient(text: &str) -> Result<Vec<u8>, CodecError> {
    let cleaned: String = text
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('+'),
            c if c.is_ascii_whitespace() => None,
            c => Some(c),
        })
        .collect();
    if cleaned.is_empty() {
        return Err(CodecError::Malformed("empty base64 payload".to_string()));
    }
    LENIENT
        .decode(cleaned)
        .map_err(|e| CodecError::Malformed(e.to_string()))
}

/// UTF-8 text, or Latin-1 when the bytes are not valid UTF-8.
fn bytes_to_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

/// A share payload is a record list or a single record.
fn parse_payload(text: &str) -> Result<Json, CodecError> {
    let value: Json =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    match value {
        Json::Array(_) | Json::Object(_) => Ok(value),
        other => Err(CodecError::Malformed(format!(
            "expected a list of properties, found {}",
            other
        ))),
    }
}

#[cfg(feature = "deflate")]
fn deflate(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| CodecError::EncodeFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::EncodeFailed(e.to_string()))
}

#[cfg(feature = "deflate")]
fn inflate(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    let mut out = Vec::new();
    ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Malformed(e.to_string()))?;
    Ok(out)
}

#[cfg(not(feature = "deflate"))]
fn deflate(_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CompressionUnavailable)
}

#[cfg(not(feature = "deflate"))]
fn inflate(_bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CompressionUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunked_base64_matches_single_pass() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        assert_eq!(base64_chunked(&bytes, 7).unwrap(), STANDARD.encode(&bytes));
        assert_eq!(base64_chunked(&bytes, 32_767).unwrap(), STANDARD.encode(&bytes));
        assert_eq!(base64_chunked(&bytes, 0).unwrap(), STANDARD.encode(&bytes));
    }

    #[test]
    fn test_lenient_base64_accepts_spaces_and_missing_padding() {
        // "[1]" is "WzFd"; "[{}]" is "W3t9XQ==".
        assert_eq!(base64_lenient("WzFd").unwrap(), b"[1]");
        assert_eq!(base64_lenient("W3t9XQ").unwrap(), b"[{}]");
        let plus = STANDARD.encode([0xfb, 0xef]);
        assert!(plus.contains('+'));
        assert_eq!(base64_lenient(&plus.replace('+', " ")).unwrap(), vec![0xfb, 0xef]);
        assert!(base64_lenient("").is_err());
    }

    #[test]
    fn test_latin1_fallback() {
        assert_eq!(bytes_to_text(vec![b'"', 0xe9, b'"']), "\"é\"");
        assert_eq!(bytes_to_text("ção".as_bytes().to_vec()), "ção");
    }

    #[test]
    fn test_payload_must_be_list_or_object() {
        assert!(parse_payload("[]").is_ok());
        assert!(parse_payload("{\"id\":1}").is_ok());
        assert!(parse_payload("42").is_err());
        assert!(parse_payload("\"x\"").is_err());
    }
}
