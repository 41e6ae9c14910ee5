//! Share token codec.
//!
//! A token is the serialized property list, compressed when possible,
//! then percent-encoded so it can sit in a query string:
//!
//! ```text
//! Deflate  percent(base64(zlib(json)))
//! Base64   percent(base64(json))
//! Plain    percent(json)
//! ```
//!
//! Encoding uses the first tier the build supports. Decoding never trusts
//! a tier marker; it tries every tier in a fixed order until one yields a
//! JSON list or object, so links produced by any tier keep working.

mod tiers;

use crate::capabilities::Capabilities;
use crate::settings::WorkbenchSettings;
use serde_json::Value as Json;
use std::fmt;
use tiers::{DECODERS, ENCODERS};

/// Representation a token was produced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Deflate,
    Base64,
    Plain,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deflate => "deflate",
            Self::Base64 => "base64",
            Self::Plain => "plain",
        })
    }
}

/// Codec failures. The `Display` text is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error(
        "Too much data to share in a link ({chars} characters, limit {limit}). \
         Remove some properties or use the JSON export instead."
    )]
    PayloadTooLarge { chars: usize, limit: usize },
    #[error("compression is not available in this build")]
    CompressionUnavailable,
    #[error("could not encode share data: {0}")]
    EncodeFailed(String),
    #[error("malformed share data: {0}")]
    Malformed(String),
    #[error("The shared link data could not be read. The link may be incomplete or corrupted.")]
    Undecodable,
}

/// A percent-encoded token and the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedToken {
    pub token: String,
    pub tier: Tier,
}

/// JSON recovered from a token and the tier that read it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub value: Json,
    pub tier: Tier,
}

/// Encodes and decodes share tokens.
#[derive(Debug, Clone)]
pub struct ShareCodec {
    compression: bool,
    max_payload_chars: usize,
    chunk_bytes: usize,
}

impl ShareCodec {
    pub fn new(capabilities: &Capabilities, settings: &WorkbenchSettings) -> Self {
        Self {
            compression: capabilities.compression,
            max_payload_chars: settings.max_payload_chars,
            chunk_bytes: settings.base64_chunk_bytes,
        }
    }

    pub fn max_payload_chars(&self) -> usize {
        self.max_payload_chars
    }

    /// Rejects payloads over the character limit.
    pub fn check_size(&self, json: &str) -> Result<(), CodecError> {
        let chars = json.chars().count();
        if chars > self.max_payload_chars {
            return Err(CodecError::PayloadTooLarge {
                chars,
                limit: self.max_payload_chars,
            });
        }
        Ok(())
    }

    /// Encodes JSON text with the best available tier.
    pub fn encode(&self, json: &str) -> Result<EncodedToken, CodecError> {
        self.check_size(json)?;
        let mut last_error = CodecError::EncodeFailed("no encoding tier available".to_string());
        for strategy in ENCODERS {
            if strategy.needs_compression && !self.compression {
                continue;
            }
            match (strategy.attempt)(json, self.chunk_bytes) {
                Ok(raw) => {
                    let token = urlencoding::encode(&raw).into_owned();
                    log::debug!(
                        "Encoded {} chars of share data as {} ({} chars)",
                        json.len(),
                        strategy.tier,
                        token.len()
                    );
                    return Ok(EncodedToken {
                        token,
                        tier: strategy.tier,
                    });
                }
                Err(e) => {
                    log::warn!("Share encoding tier {} failed: {}", strategy.tier, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Encodes with one specific tier.
    pub fn encode_as(&self, json: &str, tier: Tier) -> Result<EncodedToken, CodecError> {
        self.check_size(json)?;
        let strategy = ENCODERS
            .iter()
            .find(|s| s.tier == tier)
            .ok_or_else(|| CodecError::EncodeFailed(format!("unknown tier {}", tier)))?;
        if strategy.needs_compression && !self.compression {
            return Err(CodecError::CompressionUnavailable);
        }
        let raw = (strategy.attempt)(json, self.chunk_bytes)?;
        Ok(EncodedToken {
            token: urlencoding::encode(&raw).into_owned(),
            tier,
        })
    }

    /// Decodes a token produced by any tier.
    pub fn decode(&self, token: &str) -> Result<Decoded, CodecError> {
        let text = match urlencoding::decode(token) {
            Ok(text) => text.into_owned(),
            Err(e) => {
                log::debug!("Share token is not percent-decodable ({}), using it as is", e);
                token.to_string()
            }
        };
        for strategy in DECODERS {
            if strategy.needs_compression && !self.compression {
                continue;
            }
            match (strategy.attempt)(&text) {
                Ok(value) => {
                    log::debug!("Decoded share data with the {} tier", strategy.tier);
                    return Ok(Decoded {
                        value,
                        tier: strategy.tier,
                    });
                }
                Err(e) => log::debug!("Share decoding tier {} failed: {}", strategy.tier, e),
            }
        }
        log::error!("Share data could not be decoded by any tier");
        Err(CodecError::Undecodable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> ShareCodec {
        ShareCodec::new(&Capabilities::default(), &WorkbenchSettings::default())
    }

    fn sample() -> Json {
        json!([{
            "id": "a1", "nome": "Fazenda São José", "area": "12.34", "tipo": "kml",
            "matricula": "123", "car": "", "itr": "", "ccir": "",
            "geometria": {"type": "Polygon", "coordinates": [[[-47.0, -15.0], [-47.1, -15.0], [-47.1, -15.1], [-47.0, -15.0]]]}
        }])
    }

    #[test]
    fn test_round_trip_every_tier() {
        let codec = codec();
        let json = sample().to_string();
        for tier in [Tier::Deflate, Tier::Base64, Tier::Plain] {
            if tier == Tier::Deflate && !cfg!(feature = "deflate") {
                continue;
            }
            let encoded = codec.encode_as(&json, tier).unwrap();
            let decoded = codec.decode(&encoded.token).unwrap();
            assert_eq!(decoded.value, sample(), "tier {}", tier);
            assert_eq!(decoded.tier, tier);
        }
    }

    #[test]
    fn test_preferred_tier_follows_capabilities() {
        let json = sample().to_string();
        let caps = Capabilities::default().without_compression();
        let plain_codec = ShareCodec::new(&caps, &WorkbenchSettings::default());
        assert_eq!(plain_codec.encode(&json).unwrap().tier, Tier::Base64);
        if cfg!(feature = "deflate") {
            assert_eq!(codec().encode(&json).unwrap().tier, Tier::Deflate);
        }
    }

    #[test]
    fn test_lower_tier_tokens_decode_with_compression_enabled() {
        let codec = codec();
        let json = sample().to_string();
        let base64 = codec.encode_as(&json, Tier::Base64).unwrap();
        assert_eq!(codec.decode(&base64.token).unwrap().value, sample());
        let plain = codec.encode_as(&json, Tier::Plain).unwrap();
        assert_eq!(codec.decode(&plain.token).unwrap().value, sample());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let codec = codec();
        let json = sample().to_string();
        assert_eq!(codec.encode(&json).unwrap(), codec.encode(&json).unwrap());
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let codec = codec();
        let filler = "x".repeat(50_001 - 4);
        let json = format!("[\"{}\"]", filler);
        assert_eq!(json.chars().count(), 50_001);
        assert_eq!(
            codec.encode(&json),
            Err(CodecError::PayloadTooLarge {
                chars: 50_001,
                limit: 50_000
            })
        );
        let at_limit = format!("[\"{}\"]", "x".repeat(50_000 - 4));
        assert!(codec.encode(&at_limit).is_ok());
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        let codec = codec();
        let json = format!("[\"{}\"]", "ç".repeat(30_000));
        assert!(json.len() > 50_000);
        assert!(codec.encode(&json).is_ok());
    }

    #[test]
    fn test_garbage_is_undecodable() {
        let codec = codec();
        assert_eq!(codec.decode("%%%not-a-token"), Err(CodecError::Undecodable));
        assert_eq!(codec.decode(""), Err(CodecError::Undecodable));
        // Valid base64 of a bare number is not a payload.
        assert_eq!(codec.decode("NDI%3D"), Err(CodecError::Undecodable));
    }

    #[test]
    fn test_latin1_base64_payload_decodes() {
        use base64::Engine as _;
        let raw = [b"[{\"nome\":\"S".as_slice(), &[0xed], b"tio\"}]"].concat();
        let token = urlencoding::encode(&base64::engine::general_purpose::STANDARD.encode(raw))
            .into_owned();
        let decoded = codec().decode(&token).unwrap();
        assert_eq!(decoded.value, json!([{"nome": "Sítio"}]));
        assert_eq!(decoded.tier, Tier::Base64);
    }
}
