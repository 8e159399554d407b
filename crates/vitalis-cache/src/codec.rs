//! Versioned envelope codec for cached values.
//!
//! Every value stored in the cache is wrapped in a [`CacheEnvelope`] before
//! serialization so a stale or truncated payload can be recognized and
//! discarded instead of being handed to a caller. Payloads whose JSON form
//! exceeds [`COMPRESSION_THRESHOLD`] are gzip-compressed; the gzip magic
//! bytes double as the compression tag, so `decode` needs no side channel.
//!
//! Malformed data never produces an error across this boundary: `decode`
//! returns [`Decoded::Corrupt`] and the caller deletes the key.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::error::{CacheError, Result};

/// Envelope format version written into every entry.
pub const ENVELOPE_VERSION: &str = "1";

/// Payloads larger than this (bytes of serialized JSON) are gzip-compressed.
pub const COMPRESSION_THRESHOLD: usize = 10 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Wrapper stored around every cached value.
///
/// `data` and `cached_at` are mandatory; a payload missing either fails
/// structural validation and is treated as corrupt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheEnvelope<T> {
    pub data: T,
    /// Unix timestamp (seconds) at which the value was cached.
    pub cached_at: i64,
    pub version: String,
}

impl<T> CacheEnvelope<T> {
    /// Wrap a value in a fresh envelope stamped with the current time.
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: OffsetDateTime::now_utc().unix_timestamp(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }
}

/// An encoded cache payload, ready for the store client.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// Outcome of decoding a raw cache payload.
#[derive(Debug)]
pub enum Decoded<T> {
    /// A structurally valid envelope.
    Value(CacheEnvelope<T>),
    /// The payload failed validation; the caller should delete the key.
    Corrupt,
}

/// Serialize a value into an envelope, compressing oversized payloads.
pub fn encode<T: Serialize>(value: &T) -> Result<EncodedPayload> {
    let envelope = CacheEnvelope::new(value);
    let json = serde_json::to_vec(&envelope)?;

    if json.len() <= COMPRESSION_THRESHOLD {
        return Ok(EncodedPayload {
            bytes: json,
            compressed: false,
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CacheError::compression(e.to_string()))?;
    let bytes = encoder
        .finish()
        .map_err(|e| CacheError::compression(e.to_string()))?;

    Ok(EncodedPayload {
        bytes,
        compressed: true,
    })
}

/// Decode a raw payload back into an envelope.
///
/// Reverses compression when the gzip tag is present, then parses and
/// validates the envelope. Any failure along the way reports
/// [`Decoded::Corrupt`] rather than an error.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Decoded<T> {
    let json: Vec<u8> = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        match decoder.read_to_end(&mut out) {
            Ok(_) => out,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decompress cache payload");
                return Decoded::Corrupt;
            }
        }
    } else {
        bytes.to_vec()
    };

    match serde_json::from_slice::<CacheEnvelope<T>>(&json) {
        Ok(envelope) => Decoded::Value(envelope),
        Err(e) => {
            tracing::debug!(error = %e, "cache payload failed envelope validation");
            Decoded::Corrupt
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        id: String,
        score: u32,
    }

    #[test]
    fn test_round_trip_small_payload() {
        let value = Sample {
            id: "patient-1".into(),
            score: 42,
        };

        let encoded = encode(&value).expect("encode failed");
        assert!(!encoded.compressed);

        match decode::<Sample>(&encoded.bytes) {
            Decoded::Value(envelope) => {
                assert_eq!(envelope.data, value);
                assert_eq!(envelope.version, ENVELOPE_VERSION);
                assert!(envelope.cached_at > 0);
            }
            Decoded::Corrupt => panic!("valid payload reported corrupt"),
        }
    }

    #[test]
    fn test_round_trip_compressed_payload() {
        // Repetitive content well past the threshold compresses small.
        let value = Sample {
            id: "x".repeat(20 * 1024),
            score: 7,
        };

        let encoded = encode(&value).expect("encode failed");
        assert!(encoded.compressed);
        assert!(encoded.bytes.starts_with(&GZIP_MAGIC));
        assert!(encoded.bytes.len() < 20 * 1024);

        match decode::<Sample>(&encoded.bytes) {
            Decoded::Value(envelope) => assert_eq!(envelope.data, value),
            Decoded::Corrupt => panic!("compressed payload reported corrupt"),
        }
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            decode::<Sample>(b"not json at all"),
            Decoded::Corrupt
        ));
    }

    #[test]
    fn test_missing_envelope_fields_is_corrupt() {
        // Valid JSON, but no cached_at.
        let raw = br#"{"data":{"id":"a","score":1},"version":"1"}"#;
        assert!(matches!(decode::<Sample>(raw), Decoded::Corrupt));

        // Valid JSON, but no data.
        let raw = br#"{"cached_at":1700000000,"version":"1"}"#;
        assert!(matches!(decode::<Sample>(raw), Decoded::Corrupt));
    }

    #[test]
    fn test_truncated_gzip_is_corrupt() {
        let value = Sample {
            id: "y".repeat(20 * 1024),
            score: 1,
        };
        let encoded = encode(&value).expect("encode failed");
        let truncated = &encoded.bytes[..encoded.bytes.len() / 2];
        assert!(matches!(decode::<Sample>(truncated), Decoded::Corrupt));
    }
}
