//! Payload encoding for cached values
//!
//! Values are serialized to JSON; payloads at or above the configured
//! threshold are compressed with the selected algorithm. Decoding always
//! reconstructs the original value exactly.

use crate::error::{RegistryError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Read, Write};

/// Compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
    #[default]
    Zstd,
    Lz4,
}

/// Encoded payload as held in memory or a backing store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    /// Algorithm used for `bytes`
    pub compression: CompressionType,
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Length of the uncompressed JSON
    pub raw_len: usize,
}

impl StoredPayload {
    /// Bytes counted against the memory budget
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionType::None
    }
}

/// Serialize and, above `threshold` bytes, compress a value
pub fn encode(value: &Value, algorithm: CompressionType, threshold: usize) -> Result<StoredPayload> {
    let json = serde_json::to_vec(value)?;
    let raw_len = json.len();

    if algorithm == CompressionType::None || raw_len < threshold {
        return Ok(StoredPayload {
            compression: CompressionType::None,
            bytes: json,
            raw_len,
        });
    }

    let bytes = compress(&json, algorithm)?;

    // Incompressible payloads are kept as plain JSON
    if bytes.len() >= raw_len {
        return Ok(StoredPayload {
            compression: CompressionType::None,
            bytes: json,
            raw_len,
        });
    }

    Ok(StoredPayload {
        compression: algorithm,
        bytes,
        raw_len,
    })
}

/// Reconstruct the original value
pub fn decode(payload: &StoredPayload) -> Result<Value> {
    let json = decompress(&payload.bytes, payload.compression)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Compress raw bytes
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| RegistryError::cache(format!("Failed to compress: {e}")))?;
            encoder
                .finish()
                .map_err(|e| RegistryError::cache(format!("Failed to finish compression: {e}")))
        }
        CompressionType::Zstd => zstd::encode_all(data, 3)
            .map_err(|e| RegistryError::cache(format!("Failed to compress: {e}"))),
        CompressionType::Lz4 => lz4::block::compress(data, None, true)
            .map_err(|e| RegistryError::cache(format!("Failed to compress: {e}"))),
    }
}

/// Decompress raw bytes
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| RegistryError::cache(format!("Failed to decompress: {e}")))?;
            Ok(decompressed)
        }
        CompressionType::Zstd => zstd::decode_all(data)
            .map_err(|e| RegistryError::cache(format!("Failed to decompress: {e}"))),
        CompressionType::Lz4 => lz4::block::decompress(data, None)
            .map_err(|e| RegistryError::cache(format!("Failed to decompress: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        let results: Vec<Value> = (0..200)
            .map(|i| {
                json!({
                    "k_number": format!("K{:06}", i),
                    "device_name": "Infusion pump, external",
                    "applicant": "Example Medical Inc.",
                    "decision": "SESE",
                    "score": i as f64 / 7.0,
                    "tags": ["class II", null, true],
                })
            })
            .collect();
        json!({ "total": 200, "results": results })
    }

    #[test]
    fn test_every_algorithm_reconstructs_value() {
        let value = sample();

        for algorithm in [
            CompressionType::Gzip,
            CompressionType::Zstd,
            CompressionType::Lz4,
        ] {
            let payload = encode(&value, algorithm, 64).unwrap();
            assert_eq!(payload.compression, algorithm);
            assert!(payload.size_bytes() < payload.raw_len);
            assert_eq!(decode(&payload).unwrap(), value);
        }
    }

    #[test]
    fn test_arbitrary_floats_read_back_bit_exact() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut checked = 0;
        while checked < 20_000 {
            let f = f64::from_bits(rng.gen());
            if !f.is_finite() {
                continue;
            }
            checked += 1;

            let value = json!({ "score": f });
            let payload = encode(&value, CompressionType::None, 0).unwrap();
            let decoded = decode(&payload).unwrap();
            let back = decoded["score"].as_f64().unwrap();
            assert_eq!(back.to_bits(), f.to_bits(), "{f:e} changed to {back:e}");
        }
    }

    #[test]
    fn test_small_payload_stays_plain() {
        let value = json!({"k_number": "K000001"});
        let payload = encode(&value, CompressionType::Zstd, 1024).unwrap();

        assert!(!payload.is_compressed());
        assert_eq!(decode(&payload).unwrap(), value);
    }
}
