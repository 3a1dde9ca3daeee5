//! Payload Transform Module
//!
//! Reversible pipeline applied to values before they reach a backend:
//! size-triggered compression followed by optional obfuscation.
//!
//! On the wire a payload carries textual markers: `compressed:` in front of a
//! deflated body, `encrypted:` in front of an obfuscated one. Obfuscation
//! wraps whatever compression produced, so a value that went through both
//! reads `encrypted:<obfuscated "compressed:<body>">`. Opening a payload
//! strips the obfuscation first and yields an [`Envelope`]; only the envelope
//! can be decompressed, which pins the decode order.
//!
//! Obfuscation is a keyed XOR, not a cipher.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// Marker in front of a deflated payload
pub const COMPRESSED_TAG: &str = "compressed:";

/// Marker in front of an obfuscated payload
pub const ENCRYPTED_TAG: &str = "encrypted:";

// == Encoding ==
/// Which transforms were applied to a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    None,
    Compressed,
    Encrypted,
    Both,
}

impl Encoding {
    fn new(compressed: bool, encrypted: bool) -> Self {
        match (compressed, encrypted) {
            (false, false) => Encoding::None,
            (true, false) => Encoding::Compressed,
            (false, true) => Encoding::Encrypted,
            (true, true) => Encoding::Both,
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(self, Encoding::Compressed | Encoding::Both)
    }

    pub fn is_encrypted(self) -> bool {
        matches!(self, Encoding::Encrypted | Encoding::Both)
    }
}

// == Envelope ==
/// A payload with its obfuscation layer removed.
///
/// `body` is base64 deflate data when compressed, JSON text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub encoding: Encoding,
    pub body: String,
}

impl Envelope {
    /// Recovers the original value.
    pub fn into_value(self) -> StorageResult<Value> {
        let json = if self.encoding.is_compressed() {
            inflate(&self.body)?
        } else {
            self.body
        };
        Ok(serde_json::from_str(&json)?)
    }
}

// == Transformer ==
/// Encodes and decodes payloads for one storage engine.
#[derive(Debug, Clone)]
pub struct Transformer {
    compression_threshold: usize,
    key: Vec<u8>,
}

impl Transformer {
    pub fn new(compression_threshold: usize, key: impl Into<Vec<u8>>) -> Self {
        Self {
            compression_threshold,
            key: key.into(),
        }
    }

    // == Encode ==
    /// Serializes `value` and applies the requested transforms.
    ///
    /// Compression only applies when the serialized value is larger than the
    /// threshold.
    pub fn encode(&self, value: &Value, compress: bool, encrypt: bool) -> StorageResult<String> {
        let json = serde_json::to_string(value)?;

        let mut wire = if compress && json.len() > self.compression_threshold {
            format!("{COMPRESSED_TAG}{}", deflate(&json)?)
        } else {
            json
        };

        if encrypt {
            wire = format!("{ENCRYPTED_TAG}{}", self.obfuscate(wire.as_bytes()));
        }

        Ok(wire)
    }

    // == Open ==
    /// Strips the obfuscation layer, if any, and reads the compression marker.
    pub fn open(&self, wire: &str) -> StorageResult<Envelope> {
        let (encrypted, inner) = match wire.strip_prefix(ENCRYPTED_TAG) {
            Some(body) => (true, self.deobfuscate(body)?),
            None => (false, wire.to_string()),
        };

        let envelope = match inner.strip_prefix(COMPRESSED_TAG) {
            Some(body) => Envelope {
                encoding: Encoding::new(true, encrypted),
                body: body.to_string(),
            },
            None => Envelope {
                encoding: Encoding::new(false, encrypted),
                body: inner,
            },
        };
        Ok(envelope)
    }

    // == Decode ==
    /// Reverses [`encode`](Self::encode).
    pub fn decode(&self, wire: &str) -> StorageResult<Value> {
        self.open(wire)?.into_value()
    }

    /// Like [`decode`](Self::decode), but hands back the raw payload as a
    /// string value when it cannot be decoded.
    pub fn decode_or_raw(&self, wire: &str) -> Value {
        match self.decode(wire) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode payload, returning raw value");
                Value::String(wire.to_string())
            }
        }
    }

    fn obfuscate(&self, bytes: &[u8]) -> String {
        STANDARD.encode(self.xor(bytes))
    }

    fn deobfuscate(&self, body: &str) -> StorageResult<String> {
        let bytes = STANDARD
            .decode(body)
            .map_err(|e| StorageError::Transform(format!("invalid obfuscated payload: {e}")))?;
        String::from_utf8(self.xor(&bytes))
            .map_err(|e| StorageError::Transform(format!("obfuscated payload is not UTF-8: {e}")))
    }

    fn xor(&self, bytes: &[u8]) -> Vec<u8> {
        if self.key.is_empty() {
            return bytes.to_vec();
        }
        bytes
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

fn deflate(json: &str) -> StorageResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(json.as_bytes())?;
    Ok(STANDARD.encode(encoder.finish()?))
}

fn inflate(body: &str) -> StorageResult<String> {
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| StorageError::Transform(format!("invalid compressed payload: {e}")))?;
    let mut json = String::new();
    DeflateDecoder::new(bytes.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| StorageError::Transform(format!("corrupt compressed payload: {e}")))?;
    Ok(json)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transformer() -> Transformer {
        Transformer::new(1024, "secret")
    }

    fn large_value() -> Value {
        json!({ "text": "lorem ipsum ".repeat(200) })
    }

    #[test]
    fn test_small_value_not_compressed() {
        let wire = transformer().encode(&json!("small"), true, false).unwrap();
        assert_eq!(wire, "\"small\"");
    }

    #[test]
    fn test_large_value_compressed_and_smaller() {
        let value = large_value();
        let plain = serde_json::to_string(&value).unwrap();
        let wire = transformer().encode(&value, true, false).unwrap();

        assert!(wire.starts_with(COMPRESSED_TAG));
        assert!(wire.len() < plain.len());
        assert_eq!(transformer().decode(&wire).unwrap(), value);
    }

    #[test]
    fn test_encrypt_wraps_compressed_payload() {
        let t = transformer();
        let value = large_value();
        let wire = t.encode(&value, true, true).unwrap();

        assert!(wire.starts_with(ENCRYPTED_TAG));
        assert!(!wire.contains(COMPRESSED_TAG));

        let envelope = t.open(&wire).unwrap();
        assert_eq!(envelope.encoding, Encoding::Both);
        assert_eq!(envelope.into_value().unwrap(), value);
    }

    #[test]
    fn test_encrypt_only() {
        let t = transformer();
        let value = json!({"a": [1, 2, 3]});
        let wire = t.encode(&value, false, true).unwrap();

        let envelope = t.open(&wire).unwrap();
        assert_eq!(envelope.encoding, Encoding::Encrypted);
        assert!(envelope.encoding.is_encrypted());
        assert!(!envelope.encoding.is_compressed());
        assert_eq!(t.decode(&wire).unwrap(), value);
    }

    #[test]
    fn test_wrong_key_does_not_decode() {
        let wire = transformer().encode(&large_value(), true, true).unwrap();
        let other = Transformer::new(1024, "different");
        assert!(other.decode(&wire).is_err());
    }

    #[test]
    fn test_corrupt_payload_returns_raw() {
        let t = transformer();
        let raw = "compressed:not base64 !!";
        assert!(t.decode(raw).is_err());
        assert_eq!(t.decode_or_raw(raw), Value::String(raw.to_string()));
    }

    #[test]
    fn test_plain_round_trip() {
        let t = transformer();
        let value = json!({"nested": {"n": 1.5, "b": true, "s": null}});
        let wire = t.encode(&value, false, false).unwrap();
        assert_eq!(t.open(&wire).unwrap().encoding, Encoding::None);
        assert_eq!(t.decode(&wire).unwrap(), value);
    }
}
