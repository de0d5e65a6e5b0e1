//! Core object model for vellum
//!
//! Objects are immutable byte sequences framed as `"<kind> <len>\0<payload>"`,
//! identified by the SHA-1 digest of that serialized form and stored
//! zlib-compressed on disk.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// Unique identifier for any stored object: a 160-bit content digest,
/// rendered as 40 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 20]);

impl ObjectId {
    /// Create a new ObjectId from raw bytes
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Compute the ObjectId of a serialized (header-framed) object
    pub fn from_encoded(data: &[u8]) -> Self {
        let hash = Sha1::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Abbreviated form for human-facing output
    pub fn short(&self) -> String {
        self.to_hex()[..7].to_string()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Object type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Blob,
    Commit,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Blob => "blob",
            ObjectKind::Commit => "commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(ObjectKind::Blob),
            "commit" => Some(ObjectKind::Commit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the canonical serialized form: `"<kind> <len>\0<payload>"`.
pub fn encode(kind: ObjectKind, payload: &[u8]) -> Vec<u8> {
    let header = format!("{} {}\0", kind.as_str(), payload.len());
    let mut buf = Vec::with_capacity(header.len() + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a serialized object back into kind and payload.
///
/// The split point is the first NUL byte; a missing NUL, an unknown kind or
/// a length field that disagrees with the payload is a corrupt object.
pub fn decode(data: &[u8]) -> Result<(ObjectKind, Vec<u8>)> {
    let nul = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::CorruptObject("missing header terminator".to_string()))?;
    let header = std::str::from_utf8(&data[..nul])
        .map_err(|_| Error::CorruptObject("header is not UTF-8".to_string()))?;
    let (kind_str, len_str) = header
        .split_once(' ')
        .ok_or_else(|| Error::CorruptObject(format!("malformed header {header:?}")))?;
    let kind = ObjectKind::parse(kind_str)
        .ok_or_else(|| Error::CorruptObject(format!("unknown object kind {kind_str:?}")))?;
    let declared: usize = len_str
        .parse()
        .map_err(|_| Error::CorruptObject(format!("bad payload length {len_str:?}")))?;
    let payload = &data[nul + 1..];
    if payload.len() != declared {
        return Err(Error::CorruptObject(format!(
            "payload is {} bytes but header declares {declared}",
            payload.len()
        )));
    }
    Ok((kind, payload.to_vec()))
}

/// Compress bytes as a zlib stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a zlib stream; malformed input is a corrupt object.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut decoder = ZlibDecoder::new(data);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CorruptObject(format!("zlib inflate failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_roundtrip() {
        let bytes = [42u8; 20];
        let id = ObjectId::new(bytes);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 40);
        let id2 = ObjectId::from_hex(&hex).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn test_object_id_rejects_wrong_length() {
        assert!(ObjectId::from_hex("abcd").is_err());
        assert!(ObjectId::from_hex("zz".repeat(20).as_str()).is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let payload = b"hello world";
        let encoded = encode(ObjectKind::Blob, payload);
        assert!(encoded.starts_with(b"blob 11\0"));
        let (kind, decoded) = decode(&encoded).unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_identical_payloads_hash_equal() {
        let a = ObjectId::from_encoded(&encode(ObjectKind::Blob, b"same"));
        let b = ObjectId::from_encoded(&encode(ObjectKind::Blob, b"same"));
        assert_eq!(a, b);
        let c = ObjectId::from_encoded(&encode(ObjectKind::Commit, b"same"));
        assert_ne!(a, c);
    }

    #[test]
    fn test_decode_missing_nul() {
        let err = decode(b"blob 4 no terminator").unwrap_err();
        assert!(matches!(err, Error::CorruptObject(_)));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let err = decode(b"blob 99\0short").unwrap_err();
        assert!(matches!(err, Error::CorruptObject(_)));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = decode(b"tree 4\0abcd").unwrap_err();
        assert!(matches!(err, Error::CorruptObject(_)));
    }

    #[test]
    fn test_compress_roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_compress_roundtrip_empty() {
        let compressed = compress(b"").unwrap();
        assert_eq!(decompress(&compressed).unwrap(), b"");
    }

    #[test]
    fn test_decompress_garbage_is_corrupt() {
        let err = decompress(b"definitely not a zlib stream").unwrap_err();
        assert!(matches!(err, Error::CorruptObject(_)));
    }
}
