//! Archive blob framing.
//!
//! An uncompressed blob is:
//!
//! ```text
//! "GARC" | version: u8 | digest: [u8; 16] | body
//! ```
//!
//! where `body` is one tagged dictionary node and `digest` is the first 16
//! bytes of SHA-256 over `body`. A compressed blob wraps a whole uncompressed
//! blob:
//!
//! ```text
//! "GARCZ" | uncompressed_size: varint | zstd(uncompressed blob)
//! ```
//!
//! The decoder detects both forms.

use std::io::Read;

use sha2::{Digest, Sha256};

use crate::codec::node::{decode_node, encode_dictionary};
use crate::codec::primitives::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{
    DIGEST_LEN, FORMAT_VERSION, MAGIC_COMPRESSED, MAGIC_UNCOMPRESSED, MAX_ARCHIVE_SIZE,
    MIN_FORMAT_VERSION,
};
use crate::model::{Dictionary, Node};

// =============================================================================
// DECODING
// =============================================================================

/// Decodes an archive blob into its container dictionary.
///
/// Handles both compressed (GARCZ) and uncompressed (GARC) blobs.
pub fn decode_archive(input: &[u8]) -> Result<Dictionary, DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::UnexpectedEof { context: "magic" });
    }

    if input.len() >= 5 && &input[0..5] == MAGIC_COMPRESSED {
        let decompressed = decompress_zstd(&input[5..])?;
        decode_uncompressed(&decompressed)
    } else if &input[0..4] == MAGIC_UNCOMPRESSED {
        if input.len() > MAX_ARCHIVE_SIZE {
            return Err(DecodeError::LengthExceedsLimit {
                field: "archive",
                len: input.len(),
                max: MAX_ARCHIVE_SIZE,
            });
        }
        decode_uncompressed(input)
    } else {
        let mut found = [0u8; 4];
        found.copy_from_slice(&input[0..4]);
        Err(DecodeError::InvalidMagic { found })
    }
}

fn decode_uncompressed(input: &[u8]) -> Result<Dictionary, DecodeError> {
    let mut reader = Reader::new(input);

    let magic = reader.read_bytes(4, "magic")?;
    if magic != MAGIC_UNCOMPRESSED {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(DecodeError::InvalidMagic { found });
    }

    let version = reader.read_byte("version")?;
    if !(MIN_FORMAT_VERSION..=FORMAT_VERSION).contains(&version) {
        return Err(DecodeError::UnsupportedVersion { version });
    }

    let digest: [u8; DIGEST_LEN] = reader.read_array("digest")?;
    if body_digest(reader.remaining()) != digest {
        return Err(DecodeError::DigestMismatch);
    }

    let root = decode_node(&mut reader)?;
    if !reader.is_empty() {
        return Err(DecodeError::TrailingBytes {
            count: reader.remaining_len(),
        });
    }

    match root {
        Node::Dictionary(dict) => Ok(dict),
        _ => Err(DecodeError::RootNotDictionary),
    }
}

fn decompress_zstd(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut reader = Reader::new(compressed);
    let declared_size = reader.read_length(MAX_ARCHIVE_SIZE, "uncompressed_size")?;

    let mut decoder = zstd::Decoder::new(reader.remaining())
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    // Read one byte past the declared size so oversized output is detected
    // without buffering it.
    let mut decompressed = Vec::with_capacity(declared_size);
    (&mut decoder)
        .take(declared_size as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    if decompressed.len() != declared_size {
        return Err(DecodeError::UncompressedSizeMismatch {
            declared: declared_size,
            actual: decompressed.len(),
        });
    }

    Ok(decompressed)
}

fn body_digest(body: &[u8]) -> [u8; DIGEST_LEN] {
    let hash = Sha256::digest(body);
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&hash[..DIGEST_LEN]);
    digest
}

// =============================================================================
// ENCODING
// =============================================================================

/// Options for encoding archive blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// zstd compression level, or `None` for an uncompressed blob.
    pub compression_level: Option<i32>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::compressed(3)
    }
}

impl EncodeOptions {
    /// Uncompressed blobs.
    pub fn uncompressed() -> Self {
        Self {
            compression_level: None,
        }
    }

    /// zstd-compressed blobs at `level`.
    pub fn compressed(level: i32) -> Self {
        Self {
            compression_level: Some(level),
        }
    }
}

/// Encodes a container dictionary into an archive blob.
pub fn encode_archive(container: &Dictionary, options: EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut body = Writer::new();
    encode_dictionary(&mut body, container)?;
    let body = body.into_bytes();

    let total = 4 + 1 + DIGEST_LEN + body.len();
    if total > MAX_ARCHIVE_SIZE {
        return Err(EncodeError::LengthExceedsLimit {
            field: "archive",
            len: total,
            max: MAX_ARCHIVE_SIZE,
        });
    }

    let mut writer = Writer::with_capacity(total);
    writer.write_bytes(MAGIC_UNCOMPRESSED);
    writer.write_byte(FORMAT_VERSION);
    writer.write_bytes(&body_digest(&body));
    writer.write_bytes(&body);
    let uncompressed = writer.into_bytes();

    let Some(level) = options.compression_level else {
        return Ok(uncompressed);
    };

    let compressed = zstd::encode_all(uncompressed.as_slice(), level)
        .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;

    let mut writer = Writer::with_capacity(5 + 10 + compressed.len());
    writer.write_bytes(MAGIC_COMPRESSED);
    writer.write_varint(uncompressed.len() as u64);
    writer.write_bytes(&compressed);

    Ok(writer.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::node::encode_node;

    fn container() -> Dictionary {
        let mut object = Dictionary::new();
        object.insert("entity", "Event");
        object.insert("archiveID", "A");
        object.insert("title", "Launch");

        let mut container = Dictionary::new();
        container.insert("version", Node::Integer(1));
        container.insert("objects", vec![Node::Dictionary(object)]);
        container
    }

    #[test]
    fn test_archive_roundtrip() {
        let container = container();
        let bytes = encode_archive(&container, EncodeOptions::uncompressed()).unwrap();
        assert_eq!(&bytes[0..4], b"GARC");
        assert_eq!(bytes[4], FORMAT_VERSION);
        assert_eq!(decode_archive(&bytes).unwrap(), container);
    }

    #[test]
    fn test_archive_compressed_roundtrip() {
        let container = container();
        let bytes = encode_archive(&container, EncodeOptions::compressed(3)).unwrap();
        assert_eq!(&bytes[0..5], b"GARCZ");
        assert_eq!(decode_archive(&bytes).unwrap(), container);
    }

    #[test]
    fn test_digest_mismatch() {
        let mut bytes = encode_archive(&container(), EncodeOptions::uncompressed()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode_archive(&bytes), Err(DecodeError::DigestMismatch)));
    }

    #[test]
    fn test_invalid_magic() {
        let result = decode_archive(b"XXXXXXXX");
        assert!(matches!(result, Err(DecodeError::InvalidMagic { .. })));
    }

    #[test]
    fn test_unsupported_version() {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC_UNCOMPRESSED);
        data.push(99);
        data.extend_from_slice(&[0u8; 32]);

        let result = decode_archive(&data);
        assert!(matches!(result, Err(DecodeError::UnsupportedVersion { version: 99 })));
    }

    #[test]
    fn test_root_must_be_dictionary() {
        let mut body = Writer::new();
        encode_node(&mut body, &Node::Integer(7)).unwrap();
        let body = body.into_bytes();

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC_UNCOMPRESSED);
        data.push(FORMAT_VERSION);
        data.extend_from_slice(&body_digest(&body));
        data.extend_from_slice(&body);

        assert!(matches!(decode_archive(&data), Err(DecodeError::RootNotDictionary)));
    }

    #[test]
    fn test_compressed_size_mismatch() {
        let bytes = encode_archive(&container(), EncodeOptions::uncompressed()).unwrap();
        let compressed = zstd::encode_all(bytes.as_slice(), 3).unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(MAGIC_COMPRESSED);
        let mut size = Writer::new();
        size.write_varint(bytes.len() as u64 - 1);
        data.extend_from_slice(size.as_bytes());
        data.extend_from_slice(&compressed);

        assert!(matches!(
            decode_archive(&data),
            Err(DecodeError::UncompressedSizeMismatch { .. })
        ));
    }
}
