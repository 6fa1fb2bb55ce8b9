//! Format constants and security limits for archive blobs.
//!
//! The decoder enforces every limit here before allocating, so a hostile or
//! truncated blob fails with a [`DecodeError`](crate::DecodeError) instead of
//! exhausting memory. Nested containers and records are walked from heap
//! stacks, so the depth limits bound the format rather than the call stack.

/// Magic bytes for an uncompressed archive blob.
pub const MAGIC_UNCOMPRESSED: &[u8; 4] = b"GARC";

/// Magic bytes for a zstd-compressed archive blob.
pub const MAGIC_COMPRESSED: &[u8; 5] = b"GARCZ";

/// Current blob format version.
pub const FORMAT_VERSION: u8 = 1;

/// Oldest blob format version this crate can read.
pub const MIN_FORMAT_VERSION: u8 = 1;

/// Length of the truncated SHA-256 body digest stored in the header.
pub const DIGEST_LEN: usize = 16;

/// Maximum bytes in a LEB128 varint.
pub const MAX_VARINT_BYTES: usize = 10;

/// Maximum decompressed blob size (256 MiB).
pub const MAX_ARCHIVE_SIZE: usize = 256 * 1024 * 1024;

/// Maximum length of a string node or dictionary key.
pub const MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// Maximum length of a data node.
pub const MAX_BYTES_LEN: usize = 64 * 1024 * 1024;

/// Maximum length of a big-endian decimal mantissa.
pub const MAX_DECIMAL_BYTES: usize = 64;

/// Maximum number of items in one array node.
pub const MAX_ARRAY_LEN: usize = 4 * 1024 * 1024;

/// Maximum number of entries in one dictionary node.
pub const MAX_DICT_ENTRIES: usize = 64 * 1024;

/// Maximum container nesting (arrays and dictionaries) in one blob.
pub const MAX_NESTING_DEPTH: usize = 2048;

/// Maximum record nesting produced by the encoder and accepted by the decoder.
///
/// Every nested record costs at most two container levels (its dictionary and
/// the to-many array holding it), plus the outer container and objects array.
pub const MAX_RECORD_DEPTH: usize = MAX_NESTING_DEPTH / 2 - 2;
