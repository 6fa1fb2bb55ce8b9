//! Error types for archiving, restoring and blob encoding.

use std::io;

use thiserror::Error;

use crate::model::{AttributeKind, RecordId};

/// How far an error propagates.
///
/// Attribute-level errors are absorbed by the record being processed; schema
/// and corrupt-leaf errors fail the whole batch; wire and I/O errors fail the
/// chunk they occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A001: one attribute value could not be coded; the attribute is skipped.
    Attribute,
    /// S001: the schema or coder configuration is inconsistent.
    Schema,
    /// R001: the container failed the template's validity predicate.
    Rejected,
    /// L001: a deferred reference names a record missing from its batch.
    CorruptLeaf,
    /// W001: the blob is malformed.
    Wire,
    /// I001: reading or writing chunk storage failed.
    Io,
}

impl Severity {
    /// Returns the short code for this severity (e.g., "A001").
    pub fn code(&self) -> &'static str {
        match self {
            Severity::Attribute => "A001",
            Severity::Schema => "S001",
            Severity::Rejected => "R001",
            Severity::CorruptLeaf => "L001",
            Severity::Wire => "W001",
            Severity::Io => "I001",
        }
    }

    /// Returns true if processing can continue past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Severity::Attribute | Severity::Rejected)
    }
}

/// Inconsistent schema or coder configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("unknown entity {entity:?}")]
    UnknownEntity { entity: String },

    #[error("entity {entity:?} has no attribute {attribute:?}")]
    UnknownAttribute { entity: String, attribute: String },

    #[error("entity {entity:?} has no relationship {relationship:?}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("entity {entity:?} is declared twice")]
    DuplicateEntity { entity: String },

    #[error("entity {entity:?} declares property {property:?} twice")]
    DuplicateProperty { entity: String, property: String },

    #[error("entity {entity:?} uses reserved key {property:?} as a property name")]
    ReservedKey { entity: String, property: String },

    #[error("relationship {entity}.{relationship} points to unknown entity {destination:?}")]
    UnknownDestination {
        entity: String,
        relationship: String,
        destination: String,
    },

    #[error("relationship {entity}.{relationship} names missing inverse {inverse:?}")]
    UnknownInverse {
        entity: String,
        relationship: String,
        inverse: String,
    },

    #[error("relationship {entity}.{relationship} and inverse {inverse:?} do not point at each other")]
    InverseMismatch {
        entity: String,
        relationship: String,
        inverse: String,
    },

    #[error("relationship {entity}.{relationship} has multiple candidate inverses: {candidates:?}")]
    AmbiguousInverse {
        entity: String,
        relationship: String,
        candidates: Vec<String>,
    },

    #[error("relationship {entity}.{relationship} is not {expected}")]
    CardinalityMismatch {
        entity: String,
        relationship: String,
        expected: &'static str,
    },

    #[error("attribute {attribute:?} has unsupported kind {kind:?}")]
    UnsupportedAttributeKind { attribute: String, kind: AttributeKind },

    #[error("transformable attribute {attribute:?} names no transformer")]
    MissingTransformer { attribute: String },

    #[error("attribute {attribute:?} uses unregistered transformer {transformer:?}")]
    UnregisteredTransformer { attribute: String, transformer: String },
}

/// A single attribute value could not be converted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("value for attribute {attribute:?} is not a valid {expected:?}")]
    InvalidValue {
        attribute: String,
        expected: AttributeKind,
    },

    #[error("stored value for attribute {attribute:?} is corrupted")]
    DataCorrupted { attribute: String },

    #[error("unknown attribute {attribute:?}")]
    UnknownAttribute { attribute: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl AttributeError {
    /// Returns the severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            AttributeError::Schema(_) => Severity::Schema,
            _ => Severity::Attribute,
        }
    }
}

/// Error from the record context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("record {record} does not exist in this context")]
    UnknownRecord { record: RecordId },

    #[error("relationship {relationship:?} expects {expected:?} but got a {found:?} record")]
    EntityMismatch {
        relationship: String,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Error while decoding a blob.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("invalid magic bytes: expected GARC or GARCZ, found {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("unsupported version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("varint overflow (value exceeds u64)")]
    VarintOverflow,

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid node tag: {tag:#04x}")]
    InvalidTag { tag: u8 },

    #[error("invalid bool byte: {value:#04x}")]
    InvalidBool { value: u8 },

    #[error("invalid decimal mantissa type: {kind:#04x}")]
    InvalidMantissaType { kind: u8 },

    #[error("nesting exceeds maximum depth {max}")]
    NestingTooDeep { max: usize },

    #[error("dictionary keys are duplicated or unsorted at {key:?}")]
    UnsortedKey { key: String },

    #[error("DECIMAL has trailing zeros in mantissa (not normalized)")]
    DecimalNotNormalized,

    #[error("DECIMAL mantissa bytes are not minimal")]
    DecimalMantissaNotMinimal,

    #[error("body digest does not match header")]
    DigestMismatch,

    #[error("{count} trailing bytes after root node")]
    TrailingBytes { count: usize },

    #[error("root node is not a dictionary")]
    RootNotDictionary,

    #[error("zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("decompressed size {actual} doesn't match declared {declared}")]
    UncompressedSizeMismatch { declared: usize, actual: usize },
}

/// Error while encoding records or writing a blob.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("DECIMAL value is not normalized (has trailing zeros)")]
    DecimalNotNormalized,

    #[error("nesting exceeds maximum depth {max}")]
    NestingTooDeep { max: usize },

    #[error("zstd compression failed: {0}")]
    CompressionFailed(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl EncodeError {
    /// Returns the severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            EncodeError::Schema(_) | EncodeError::Context(_) => Severity::Schema,
            _ => Severity::Wire,
        }
    }
}

/// Error while inflating encoded nodes into a context.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InflateError {
    #[error("malformed node: {context}")]
    MalformedNode { context: &'static str },

    #[error("relationship {entity}.{relationship} holds a value of the wrong shape")]
    MalformedRelationship { entity: String, relationship: String },

    #[error("archive id {archive_id:?} appears twice in one batch")]
    DuplicateArchiveId { archive_id: String },

    #[error("leaf node for relationship {relationship:?} references missing archive id {archive_id:?}")]
    CorruptLeafNode {
        archive_id: String,
        relationship: String,
    },

    #[error("nesting exceeds maximum depth {max}")]
    NestingTooDeep { max: usize },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl InflateError {
    /// Returns the severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            InflateError::CorruptLeafNode { .. } => Severity::CorruptLeaf,
            InflateError::Schema(_) | InflateError::Context(_) => Severity::Schema,
            _ => Severity::Wire,
        }
    }
}

/// Error from the archive façade and chunk storage.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inflate(#[from] InflateError),

    #[error("archive was rejected by the template")]
    Rejected,

    #[error("container has no object list under {key:?}")]
    MissingObjects { key: String },

    #[error("record produced no archive")]
    NothingArchived,

    #[error("commit failed: {0}")]
    Commit(Box<dyn std::error::Error + Send + Sync>),
}

impl ArchiveError {
    /// Returns the severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            ArchiveError::Io(_) | ArchiveError::Commit(_) => Severity::Io,
            ArchiveError::Encode(e) => e.severity(),
            ArchiveError::Decode(_) | ArchiveError::MissingObjects { .. } => Severity::Wire,
            ArchiveError::Inflate(e) => e.severity(),
            ArchiveError::Rejected => Severity::Rejected,
            ArchiveError::NothingArchived => Severity::Schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_codes() {
        assert_eq!(Severity::Attribute.code(), "A001");
        assert_eq!(Severity::CorruptLeaf.code(), "L001");
        assert!(Severity::Attribute.is_recoverable());
        assert!(!Severity::Schema.is_recoverable());
    }

    #[test]
    fn test_attribute_error_severity() {
        let recoverable = AttributeError::DataCorrupted {
            attribute: "title".to_string(),
        };
        assert_eq!(recoverable.severity(), Severity::Attribute);

        let fatal = AttributeError::from(SchemaError::MissingTransformer {
            attribute: "color".to_string(),
        });
        assert_eq!(fatal.severity(), Severity::Schema);
    }

    #[test]
    fn test_corrupt_leaf_is_not_recoverable() {
        let err = ArchiveError::from(InflateError::CorruptLeafNode {
            archive_id: "X".to_string(),
            relationship: "detail".to_string(),
        });
        assert_eq!(err.severity(), Severity::CorruptLeaf);
        assert!(!err.severity().is_recoverable());
    }
}
