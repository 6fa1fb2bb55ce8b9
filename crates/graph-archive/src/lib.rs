//! Graph archive: portable snapshots of interconnected records.
//!
//! This crate serializes a graph of typed records (attributes plus to-one,
//! to-many and ordered to-many relationships) into a self-contained binary
//! archive and rebuilds an equivalent, distinct graph from it.
//!
//! # Overview
//!
//! - **Cycle-safe**: every distinct record is encoded once per traversal;
//!   later references become stubs naming its archive identifier
//! - **Deferred references**: stubs are resolved after the whole batch is
//!   inflated, so forward references and ordered positions survive
//! - **Chunked**: large record sets can be split across sequentially
//!   numbered files and restored one chunk at a time
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use graph_archive::{Archiver, AttributeKind, Context, Schema, Value, VersionedTemplate};
//!
//! let schema = Arc::new(
//!     Schema::builder()
//!         .entity("Folder", |e| {
//!             e.attribute("name", AttributeKind::String)
//!                 .to_one("parent", "Folder", |r| r)
//!                 .ordered_to_many("children", "Folder", |r| r.cascade())
//!         })
//!         .build()
//!         .unwrap(),
//! );
//!
//! let mut ctx = Context::new(schema.clone());
//! let root = ctx.insert("Folder").unwrap();
//! let child = ctx.insert("Folder").unwrap();
//! ctx.set_attribute(root, "name", "root").unwrap();
//! ctx.set_attribute(child, "name", "child").unwrap();
//! ctx.add_to_many(root, "children", child).unwrap();
//!
//! let archiver = Archiver::new(schema.clone(), VersionedTemplate::new("com.example.files", "1"));
//! let bytes = archiver.archive_to_bytes(&ctx, &[root]).unwrap();
//!
//! let mut restored = Context::new(schema);
//! let ids = archiver.inserted_objects(&bytes, &mut restored).unwrap();
//! let copy = restored.to_many(ids[0], "children").unwrap()[0];
//! assert_eq!(restored.attribute(copy, "name").unwrap(), Some(&Value::from("child")));
//! assert_eq!(restored.to_one(copy, "parent").unwrap(), Some(ids[0]));
//! ```
//!
//! # Modules
//!
//! - [`model`]: Schema, record context, values and storage-neutral nodes
//! - [`codec`]: Binary node encoding, archive blobs and the value coder
//! - [`graph`]: Traversal state, graph encoder and decoder
//! - [`archive`]: Templates, chunk storage and the [`Archiver`] façade
//! - [`error`]: Error types
//! - [`limits`]: Format constants and decoding limits
//!
//! # Wire Format
//!
//! Archives are a tagged node tree with an optional zstd wrapper:
//! - Uncompressed: `GARC` magic + version + body digest + body
//! - Compressed: `GARCZ` magic + uncompressed size + zstd data
//!
//! The decoder automatically detects and handles both formats.

pub mod archive;
pub mod codec;
pub mod error;
pub mod graph;
pub mod limits;
pub mod model;

// Re-export commonly used types at crate root
pub use archive::{ArchiveOptions, ArchiveTemplate, Archiver, ChunkStore, RestoreReport, VersionedTemplate};
pub use codec::{decode_archive, encode_archive, EncodeOptions, FnTransformer, ValueCoder, ValueTransformer};
pub use error::{
    ArchiveError, AttributeError, ContextError, DecodeError, EncodeError, InflateError, SchemaError, Severity,
};
pub use graph::{archive_as_dictionary, duplicate, encode_roots, insert_objects, Decoder, Encoder, Traversal};
pub use model::{
    AttributeKind, Cardinality, Context, CustomValue, Decimal, DeleteRule, Dictionary, Node, RecordId, Schema,
    Uri, Value,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
