//! Data model types.
//!
//! - Attribute values and kinds
//! - Storage-neutral nodes and dictionaries
//! - Entity schema with resolved inverses
//! - The in-memory record context

pub mod context;
pub mod node;
pub mod schema;
pub mod value;

pub use context::{Context, RecordId, Related};
pub use node::{is_reserved_key, Dictionary, Node, ARCHIVE_ID_KEY, ENTITY_KEY};
pub use schema::{
    ArchivePolicy, AttributeDescription, Cardinality, DeleteRule, EntityBuilder,
    EntityDescription, RelationshipBuilder, RelationshipDescription, Schema, SchemaBuilder,
};
pub use value::{AttributeKind, CustomValue, Decimal, DecimalMantissa, InvalidUri, Uri, Value};
