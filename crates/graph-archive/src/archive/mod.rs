//! Archive containers, templates and chunked archive directories.

pub mod document;
pub mod store;
pub mod template;

pub use document::{ArchiveOptions, Archiver, RestoreReport};
pub use store::ChunkStore;
pub use template::{ArchiveTemplate, VersionedTemplate, NAMESPACE_KEY, OBJECTS_KEY, TOKEN_KEY, VERSION_KEY};
