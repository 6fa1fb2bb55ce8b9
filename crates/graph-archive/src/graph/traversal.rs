//! Per-operation traversal registry.
//!
//! A [`Traversal`] maps batch-scoped archive identifiers to records in both
//! directions and collects the deferred references found while decoding.
//! Each encode or decode operation owns one; nothing is process-wide.

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::error::InflateError;
use crate::model::RecordId;

/// A deferred relationship assignment found while decoding.
///
/// Created when a relationship value is a stub naming a record that may not
/// exist yet; consumed by the resolution pass at the end of the same batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Record that owns the relationship.
    pub source: RecordId,
    /// Archive identifier of the target record.
    pub archive_id: String,
    /// Relationship name on the source's entity.
    pub relationship: String,
    /// Position in the encoded to-many array; `None` for to-one stubs.
    pub index: Option<usize>,
}

/// Identifier registry and deferred references for one operation.
#[derive(Debug, Default)]
pub struct Traversal {
    objects: FxHashMap<String, RecordId>,
    ids: FxHashMap<RecordId, String>,
    leaf_nodes: Vec<LeafNode>,
}

impl Traversal {
    /// Creates an empty traversal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every identifier and deferred reference.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.ids.clear();
        self.leaf_nodes.clear();
    }

    /// Returns true if nothing is registered or deferred.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.leaf_nodes.is_empty()
    }

    /// Number of registered records.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Generates a fresh archive identifier.
    pub fn next_archive_id() -> String {
        Uuid::new_v4().hyphenated().to_string().to_uppercase()
    }

    /// Registers `record` under a freshly generated identifier and returns it.
    pub fn register(&mut self, record: RecordId) -> String {
        loop {
            let archive_id = Self::next_archive_id();
            if !self.objects.contains_key(&archive_id) {
                self.objects.insert(archive_id.clone(), record);
                self.ids.insert(record, archive_id.clone());
                return archive_id;
            }
        }
    }

    /// Registers `record` under `archive_id`.
    ///
    /// An identifier may name only one record per batch.
    pub fn mark_as_traversed(&mut self, record: RecordId, archive_id: &str) -> Result<(), InflateError> {
        if self.objects.contains_key(archive_id) {
            return Err(InflateError::DuplicateArchiveId {
                archive_id: archive_id.to_string(),
            });
        }
        self.objects.insert(archive_id.to_string(), record);
        self.ids.insert(record, archive_id.to_string());
        Ok(())
    }

    /// Returns true if `record` has been registered.
    pub fn has_been_traversed(&self, record: RecordId) -> bool {
        self.ids.contains_key(&record)
    }

    /// Archive identifier registered for `record`.
    pub fn archive_id(&self, record: RecordId) -> Option<&str> {
        self.ids.get(&record).map(String::as_str)
    }

    /// Record registered under `archive_id`.
    pub fn object(&self, archive_id: &str) -> Option<RecordId> {
        self.objects.get(archive_id).copied()
    }

    /// Defers a relationship assignment to the resolution pass.
    pub fn push_leaf(&mut self, leaf: LeafNode) {
        self.leaf_nodes.push(leaf);
    }

    /// Deferred references collected so far, in discovery order.
    pub fn leaf_nodes(&self) -> &[LeafNode] {
        &self.leaf_nodes
    }

    /// Removes and returns the deferred references.
    pub fn take_leaf_nodes(&mut self) -> Vec<LeafNode> {
        std::mem::take(&mut self.leaf_nodes)
    }
}
