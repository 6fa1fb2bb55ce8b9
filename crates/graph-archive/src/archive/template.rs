//! Archive container templates.
//!
//! A template decides what surrounds the encoded records in a container and
//! whether a container read back is acceptable.

use uuid::Uuid;

use crate::model::{Context, Dictionary, Node, RecordId};

/// Key under which [`VersionedTemplate`] stores the format version.
pub const VERSION_KEY: &str = "version";
/// Key under which [`VersionedTemplate`] stores the namespace.
pub const NAMESPACE_KEY: &str = "namespace";
/// Key under which [`VersionedTemplate`] stores a per-container token.
pub const TOKEN_KEY: &str = "token";
/// Default key for the encoded records array.
pub const OBJECTS_KEY: &str = "objects";

/// Shapes and validates archive containers.
pub trait ArchiveTemplate {
    /// Returns the metadata every new container starts with.
    fn template(&self) -> Dictionary;

    /// Key holding the array of encoded records.
    fn objects_key(&self) -> &str {
        OBJECTS_KEY
    }

    /// Returns false to reject a container before anything is inserted.
    fn is_valid(&self, container: &Dictionary) -> bool;

    /// Runs after a container's records were inserted into `context`.
    fn post_process(&self, context: &mut Context, records: &[RecordId]) {
        let _ = (context, records);
    }
}

/// Template that stamps a namespace and version on every container.
///
/// Containers are accepted when their namespace matches, their version is
/// one of the accepted versions, and every required field is equal.
#[derive(Debug, Clone)]
pub struct VersionedTemplate {
    namespace: String,
    version: String,
    accepted: Vec<String>,
    fields: Dictionary,
    objects_key: String,
}

impl VersionedTemplate {
    pub fn new(namespace: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            namespace: namespace.into(),
            accepted: vec![version.clone()],
            version,
            fields: Dictionary::new(),
            objects_key: OBJECTS_KEY.to_string(),
        }
    }

    /// Also accepts containers written with `version`.
    pub fn accept_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        if !self.accepted.contains(&version) {
            self.accepted.push(version);
        }
        self
    }

    /// Adds a field that is written into every container and must match on read.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Node>) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// Stores the records array under `key` instead of `"objects"`.
    pub fn with_objects_key(mut self, key: impl Into<String>) -> Self {
        self.objects_key = key.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn accepted_versions(&self) -> &[String] {
        &self.accepted
    }
}

impl ArchiveTemplate for VersionedTemplate {
    fn template(&self) -> Dictionary {
        let mut container = self.fields.clone();
        container.insert(VERSION_KEY, self.version.as_str());
        container.insert(NAMESPACE_KEY, self.namespace.as_str());
        container.insert(TOKEN_KEY, Node::Uuid(Uuid::new_v4()));
        container
    }

    fn objects_key(&self) -> &str {
        &self.objects_key
    }

    fn is_valid(&self, container: &Dictionary) -> bool {
        let version_ok = container
            .get(VERSION_KEY)
            .and_then(Node::as_str)
            .is_some_and(|v| self.accepted.iter().any(|a| a == v));
        let namespace_ok = container.get(NAMESPACE_KEY).and_then(Node::as_str) == Some(self.namespace.as_str());
        version_ok
            && namespace_ok
            && self
                .fields
                .iter()
                .all(|(key, value)| container.get(key) == Some(value))
    }
}
