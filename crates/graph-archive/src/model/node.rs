//! Storage-neutral node tree.
//!
//! Nodes are the keyed, property-list-like structure that encoded records and
//! archive containers are made of. Every node type maps to one wire tag in
//! [`codec::node`](crate::codec::node).

use std::collections::BTreeMap;
use std::collections::btree_map;

use uuid::Uuid;

use crate::model::Decimal;

/// Reserved key holding a record's entity name.
pub const ENTITY_KEY: &str = "entity";

/// Reserved key holding a record's batch-scoped archive identifier.
pub const ARCHIVE_ID_KEY: &str = "archiveID";

/// Returns true if `key` is one of the two reserved control keys.
pub fn is_reserved_key(key: &str) -> bool {
    key == ENTITY_KEY || key == ARCHIVE_ID_KEY
}

/// A storage-neutral value.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Bool(bool),
    Integer(i64),
    Real(f64),
    Decimal(Decimal),
    String(String),
    Data(Vec<u8>),
    /// Microseconds since the Unix epoch.
    Date(i64),
    Uuid(Uuid),
    Array(Vec<Node>),
    Dictionary(Dictionary),
}

impl Node {
    /// Short type name, used in log messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Node::Bool(_) => "bool",
            Node::Integer(_) => "integer",
            Node::Real(_) => "real",
            Node::Decimal(_) => "decimal",
            Node::String(_) => "string",
            Node::Data(_) => "data",
            Node::Date(_) => "date",
            Node::Uuid(_) => "uuid",
            Node::Array(_) => "array",
            Node::Dictionary(_) => "dictionary",
        }
    }

    /// Returns the string if this is a string node.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the items if this is an array node.
    pub fn as_array(&self) -> Option<&[Node]> {
        match self {
            Node::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the dictionary if this is a dictionary node.
    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Node::Dictionary(d) => Some(d),
            _ => None,
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::String(s.to_string())
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::String(s)
    }
}

impl From<Dictionary> for Node {
    fn from(d: Dictionary) -> Self {
        Node::Dictionary(d)
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Node::Array(items)
    }
}

/// A string-keyed mapping of nodes, iterated in key order.
///
/// Used both for encoded records (with the reserved [`ENTITY_KEY`] and
/// [`ARCHIVE_ID_KEY`] entries) and for archive containers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: BTreeMap<String, Node>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Node>) -> Option<Node> {
        self.entries.insert(key.into(), value.into())
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &str) -> Option<Node> {
        self.entries.remove(key)
    }

    /// Looks up an entry.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the greatest key.
    pub fn last_key(&self) -> Option<&str> {
        self.entries.keys().next_back().map(String::as_str)
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Node> {
        self.entries.iter()
    }

    /// Returns the entity name of an encoded record.
    ///
    /// Names qualified with a module prefix (`App.Event`) resolve to their
    /// last component.
    pub fn entity_name(&self) -> Option<&str> {
        let name = self.get(ENTITY_KEY)?.as_str()?;
        name.rsplit('.').next()
    }

    /// Returns the archive identifier of an encoded record.
    pub fn archive_id(&self) -> Option<&str> {
        self.get(ARCHIVE_ID_KEY)?.as_str()
    }

    /// Returns the target id if this is a to-many stub for relationship `key`.
    ///
    /// A stub is a one-entry dictionary `{key: "<archive id>"}`.
    pub fn leaf_reference(&self, key: &str) -> Option<&str> {
        if self.len() != 1 {
            return None;
        }
        self.get(key)?.as_str()
    }

    /// Returns true if this is a to-many stub for relationship `key`.
    pub fn is_leaf_node(&self, key: &str) -> bool {
        self.leaf_reference(key).is_some()
    }
}

impl Drop for Dictionary {
    // Nested containers are moved onto a heap stack first, so freeing a deep
    // tree does not recurse once per level.
    fn drop(&mut self) {
        if !self.entries.values().any(is_container) {
            return;
        }
        let mut pending: Vec<Node> = std::mem::take(&mut self.entries).into_values().collect();
        while let Some(node) = pending.pop() {
            match node {
                Node::Array(items) => pending.extend(items),
                Node::Dictionary(mut dict) => {
                    pending.extend(std::mem::take(&mut dict.entries).into_values());
                }
                _ => {}
            }
        }
    }
}

fn is_container(node: &Node) -> bool {
    matches!(node, Node::Array(_) | Node::Dictionary(_))
}

impl<'a> IntoIterator for &'a Dictionary {
    type Item = (&'a String, &'a Node);
    type IntoIter = btree_map::Iter<'a, String, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: Into<String>, V: Into<Node>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
