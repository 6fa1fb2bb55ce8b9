//! Record graph decoding.
//!
//! Decoding runs in two passes over one batch of encoded records:
//!
//! 1. Inflation creates a record for every nested dictionary, registers its
//!    archive identifier, decodes its attributes and links nested records.
//!    Stubs become [`LeafNode`]s, since their targets may not exist yet.
//! 2. Resolution links every leaf node to the record registered under its
//!    identifier. A missing identifier fails the batch.
//!
//! Records created before a failure stay in the context.

use std::collections::btree_map;
use std::iter::Enumerate;
use std::slice;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::ValueCoder;
use crate::error::{AttributeError, InflateError};
use crate::graph::{LeafNode, Traversal};
use crate::limits::MAX_RECORD_DEPTH;
use crate::model::{
    is_reserved_key, Context, Dictionary, EntityDescription, Node, RecordId, Schema,
};

/// Inflates encoded records into a context.
#[derive(Debug)]
pub struct Decoder<'a> {
    context: &'a mut Context,
    coder: &'a ValueCoder,
    schema: Arc<Schema>,
    traversal: Traversal,
}

impl<'a> Decoder<'a> {
    pub fn new(context: &'a mut Context, coder: &'a ValueCoder) -> Self {
        let schema = Arc::clone(context.schema());
        Self {
            context,
            coder,
            schema,
            traversal: Traversal::new(),
        }
    }

    /// Inflates a batch of top-level records and resolves its leaf nodes.
    ///
    /// Returns the top-level records in input order.
    pub fn insert_objects(&mut self, nodes: &[Node]) -> Result<Vec<RecordId>, InflateError> {
        self.traversal.clear();
        let result = self.inflate_batch(nodes);
        self.traversal.clear();
        result
    }

    fn inflate_batch(&mut self, nodes: &[Node]) -> Result<Vec<RecordId>, InflateError> {
        let schema = Arc::clone(&self.schema);
        let mut records = Vec::with_capacity(nodes.len());
        for node in nodes {
            let dict = node.as_dictionary().ok_or(InflateError::MalformedNode {
                context: "top-level object is not a dictionary",
            })?;
            records.push(self.inflate(&schema, dict)?);
        }
        let leaf_nodes = self.traversal.take_leaf_nodes();
        debug!(
            roots = records.len(),
            records = self.traversal.len(),
            leaf_nodes = leaf_nodes.len(),
            "inflated batch"
        );
        self.resolve_leaf_nodes(leaf_nodes)?;
        Ok(records)
    }

    /// Creates the record for `dict` and everything nested in it.
    ///
    /// Nested records are inflated depth first from an explicit stack. A
    /// child is linked to its parent once the child itself is complete.
    fn inflate<'n>(&mut self, schema: &Schema, dict: &'n Dictionary) -> Result<RecordId, InflateError> {
        let mut current = self.open(schema, dict)?;
        let mut parents: Vec<(Frame<'_, 'n>, Link<'n>)> = Vec::new();

        loop {
            if let Some((child, link)) = self.advance(&mut current)? {
                if parents.len() + 1 > MAX_RECORD_DEPTH {
                    return Err(InflateError::NestingTooDeep {
                        max: MAX_RECORD_DEPTH,
                    });
                }
                let child = self.open(schema, child)?;
                parents.push((std::mem::replace(&mut current, child), link));
                continue;
            }

            let record = current.record;
            let Some((parent, link)) = parents.pop() else {
                return Ok(record);
            };
            match link {
                Link::One(name) => self.context.set_to_one(parent.record, name, Some(record))?,
                Link::Many(name) => self.context.add_to_many(parent.record, name, record)?,
            }
            current = parent;
        }
    }

    /// Creates and registers the record for `dict`.
    fn open<'s, 'n>(&mut self, schema: &'s Schema, dict: &'n Dictionary) -> Result<Frame<'s, 'n>, InflateError> {
        let name = dict.entity_name().ok_or(InflateError::MalformedNode {
            context: "record has no entity name",
        })?;
        let archive_id = dict.archive_id().ok_or(InflateError::MalformedNode {
            context: "record has no archive id",
        })?;

        let entity = schema.require_entity(name)?;
        let record = self.context.insert(name)?;
        self.traversal.mark_as_traversed(record, archive_id)?;

        Ok(Frame {
            record,
            entity,
            entries: dict.iter(),
            many: None,
        })
    }

    /// Applies the entries of `frame` until one holds a nested record, which
    /// is returned with the relationship it belongs to. `None` once every
    /// entry is applied.
    fn advance<'n>(&mut self, frame: &mut Frame<'_, 'n>) -> Result<Option<(&'n Dictionary, Link<'n>)>, InflateError> {
        let entity = frame.entity;
        let record = frame.record;
        loop {
            if let Some((name, items)) = frame.many.as_mut() {
                let name: &'n str = *name;
                match items.next() {
                    Some((position, item)) => {
                        let child = item.as_dictionary().ok_or_else(|| malformed(entity, name))?;
                        match child.leaf_reference(name) {
                            Some(archive_id) => self.traversal.push_leaf(LeafNode {
                                source: record,
                                archive_id: archive_id.to_string(),
                                relationship: name.to_string(),
                                index: Some(position),
                            }),
                            None => return Ok(Some((child, Link::Many(name)))),
                        }
                    }
                    None => frame.many = None,
                }
                continue;
            }

            let Some((key, value)) = frame.entries.next() else {
                return Ok(None);
            };
            if is_reserved_key(key) {
                continue;
            }
            if let Some(index) = entity.relationship_index(key) {
                match (entity.relationships()[index].is_to_many(), value) {
                    (false, Node::Dictionary(child)) => return Ok(Some((child, Link::One(key.as_str())))),
                    (false, Node::String(archive_id)) => {
                        self.traversal.push_leaf(LeafNode {
                            source: record,
                            archive_id: archive_id.clone(),
                            relationship: key.clone(),
                            index: None,
                        });
                    }
                    (true, Node::Array(items)) => {
                        frame.many = Some((key.as_str(), items.iter().enumerate()));
                    }
                    _ => return Err(malformed(entity, key)),
                }
            } else if let Some(attribute) = entity.attribute(key) {
                match self.coder.decode(attribute, value) {
                    Ok(decoded) => self.context.set_attribute(record, key, decoded)?,
                    Err(AttributeError::Schema(e)) => return Err(e.into()),
                    Err(e) => warn!(
                        entity = entity.name(),
                        attribute = key.as_str(),
                        code = e.severity().code(),
                        error = %e,
                        "skipping attribute that failed to decode"
                    ),
                }
            } else {
                let e = AttributeError::UnknownAttribute {
                    attribute: key.clone(),
                };
                warn!(
                    entity = entity.name(),
                    code = e.severity().code(),
                    error = %e,
                    "skipping unknown key"
                );
            }
        }
    }

    /// Links every deferred reference to its now-existing target.
    fn resolve_leaf_nodes(&mut self, leaf_nodes: Vec<LeafNode>) -> Result<(), InflateError> {
        for leaf in leaf_nodes {
            let target =
                self.traversal
                    .object(&leaf.archive_id)
                    .ok_or_else(|| InflateError::CorruptLeafNode {
                        archive_id: leaf.archive_id.clone(),
                        relationship: leaf.relationship.clone(),
                    })?;

            let entity = self.context.entity(leaf.source)?;
            let relationship = entity
                .relationship(&leaf.relationship)
                .ok_or_else(|| entity.unknown_relationship(&leaf.relationship))?;
            let (to_many, ordered) = (relationship.is_to_many(), relationship.is_ordered());

            if !to_many {
                self.context
                    .set_to_one(leaf.source, &leaf.relationship, Some(target))?;
            } else if let (true, Some(position)) = (ordered, leaf.index) {
                self.context
                    .insert_to_many(leaf.source, &leaf.relationship, position, target)?;
            } else {
                self.context
                    .add_to_many(leaf.source, &leaf.relationship, target)?;
            }
        }
        Ok(())
    }
}

/// A record whose encoded entries are still being applied.
#[derive(Debug)]
struct Frame<'s, 'n> {
    record: RecordId,
    entity: &'s EntityDescription,
    entries: btree_map::Iter<'n, String, Node>,
    /// The to-many relationship being inflated and its remaining items.
    many: Option<(&'n str, Enumerate<slice::Iter<'n, Node>>)>,
}

/// How a nested record attaches to its parent.
#[derive(Debug, Clone, Copy)]
enum Link<'n> {
    One(&'n str),
    Many(&'n str),
}

fn malformed(entity: &EntityDescription, relationship: &str) -> InflateError {
    InflateError::MalformedRelationship {
        entity: entity.name().to_string(),
        relationship: relationship.to_string(),
    }
}

/// Inflates a batch of encoded records into `context`.
pub fn insert_objects(
    context: &mut Context,
    coder: &ValueCoder,
    nodes: &[Node],
) -> Result<Vec<RecordId>, InflateError> {
    Decoder::new(context, coder).insert_objects(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ContextError, SchemaError};
    use crate::model::{AttributeKind, Value, ARCHIVE_ID_KEY, ENTITY_KEY};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity("Folder", |e| {
                    e.attribute("name", AttributeKind::String)
                        .to_one("parent", "Folder", |r| r)
                        .ordered_to_many("children", "Folder", |r| r.cascade())
                })
                .entity("Tag", |e| {
                    e.attribute("label", AttributeKind::String)
                        .to_many("folders", "Folder", |r| r.always_archive())
                })
                .build()
                .unwrap(),
        )
    }

    fn record(entity: &str, id: &str) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert(ENTITY_KEY, entity);
        dict.insert(ARCHIVE_ID_KEY, id);
        dict
    }

    fn stub(key: &str, id: &str) -> Node {
        Node::Dictionary([(key, id)].into_iter().collect())
    }

    #[test]
    fn test_inflate_nested_tree() {
        let mut root = record("App.Folder", "R");
        root.insert("name", "root");
        let mut a = record("Folder", "A");
        a.insert("name", "a");
        let b = record("Folder", "B");
        root.insert("children", vec![Node::Dictionary(a), Node::Dictionary(b)]);

        let mut ctx = Context::new(schema());
        let roots = insert_objects(&mut ctx, &ValueCoder::new(), &[Node::Dictionary(root)]).unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(ctx.len(), 3);

        let children = ctx.to_many(roots[0], "children").unwrap().to_vec();
        assert_eq!(children.len(), 2);
        assert_eq!(ctx.attribute(children[0], "name").unwrap(), Some(&Value::from("a")));
        assert_eq!(ctx.to_one(children[1], "parent").unwrap(), Some(roots[0]));
    }

    #[test]
    fn test_ordered_leaf_lands_at_index() {
        // root.children = [X, <stub to Y>, Z] where Y is nested under another root
        let mut root = record("Folder", "R");
        let x = record("Folder", "X");
        let z = record("Folder", "Z");
        root.insert(
            "children",
            vec![Node::Dictionary(x), stub("children", "Y"), Node::Dictionary(z)],
        );
        let mut other = record("Tag", "T");
        let y = record("Folder", "Y");
        other.insert("folders", vec![Node::Dictionary(y)]);

        let mut ctx = Context::new(schema());
        let nodes = [Node::Dictionary(root), Node::Dictionary(other)];
        let roots = insert_objects(&mut ctx, &ValueCoder::new(), &nodes).unwrap();

        let tag_folders = ctx.to_many(roots[1], "folders").unwrap();
        let y_id = tag_folders[0];
        let children = ctx.to_many(roots[0], "children").unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(children[1], y_id);
        assert_eq!(ctx.to_one(y_id, "parent").unwrap(), Some(roots[0]));
    }

    #[test]
    fn test_to_one_stub_resolved() {
        let mut root = record("Folder", "R");
        let mut child = record("Folder", "C");
        child.insert("parent", "R");
        root.insert("children", vec![Node::Dictionary(child)]);

        let mut ctx = Context::new(schema());
        let roots = insert_objects(&mut ctx, &ValueCoder::new(), &[Node::Dictionary(root)]).unwrap();
        let children = ctx.to_many(roots[0], "children").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(ctx.to_one(children[0], "parent").unwrap(), Some(roots[0]));
    }

    #[test]
    fn test_missing_leaf_target_fails_batch() {
        let mut root = record("Folder", "R");
        root.insert("parent", "NOWHERE");

        let mut ctx = Context::new(schema());
        let err = insert_objects(&mut ctx, &ValueCoder::new(), &[Node::Dictionary(root)]).unwrap_err();
        assert!(matches!(err, InflateError::CorruptLeafNode { .. }));
        // no rollback
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_bad_attributes_and_unknown_keys_skipped() {
        let mut root = record("Folder", "R");
        root.insert("name", Node::Integer(5));
        root.insert("color", "blue");

        let mut ctx = Context::new(schema());
        let roots = insert_objects(&mut ctx, &ValueCoder::new(), &[Node::Dictionary(root)]).unwrap();
        assert_eq!(ctx.attribute(roots[0], "name").unwrap(), None);
    }

    #[test]
    fn test_structural_errors() {
        let mut ctx = Context::new(schema());
        let coder = ValueCoder::new();

        let err = insert_objects(&mut ctx, &coder, &[Node::Integer(1)]).unwrap_err();
        assert!(matches!(err, InflateError::MalformedNode { .. }));

        let mut wrong_shape = record("Folder", "R");
        wrong_shape.insert("children", Node::Integer(3));
        let err = insert_objects(&mut ctx, &coder, &[Node::Dictionary(wrong_shape)]).unwrap_err();
        assert!(matches!(err, InflateError::MalformedRelationship { .. }));

        let unknown = record("Nope", "N");
        let err = insert_objects(&mut ctx, &coder, &[Node::Dictionary(unknown)]).unwrap_err();
        assert!(matches!(err, InflateError::Schema(SchemaError::UnknownEntity { .. })));

        let nodes = [
            Node::Dictionary(record("Folder", "D")),
            Node::Dictionary(record("Folder", "D")),
        ];
        let err = insert_objects(&mut ctx, &coder, &nodes).unwrap_err();
        assert!(matches!(err, InflateError::DuplicateArchiveId { .. }));
    }

    #[test]
    fn test_stub_to_wrong_entity_rejected() {
        let mut root = record("Folder", "R");
        root.insert("parent", "T");
        let tag = record("Tag", "T");

        let mut ctx = Context::new(schema());
        let nodes = [Node::Dictionary(root), Node::Dictionary(tag)];
        let err = insert_objects(&mut ctx, &ValueCoder::new(), &nodes).unwrap_err();
        assert!(matches!(
            err,
            InflateError::Context(ContextError::EntityMismatch { .. })
        ));
    }

    #[test]
    fn test_batches_are_independent() {
        let mut ctx = Context::new(schema());
        let coder = ValueCoder::new();
        insert_objects(&mut ctx, &coder, &[Node::Dictionary(record("Folder", "R"))]).unwrap();

        // the identifier from the first batch is not visible to the second
        let mut second = record("Folder", "S");
        second.insert("parent", "R");
        let err = insert_objects(&mut ctx, &coder, &[Node::Dictionary(second)]).unwrap_err();
        assert!(matches!(err, InflateError::CorruptLeafNode { .. }));
    }

    /// A folder chain of `len` records, each nested in its parent's children.
    fn chain(len: usize) -> Node {
        let mut node = record("Folder", "F0");
        for i in 1..len {
            let mut parent = record("Folder", &format!("F{i}"));
            parent.insert("children", vec![Node::Dictionary(node)]);
            node = parent;
        }
        Node::Dictionary(node)
    }

    #[test]
    fn test_record_depth_on_small_stack() {
        std::thread::Builder::new()
            .stack_size(2 << 20)
            .spawn(|| {
                let coder = ValueCoder::new();
                let mut ctx = Context::new(schema());
                let roots = insert_objects(&mut ctx, &coder, &[chain(MAX_RECORD_DEPTH + 1)]).unwrap();
                assert_eq!(ctx.len(), MAX_RECORD_DEPTH + 1);
                let child = ctx.to_many(roots[0], "children").unwrap()[0];
                assert_eq!(ctx.to_one(child, "parent").unwrap(), Some(roots[0]));

                let mut ctx = Context::new(schema());
                let err = insert_objects(&mut ctx, &coder, &[chain(MAX_RECORD_DEPTH + 2)]).unwrap_err();
                assert!(matches!(err, InflateError::NestingTooDeep { .. }));
            })
            .unwrap()
            .join()
            .unwrap();
    }
}
