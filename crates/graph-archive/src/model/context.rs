//! In-memory record store.
//!
//! A [`Context`] owns records of the entities declared in a [`Schema`] and
//! keeps both sides of every relationship with a known inverse consistent:
//! linking `a.detail = b` also sets `b.event = a`, and replacing a to-one
//! target unlinks the displaced record.
//!
//! Records inserted since the last [`Context::save`] are reported by
//! [`Context::inserted_objects`], which is how a decoder's results are found
//! after ingesting a batch.

use std::fmt;
use std::sync::Arc;

use crate::error::{ContextError, SchemaError};
use crate::model::{AttributeDescription, EntityDescription, Schema, Value};

/// Handle to a record in a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

impl RecordId {
    /// Position of the record in its context.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Current value of one relationship on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    One(Option<RecordId>),
    /// Members in order; unordered relationships keep insertion order.
    Many(Vec<RecordId>),
}

#[derive(Debug, Clone)]
struct Record {
    entity: usize,
    attributes: Vec<Option<Value>>,
    relations: Vec<Related>,
}

/// A store of records sharing one schema.
#[derive(Debug, Clone)]
pub struct Context {
    schema: Arc<Schema>,
    records: Vec<Record>,
    /// Records at or after this position have not been saved.
    saved: usize,
}

impl Context {
    /// Creates an empty context.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: Vec::new(),
            saved: 0,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if `id` names a record in this context.
    pub fn contains(&self, id: RecordId) -> bool {
        id.index() < self.records.len()
    }

    /// Creates a record of `entity` with every attribute unset.
    pub fn insert(&mut self, entity: &str) -> Result<RecordId, ContextError> {
        let index = self
            .schema
            .entity_index(entity)
            .ok_or_else(|| SchemaError::UnknownEntity {
                entity: entity.to_string(),
            })?;
        let description = &self.schema.entities()[index];
        let relations = description
            .relationships()
            .iter()
            .map(|r| {
                if r.is_to_many() {
                    Related::Many(Vec::new())
                } else {
                    Related::One(None)
                }
            })
            .collect();
        let record = Record {
            entity: index,
            attributes: vec![None; description.attributes().len()],
            relations,
        };
        let id = RecordId(self.records.len() as u32);
        self.records.push(record);
        Ok(id)
    }

    /// Records inserted since the last save, in insertion order.
    pub fn inserted_objects(&self) -> Vec<RecordId> {
        (self.saved..self.records.len())
            .map(|i| RecordId(i as u32))
            .collect()
    }

    /// Returns true if records were inserted since the last save.
    pub fn has_changes(&self) -> bool {
        self.saved < self.records.len()
    }

    /// Marks every record as saved.
    pub fn save(&mut self) {
        self.saved = self.records.len();
    }

    /// All records of `entity`, in insertion order.
    pub fn records_of(&self, entity: &str) -> Vec<RecordId> {
        let Some(index) = self.schema.entity_index(entity) else {
            return Vec::new();
        };
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.entity == index)
            .map(|(i, _)| RecordId(i as u32))
            .collect()
    }

    /// Entity description of a record.
    pub fn entity(&self, id: RecordId) -> Result<&EntityDescription, ContextError> {
        let record = self.record(id)?;
        Ok(&self.schema.entities()[record.entity])
    }

    /// Entity name of a record.
    pub fn entity_name(&self, id: RecordId) -> Result<&str, ContextError> {
        Ok(self.entity(id)?.name())
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Returns an attribute value, or `None` if it is unset.
    pub fn attribute(&self, id: RecordId, name: &str) -> Result<Option<&Value>, ContextError> {
        let record = self.record(id)?;
        let entity = &self.schema.entities()[record.entity];
        let index = entity
            .attribute_index(name)
            .ok_or_else(|| entity.unknown_attribute(name))?;
        Ok(record.attributes[index].as_ref())
    }

    /// Sets an attribute value.
    pub fn set_attribute(
        &mut self,
        id: RecordId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), ContextError> {
        let index = self.attribute_index(id, name)?;
        self.records[id.index()].attributes[index] = Some(value.into());
        Ok(())
    }

    /// Unsets an attribute.
    pub fn clear_attribute(&mut self, id: RecordId, name: &str) -> Result<(), ContextError> {
        let index = self.attribute_index(id, name)?;
        self.records[id.index()].attributes[index] = None;
        Ok(())
    }

    /// Set attributes of a record in schema order.
    pub fn attributes(
        &self,
        id: RecordId,
    ) -> Result<impl Iterator<Item = (&AttributeDescription, &Value)>, ContextError> {
        let record = self.record(id)?;
        let entity = &self.schema.entities()[record.entity];
        Ok(entity
            .attributes()
            .iter()
            .zip(&record.attributes)
            .filter_map(|(description, value)| value.as_ref().map(|v| (description, v))))
    }

    fn attribute_index(&self, id: RecordId, name: &str) -> Result<usize, ContextError> {
        let entity = self.entity(id)?;
        Ok(entity
            .attribute_index(name)
            .ok_or_else(|| entity.unknown_attribute(name))?)
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Current value of a relationship.
    pub fn related(&self, id: RecordId, name: &str) -> Result<&Related, ContextError> {
        let index = self.relationship_index(id, name)?;
        Ok(&self.records[id.index()].relations[index])
    }

    /// Target of a to-one relationship.
    pub fn to_one(&self, id: RecordId, name: &str) -> Result<Option<RecordId>, ContextError> {
        match self.related(id, name)? {
            Related::One(target) => Ok(*target),
            Related::Many(_) => Err(self.cardinality_error(id, name, "to-one")),
        }
    }

    /// Members of a to-many relationship.
    pub fn to_many(&self, id: RecordId, name: &str) -> Result<&[RecordId], ContextError> {
        match self.related(id, name)? {
            Related::Many(members) => Ok(members),
            Related::One(_) => Err(self.cardinality_error(id, name, "to-many")),
        }
    }

    /// Sets or clears a to-one relationship, maintaining its inverse.
    pub fn set_to_one(
        &mut self,
        id: RecordId,
        name: &str,
        target: Option<RecordId>,
    ) -> Result<(), ContextError> {
        let index = self.relationship_index(id, name)?;
        let current = match &self.records[id.index()].relations[index] {
            Related::One(current) => *current,
            Related::Many(_) => return Err(self.cardinality_error(id, name, "to-one")),
        };
        match target {
            Some(target) => {
                self.check_destination(id, index, target)?;
                self.link(id, index, target, None);
            }
            None => {
                if let Some(current) = current {
                    self.unlink(id, index, current);
                }
            }
        }
        Ok(())
    }

    /// Adds a member to a to-many relationship, maintaining its inverse.
    ///
    /// Adding an existing member is a no-op.
    pub fn add_to_many(
        &mut self,
        id: RecordId,
        name: &str,
        target: RecordId,
    ) -> Result<(), ContextError> {
        let index = self.to_many_index(id, name)?;
        self.check_destination(id, index, target)?;
        self.link(id, index, target, None);
        Ok(())
    }

    /// Places a member at `position` in a to-many relationship.
    ///
    /// Positions past the end append. An existing member is moved.
    pub fn insert_to_many(
        &mut self,
        id: RecordId,
        name: &str,
        position: usize,
        target: RecordId,
    ) -> Result<(), ContextError> {
        let index = self.to_many_index(id, name)?;
        self.check_destination(id, index, target)?;
        self.link(id, index, target, Some(position));
        Ok(())
    }

    /// Removes a member from a to-many relationship, maintaining its inverse.
    pub fn remove_to_many(
        &mut self,
        id: RecordId,
        name: &str,
        target: RecordId,
    ) -> Result<(), ContextError> {
        let index = self.to_many_index(id, name)?;
        self.record(target)?;
        self.unlink(id, index, target);
        Ok(())
    }

    pub(crate) fn related_at(&self, id: RecordId, index: usize) -> &Related {
        &self.records[id.index()].relations[index]
    }

    fn relationship_index(&self, id: RecordId, name: &str) -> Result<usize, ContextError> {
        let entity = self.entity(id)?;
        Ok(entity
            .relationship_index(name)
            .ok_or_else(|| entity.unknown_relationship(name))?)
    }

    fn to_many_index(&self, id: RecordId, name: &str) -> Result<usize, ContextError> {
        let index = self.relationship_index(id, name)?;
        match self.records[id.index()].relations[index] {
            Related::Many(_) => Ok(index),
            Related::One(_) => Err(self.cardinality_error(id, name, "to-many")),
        }
    }

    fn cardinality_error(&self, id: RecordId, name: &str, expected: &'static str) -> ContextError {
        let entity = self.entity_name(id).unwrap_or_default().to_string();
        SchemaError::CardinalityMismatch {
            entity,
            relationship: name.to_string(),
            expected,
        }
        .into()
    }

    fn check_destination(
        &self,
        id: RecordId,
        relationship: usize,
        target: RecordId,
    ) -> Result<(), ContextError> {
        let source = self.entity(id)?;
        let target_record = self.record(target)?;
        let description = &source.relationships()[relationship];
        if description.destination_index() != target_record.entity {
            return Err(ContextError::EntityMismatch {
                relationship: description.name().to_string(),
                expected: description.destination().to_string(),
                found: self.schema.entities()[target_record.entity].name().to_string(),
            });
        }
        Ok(())
    }

    fn record(&self, id: RecordId) -> Result<&Record, ContextError> {
        self.records
            .get(id.index())
            .ok_or(ContextError::UnknownRecord { record: id })
    }

    fn inverse_of(&self, id: RecordId, relationship: usize) -> Option<usize> {
        let entity = &self.schema.entities()[self.records[id.index()].entity];
        entity.relationships()[relationship].inverse()
    }

    /// Links `a.relationship` to `b` and `b`'s inverse back to `a`, unlinking
    /// whatever either to-one side displaced.
    fn link(&mut self, a: RecordId, relationship: usize, b: RecordId, position: Option<usize>) {
        let displaced = self.attach(a, relationship, b, position);
        let Some(inverse) = self.inverse_of(a, relationship) else {
            return;
        };
        if let Some(old) = displaced {
            self.detach(old, inverse, a);
        }
        if let Some(old) = self.attach(b, inverse, a, None) {
            self.detach(old, relationship, b);
        }
    }

    fn unlink(&mut self, a: RecordId, relationship: usize, b: RecordId) {
        self.detach(a, relationship, b);
        if let Some(inverse) = self.inverse_of(a, relationship) {
            self.detach(b, inverse, a);
        }
    }

    /// Adds `target` to one side only, returning a displaced to-one target.
    fn attach(
        &mut self,
        id: RecordId,
        relationship: usize,
        target: RecordId,
        position: Option<usize>,
    ) -> Option<RecordId> {
        match &mut self.records[id.index()].relations[relationship] {
            Related::One(slot) => slot.replace(target).filter(|old| *old != target),
            Related::Many(members) => {
                match position {
                    Some(position) => {
                        members.retain(|m| *m != target);
                        let position = position.min(members.len());
                        members.insert(position, target);
                    }
                    None => {
                        if !members.contains(&target) {
                            members.push(target);
                        }
                    }
                }
                None
            }
        }
    }

    /// Removes `target` from one side only.
    fn detach(&mut self, id: RecordId, relationship: usize, target: RecordId) {
        match &mut self.records[id.index()].relations[relationship] {
            Related::One(slot) => {
                if *slot == Some(target) {
                    *slot = None;
                }
            }
            Related::Many(members) => members.retain(|m| *m != target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttributeKind;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder()
                .entity("Event", |e| {
                    e.attribute("title", AttributeKind::String)
                        .to_one("detail", "Detail", |r| r.cascade())
                })
                .entity("Detail", |e| e.to_one("event", "Event", |r| r))
                .entity("Folder", |e| {
                    e.to_one("parent", "Folder", |r| r)
                        .ordered_to_many("children", "Folder", |r| r.cascade())
                })
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_attributes() {
        let mut ctx = Context::new(schema());
        let event = ctx.insert("Event").unwrap();
        assert_eq!(ctx.attribute(event, "title").unwrap(), None);

        ctx.set_attribute(event, "title", "Launch").unwrap();
        assert_eq!(ctx.attribute(event, "title").unwrap(), Some(&Value::from("Launch")));
        assert_eq!(ctx.attributes(event).unwrap().count(), 1);

        ctx.clear_attribute(event, "title").unwrap();
        assert_eq!(ctx.attributes(event).unwrap().count(), 0);

        assert!(ctx.set_attribute(event, "missing", 1i32).is_err());
    }

    #[test]
    fn test_to_one_inverse_maintained() {
        let mut ctx = Context::new(schema());
        let event = ctx.insert("Event").unwrap();
        let first = ctx.insert("Detail").unwrap();
        let second = ctx.insert("Detail").unwrap();

        ctx.set_to_one(event, "detail", Some(first)).unwrap();
        assert_eq!(ctx.to_one(first, "event").unwrap(), Some(event));

        ctx.set_to_one(event, "detail", Some(second)).unwrap();
        assert_eq!(ctx.to_one(second, "event").unwrap(), Some(event));
        assert_eq!(ctx.to_one(first, "event").unwrap(), None);

        ctx.set_to_one(second, "event", None).unwrap();
        assert_eq!(ctx.to_one(event, "detail").unwrap(), None);
    }

    #[test]
    fn test_to_many_inverse_maintained() {
        let mut ctx = Context::new(schema());
        let root = ctx.insert("Folder").unwrap();
        let other = ctx.insert("Folder").unwrap();
        let a = ctx.insert("Folder").unwrap();
        let b = ctx.insert("Folder").unwrap();

        ctx.add_to_many(root, "children", a).unwrap();
        ctx.add_to_many(root, "children", b).unwrap();
        ctx.add_to_many(root, "children", a).unwrap();
        assert_eq!(ctx.to_many(root, "children").unwrap(), &[a, b]);
        assert_eq!(ctx.to_one(b, "parent").unwrap(), Some(root));

        // reparenting through the to-one side moves the child
        ctx.set_to_one(a, "parent", Some(other)).unwrap();
        assert_eq!(ctx.to_many(root, "children").unwrap(), &[b]);
        assert_eq!(ctx.to_many(other, "children").unwrap(), &[a]);

        ctx.remove_to_many(root, "children", b).unwrap();
        assert_eq!(ctx.to_one(b, "parent").unwrap(), None);
    }

    #[test]
    fn test_insert_to_many_positions() {
        let mut ctx = Context::new(schema());
        let root = ctx.insert("Folder").unwrap();
        let a = ctx.insert("Folder").unwrap();
        let b = ctx.insert("Folder").unwrap();
        let c = ctx.insert("Folder").unwrap();

        ctx.insert_to_many(root, "children", 5, c).unwrap();
        ctx.insert_to_many(root, "children", 0, a).unwrap();
        ctx.insert_to_many(root, "children", 1, b).unwrap();
        assert_eq!(ctx.to_many(root, "children").unwrap(), &[a, b, c]);

        ctx.insert_to_many(root, "children", 0, c).unwrap();
        assert_eq!(ctx.to_many(root, "children").unwrap(), &[c, a, b]);
    }

    #[test]
    fn test_link_errors() {
        let mut ctx = Context::new(schema());
        let event = ctx.insert("Event").unwrap();
        let folder = ctx.insert("Folder").unwrap();

        let wrong = ctx.set_to_one(event, "detail", Some(folder));
        assert!(matches!(wrong, Err(ContextError::EntityMismatch { .. })));

        let cardinality = ctx.add_to_many(event, "detail", folder);
        assert!(matches!(
            cardinality,
            Err(ContextError::Schema(SchemaError::CardinalityMismatch { .. }))
        ));

        let missing = ctx.to_one(RecordId(99), "detail");
        assert!(matches!(missing, Err(ContextError::UnknownRecord { .. })));

        assert!(ctx.insert("Nope").is_err());
    }

    #[test]
    fn test_inserted_objects_and_save() {
        let mut ctx = Context::new(schema());
        let a = ctx.insert("Event").unwrap();
        assert_eq!(ctx.inserted_objects(), vec![a]);
        assert!(ctx.has_changes());

        ctx.save();
        assert!(ctx.inserted_objects().is_empty());

        let b = ctx.insert("Detail").unwrap();
        assert_eq!(ctx.inserted_objects(), vec![b]);
        assert_eq!(ctx.records_of("Event"), vec![a]);
        assert_eq!(ctx.len(), 2);
    }
}
