//! Entity schema: attributes, relationships and their inverses.
//!
//! A [`Schema`] is built once with [`SchemaBuilder`] and shared (behind an
//! `Arc`) by every context that holds records of its entities. Inverse
//! relationships are resolved when the schema is built, so linking two records
//! never scans relationships at runtime.
//!
//! # Example
//!
//! ```rust
//! use graph_archive::model::{AttributeKind, Schema};
//!
//! let schema = Schema::builder()
//!     .entity("Event", |e| e
//!         .attribute("timestamp", AttributeKind::Date)
//!         .to_one("detail", "Detail", |r| r.cascade()))
//!     .entity("Detail", |e| e
//!         .attribute("title", AttributeKind::String)
//!         .to_one("event", "Event", |r| r))
//!     .build()
//!     .unwrap();
//!
//! let event = schema.entity("Event").unwrap();
//! assert!(event.relationship("detail").unwrap().inverse().is_some());
//! ```

use rustc_hash::FxHashMap;

use crate::error::SchemaError;
use crate::model::node::is_reserved_key;
use crate::model::AttributeKind;

/// What happens to related records when the owner is deleted.
///
/// Only `Cascade` implies the owner controls the related records' lifecycle,
/// which is what makes a relationship archivable by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteRule {
    #[default]
    Nullify,
    Cascade,
    Deny,
    NoAction,
}

/// Per-relationship override of the archiving default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchivePolicy {
    /// Archive only if the delete rule is `Cascade`.
    #[default]
    Default,
    /// Archive even without cascade ownership.
    Always,
    /// Never archive, even with cascade ownership.
    Never,
}

/// Relationship cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany { ordered: bool },
}

/// An attribute definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescription {
    name: String,
    kind: AttributeKind,
    transformer: Option<String>,
}

impl AttributeDescription {
    /// Creates an attribute description.
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            transformer: None,
        }
    }

    /// Creates a transformable attribute using the named transformer.
    pub fn transformable(name: impl Into<String>, transformer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AttributeKind::Transformable,
            transformer: Some(transformer.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// Transformer name for transformable attributes.
    pub fn transformer(&self) -> Option<&str> {
        self.transformer.as_deref()
    }
}

/// A relationship definition with its resolved destination and inverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescription {
    name: String,
    destination: String,
    destination_index: usize,
    cardinality: Cardinality,
    delete_rule: DeleteRule,
    archive_policy: ArchivePolicy,
    declared_inverse: Option<String>,
    inverse: Option<usize>,
}

impl RelationshipDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Destination entity name.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Destination entity index in the schema.
    pub fn destination_index(&self) -> usize {
        self.destination_index
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToMany { .. })
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToMany { ordered: true })
    }

    pub fn delete_rule(&self) -> DeleteRule {
        self.delete_rule
    }

    pub fn archive_policy(&self) -> ArchivePolicy {
        self.archive_policy
    }

    /// Index of the inverse relationship on the destination entity.
    pub fn inverse(&self) -> Option<usize> {
        self.inverse
    }

    /// Returns true if the encoder follows this relationship.
    pub fn should_archive(&self) -> bool {
        match self.archive_policy {
            ArchivePolicy::Never => false,
            ArchivePolicy::Always => true,
            ArchivePolicy::Default => self.delete_rule == DeleteRule::Cascade,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Attribute(usize),
    Relationship(usize),
}

/// An entity definition.
#[derive(Debug, Clone)]
pub struct EntityDescription {
    name: String,
    attributes: Vec<AttributeDescription>,
    relationships: Vec<RelationshipDescription>,
    properties: FxHashMap<String, Property>,
}

impl EntityDescription {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    /// Relationships in declaration order.
    pub fn relationships(&self) -> &[RelationshipDescription] {
        &self.relationships
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        match self.properties.get(name)? {
            Property::Attribute(i) => Some(*i),
            Property::Relationship(_) => None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attribute_index(name).map(|i| &self.attributes[i])
    }

    pub fn relationship_index(&self, name: &str) -> Option<usize> {
        match self.properties.get(name)? {
            Property::Relationship(i) => Some(*i),
            Property::Attribute(_) => None,
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationship_index(name).map(|i| &self.relationships[i])
    }

    /// Returns true if `name` is a relationship of this entity.
    pub fn is_relationship(&self, name: &str) -> bool {
        self.relationship_index(name).is_some()
    }

    pub(crate) fn unknown_attribute(&self, attribute: &str) -> SchemaError {
        SchemaError::UnknownAttribute {
            entity: self.name.clone(),
            attribute: attribute.to_string(),
        }
    }

    pub(crate) fn unknown_relationship(&self, relationship: &str) -> SchemaError {
        SchemaError::UnknownRelationship {
            entity: self.name.clone(),
            relationship: relationship.to_string(),
        }
    }
}

/// A validated set of entity definitions.
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<EntityDescription>,
    by_name: FxHashMap<String, usize>,
}

impl Schema {
    /// Starts building a schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    /// All entities in declaration order.
    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }

    pub fn entity_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entity_index(name).map(|i| &self.entities[i])
    }

    pub fn entity_at(&self, index: usize) -> Option<&EntityDescription> {
        self.entities.get(index)
    }

    /// Looks up an entity, failing with [`SchemaError::UnknownEntity`].
    pub fn require_entity(&self, name: &str) -> Result<&EntityDescription, SchemaError> {
        self.entity(name).ok_or_else(|| SchemaError::UnknownEntity {
            entity: name.to_string(),
        })
    }
}

/// Builder for an entity's properties.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    name: String,
    attributes: Vec<AttributeDescription>,
    relationships: Vec<RelationshipBuilder>,
}

impl EntityBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Adds an attribute.
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDescription::new(name, kind));
        self
    }

    /// Adds a transformable attribute coded by the named transformer.
    pub fn transformable(mut self, name: impl Into<String>, transformer: impl Into<String>) -> Self {
        self.attributes
            .push(AttributeDescription::transformable(name, transformer));
        self
    }

    /// Adds a to-one relationship.
    pub fn to_one<F>(self, name: impl Into<String>, destination: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(RelationshipBuilder) -> RelationshipBuilder,
    {
        self.relationship(name, destination, Cardinality::ToOne, f)
    }

    /// Adds an unordered to-many relationship.
    pub fn to_many<F>(self, name: impl Into<String>, destination: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(RelationshipBuilder) -> RelationshipBuilder,
    {
        self.relationship(name, destination, Cardinality::ToMany { ordered: false }, f)
    }

    /// Adds an ordered to-many relationship.
    pub fn ordered_to_many<F>(self, name: impl Into<String>, destination: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(RelationshipBuilder) -> RelationshipBuilder,
    {
        self.relationship(name, destination, Cardinality::ToMany { ordered: true }, f)
    }

    fn relationship<F>(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        cardinality: Cardinality,
        f: F,
    ) -> Self
    where
        F: FnOnce(RelationshipBuilder) -> RelationshipBuilder,
    {
        let builder = f(RelationshipBuilder {
            name: name.into(),
            destination: destination.into(),
            cardinality,
            delete_rule: DeleteRule::default(),
            archive_policy: ArchivePolicy::default(),
            inverse: None,
        });
        self.relationships.push(builder);
        self
    }
}

/// Builder for one relationship's options.
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    name: String,
    destination: String,
    cardinality: Cardinality,
    delete_rule: DeleteRule,
    archive_policy: ArchivePolicy,
    inverse: Option<String>,
}

impl RelationshipBuilder {
    /// Sets the delete rule.
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }

    /// Shorthand for `delete_rule(DeleteRule::Cascade)`.
    pub fn cascade(self) -> Self {
        self.delete_rule(DeleteRule::Cascade)
    }

    /// Names the inverse relationship on the destination entity explicitly.
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    /// Archives this relationship even without cascade ownership.
    pub fn always_archive(mut self) -> Self {
        self.archive_policy = ArchivePolicy::Always;
        self
    }

    /// Never archives this relationship.
    pub fn never_archive(mut self) -> Self {
        self.archive_policy = ArchivePolicy::Never;
        self
    }
}

/// Builder for a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityBuilder>,
}

impl SchemaBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity using a builder function.
    pub fn entity<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(EntityBuilder) -> EntityBuilder,
    {
        self.entities.push(f(EntityBuilder::new(name.into())));
        self
    }

    /// Validates the definitions and resolves destinations and inverses.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut by_name = FxHashMap::default();
        for (i, e) in self.entities.iter().enumerate() {
            if by_name.insert(e.name.clone(), i).is_some() {
                return Err(SchemaError::DuplicateEntity {
                    entity: e.name.clone(),
                });
            }
        }

        let mut entities = Vec::with_capacity(self.entities.len());
        for e in self.entities {
            let mut properties = FxHashMap::default();
            let names = e
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .chain(e.relationships.iter().map(|r| r.name.as_str()));
            for name in names {
                if is_reserved_key(name) {
                    return Err(SchemaError::ReservedKey {
                        entity: e.name.clone(),
                        property: name.to_string(),
                    });
                }
                if properties.contains_key(name) {
                    return Err(SchemaError::DuplicateProperty {
                        entity: e.name.clone(),
                        property: name.to_string(),
                    });
                }
                properties.insert(name.to_string(), Property::Attribute(0));
            }
            for (i, a) in e.attributes.iter().enumerate() {
                properties.insert(a.name.clone(), Property::Attribute(i));
            }

            let mut relationships = Vec::with_capacity(e.relationships.len());
            for (i, r) in e.relationships.into_iter().enumerate() {
                let destination_index =
                    *by_name
                        .get(&r.destination)
                        .ok_or_else(|| SchemaError::UnknownDestination {
                            entity: e.name.clone(),
                            relationship: r.name.clone(),
                            destination: r.destination.clone(),
                        })?;
                properties.insert(r.name.clone(), Property::Relationship(i));
                relationships.push(RelationshipDescription {
                    name: r.name,
                    destination: r.destination,
                    destination_index,
                    cardinality: r.cardinality,
                    delete_rule: r.delete_rule,
                    archive_policy: r.archive_policy,
                    declared_inverse: r.inverse,
                    inverse: None,
                });
            }

            entities.push(EntityDescription {
                name: e.name,
                attributes: e.attributes,
                relationships,
                properties,
            });
        }

        let mut resolved = Vec::new();
        for (ei, entity) in entities.iter().enumerate() {
            for ri in 0..entity.relationships.len() {
                let inverse = resolve_inverse(&entities, ei, ri)?;
                resolved.push((ei, ri, inverse));
            }
        }
        check_inverses_pair_up(&entities, &resolved)?;
        for (ei, ri, inverse) in resolved {
            entities[ei].relationships[ri].inverse = inverse;
        }

        Ok(Schema { entities, by_name })
    }
}

/// Finds the inverse of `entities[ei].relationships[ri]`.
///
/// A declared inverse must exist and point back. Otherwise the destination's
/// relationships back to the source entity are candidates, skipping the
/// relationship itself, candidates that declare a different inverse, and
/// candidates another relationship of the source entity declares as its
/// inverse. More than one remaining candidate is ambiguous.
fn resolve_inverse(
    entities: &[EntityDescription],
    ei: usize,
    ri: usize,
) -> Result<Option<usize>, SchemaError> {
    let entity = &entities[ei];
    let rel = &entity.relationships[ri];
    let destination = &entities[rel.destination_index];

    if let Some(name) = &rel.declared_inverse {
        let index = destination
            .relationship_index(name)
            .ok_or_else(|| SchemaError::UnknownInverse {
                entity: entity.name.clone(),
                relationship: rel.name.clone(),
                inverse: name.clone(),
            })?;
        let inverse = &destination.relationships[index];
        let points_back = inverse.destination_index == ei
            && inverse
                .declared_inverse
                .as_ref()
                .is_none_or(|back| *back == rel.name);
        if !points_back {
            return Err(SchemaError::InverseMismatch {
                entity: entity.name.clone(),
                relationship: rel.name.clone(),
                inverse: name.clone(),
            });
        }
        return Ok(Some(index));
    }

    let candidates: Vec<usize> = destination
        .relationships
        .iter()
        .enumerate()
        .filter(|(i, r)| r.destination_index == ei && !(rel.destination_index == ei && *i == ri))
        .filter(|(_, r)| r.declared_inverse.as_ref().is_none_or(|back| *back == rel.name))
        .filter(|(_, r)| {
            !entity.relationships.iter().enumerate().any(|(j, other)| {
                j != ri
                    && other.destination_index == rel.destination_index
                    && other.declared_inverse.as_deref() == Some(r.name.as_str())
            })
        })
        .map(|(i, _)| i)
        .collect();

    if let Some(&explicit) = candidates.iter().find(|&&i| {
        destination.relationships[i].declared_inverse.as_deref() == Some(rel.name.as_str())
    }) {
        return Ok(Some(explicit));
    }

    match candidates.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(*single)),
        _ => Err(SchemaError::AmbiguousInverse {
            entity: entity.name.clone(),
            relationship: rel.name.clone(),
            candidates: candidates
                .iter()
                .map(|&i| destination.relationships[i].name.clone())
                .collect(),
        }),
    }
}

/// Fails unless every resolved inverse resolves back to its relationship.
fn check_inverses_pair_up(
    entities: &[EntityDescription],
    resolved: &[(usize, usize, Option<usize>)],
) -> Result<(), SchemaError> {
    for &(ei, ri, inverse) in resolved {
        let Some(inverse) = inverse else {
            continue;
        };
        let rel = &entities[ei].relationships[ri];
        let di = rel.destination_index;
        let back = resolved
            .iter()
            .find(|(e, r, _)| *e == di && *r == inverse)
            .and_then(|(_, _, back)| *back);
        if back != Some(ri) {
            return Err(SchemaError::InverseMismatch {
                entity: entities[ei].name.clone(),
                relationship: rel.name.clone(),
                inverse: entities[di].relationships[inverse].name.clone(),
            });
        }
    }
    Ok(())
}
