//! Typed value coder.
//!
//! Converts between a record's native [`Value`] and a storage-neutral
//! [`Node`] according to the attribute's declared [`AttributeKind`].
//! Transformable attributes delegate to a [`ValueTransformer`] registered on
//! the coder under the name the attribute declares.
//!
//! Attribute-level failures ([`AttributeError::InvalidValue`],
//! [`AttributeError::DataCorrupted`]) are recoverable: callers skip the
//! attribute and continue. Configuration failures are wrapped
//! [`SchemaError`]s and are fatal.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{AttributeError, SchemaError};
use crate::model::{AttributeDescription, AttributeKind, CustomValue, Node, Uri, Value};

/// A bidirectional conversion for transformable attributes.
pub trait ValueTransformer: Send + Sync {
    /// Converts a caller-defined value to a node, or `None` if the value is
    /// not one this transformer handles.
    fn transformed_value(&self, value: &dyn CustomValue) -> Option<Node>;

    /// Converts a stored node back, or `None` if the node is not valid input.
    fn reverse_transformed_value(&self, node: &Node) -> Option<Value>;
}

/// A [`ValueTransformer`] storing a `T` as a data node via two functions.
///
/// ```rust
/// use graph_archive::codec::FnTransformer;
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Rgb(u8, u8, u8);
///
/// let transformer = FnTransformer::new(
///     |c: &Rgb| vec![c.0, c.1, c.2],
///     |b: &[u8]| match b {
///         [r, g, b] => Some(Rgb(*r, *g, *b)),
///         _ => None,
///     },
/// );
/// # let _ = transformer;
/// ```
pub struct FnTransformer<T, E, D> {
    encode: E,
    decode: D,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E, D> FnTransformer<T, E, D>
where
    T: CustomValue + Clone,
    E: Fn(&T) -> Vec<u8> + Send + Sync,
    D: Fn(&[u8]) -> Option<T> + Send + Sync,
{
    pub fn new(encode: E, decode: D) -> Self {
        Self {
            encode,
            decode,
            _marker: PhantomData,
        }
    }
}

impl<T, E, D> ValueTransformer for FnTransformer<T, E, D>
where
    T: CustomValue + Clone,
    E: Fn(&T) -> Vec<u8> + Send + Sync,
    D: Fn(&[u8]) -> Option<T> + Send + Sync,
{
    fn transformed_value(&self, value: &dyn CustomValue) -> Option<Node> {
        let value = value.as_any().downcast_ref::<T>()?;
        Some(Node::Data((self.encode)(value)))
    }

    fn reverse_transformed_value(&self, node: &Node) -> Option<Value> {
        match node {
            Node::Data(bytes) => (self.decode)(bytes).map(Value::custom),
            _ => None,
        }
    }
}

/// Converts attribute values to and from nodes.
#[derive(Clone, Default)]
pub struct ValueCoder {
    transformers: FxHashMap<String, Arc<dyn ValueTransformer>>,
}

impl fmt::Debug for ValueCoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.transformers.keys().collect();
        names.sort();
        f.debug_struct("ValueCoder")
            .field("transformers", &names)
            .finish()
    }
}

impl ValueCoder {
    /// Creates a coder with no transformers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transformer under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, transformer: impl ValueTransformer + 'static) {
        self.transformers.insert(name.into(), Arc::new(transformer));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_transformer(
        mut self,
        name: impl Into<String>,
        transformer: impl ValueTransformer + 'static,
    ) -> Self {
        self.register(name, transformer);
        self
    }

    /// Checks that an attribute can be coded at all.
    pub fn check(&self, attribute: &AttributeDescription) -> Result<(), SchemaError> {
        if attribute.kind() == AttributeKind::Transformable {
            self.transformer(attribute)?;
        } else if !attribute.kind().is_supported() {
            return Err(SchemaError::UnsupportedAttributeKind {
                attribute: attribute.name().to_string(),
                kind: attribute.kind(),
            });
        }
        Ok(())
    }

    /// Encodes a native value for `attribute`.
    pub fn encode(
        &self,
        attribute: &AttributeDescription,
        value: &Value,
    ) -> Result<Node, AttributeError> {
        let invalid = || AttributeError::InvalidValue {
            attribute: attribute.name().to_string(),
            expected: attribute.kind(),
        };
        let node = match (attribute.kind(), value) {
            (AttributeKind::Int16, _) => {
                let v = integer(value).filter(|v| i16::try_from(*v).is_ok());
                Node::Integer(v.ok_or_else(invalid)?)
            }
            (AttributeKind::Int32, _) => {
                let v = integer(value).filter(|v| i32::try_from(*v).is_ok());
                Node::Integer(v.ok_or_else(invalid)?)
            }
            (AttributeKind::Int64, _) => Node::Integer(integer(value).ok_or_else(invalid)?),
            (AttributeKind::Decimal, Value::Decimal(d)) => Node::Decimal(d.clone()),
            (AttributeKind::Float, Value::Float(v)) => Node::Real(f64::from(*v)),
            (AttributeKind::Double, Value::Double(v)) => Node::Real(*v),
            (AttributeKind::String, Value::String(s)) => Node::String(s.clone()),
            (AttributeKind::Boolean, Value::Bool(b)) => Node::Bool(*b),
            (AttributeKind::Date, Value::Date(micros)) => Node::Date(*micros),
            (AttributeKind::Binary, Value::Binary(bytes)) => Node::Data(bytes.clone()),
            (AttributeKind::Uuid, Value::Uuid(id)) => Node::Uuid(*id),
            (AttributeKind::Uri, Value::Uri(uri)) => Node::String(uri.as_str().to_string()),
            (AttributeKind::Transformable, _) => {
                let transformer = self.transformer(attribute)?;
                let Value::Custom(custom) = value else {
                    return Err(invalid());
                };
                transformer
                    .transformed_value(&**custom)
                    .ok_or_else(invalid)?
            }
            (kind, _) if !kind.is_supported() => {
                return Err(SchemaError::UnsupportedAttributeKind {
                    attribute: attribute.name().to_string(),
                    kind,
                }
                .into());
            }
            _ => return Err(invalid()),
        };
        Ok(node)
    }

    /// Decodes a stored node for `attribute`.
    pub fn decode(&self, attribute: &AttributeDescription, node: &Node) -> Result<Value, AttributeError> {
        let corrupted = || AttributeError::DataCorrupted {
            attribute: attribute.name().to_string(),
        };
        let value = match (attribute.kind(), node) {
            (AttributeKind::Int16, Node::Integer(v)) => {
                Value::Int16(i16::try_from(*v).map_err(|_| corrupted())?)
            }
            (AttributeKind::Int32, Node::Integer(v)) => {
                Value::Int32(i32::try_from(*v).map_err(|_| corrupted())?)
            }
            (AttributeKind::Int64, Node::Integer(v)) => Value::Int64(*v),
            (AttributeKind::Decimal, Node::Decimal(d)) => Value::Decimal(d.clone()),
            (AttributeKind::Float, Node::Real(v)) => Value::Float(*v as f32),
            (AttributeKind::Double, Node::Real(v)) => Value::Double(*v),
            (AttributeKind::String, Node::String(s)) => Value::String(s.clone()),
            (AttributeKind::Boolean, Node::Bool(b)) => Value::Bool(*b),
            (AttributeKind::Date, Node::Date(micros)) => Value::Date(*micros),
            (AttributeKind::Binary, Node::Data(bytes)) => Value::Binary(bytes.clone()),
            (AttributeKind::Uuid, Node::Uuid(id)) => Value::Uuid(*id),
            (AttributeKind::Uri, Node::String(s)) => Value::Uri(Uri::parse(s).map_err(|_| corrupted())?),
            (AttributeKind::Transformable, _) => {
                let transformer = self.transformer(attribute)?;
                transformer
                    .reverse_transformed_value(node)
                    .ok_or_else(corrupted)?
            }
            (kind, _) if !kind.is_supported() => {
                return Err(SchemaError::UnsupportedAttributeKind {
                    attribute: attribute.name().to_string(),
                    kind,
                }
                .into());
            }
            _ => return Err(corrupted()),
        };
        Ok(value)
    }

    fn transformer(&self, attribute: &AttributeDescription) -> Result<&dyn ValueTransformer, SchemaError> {
        let name = attribute
            .transformer()
            .ok_or_else(|| SchemaError::MissingTransformer {
                attribute: attribute.name().to_string(),
            })?;
        self.transformers
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| SchemaError::UnregisteredTransformer {
                attribute: attribute.name().to_string(),
                transformer: name.to_string(),
            })
    }
}

/// Widens any native integer value.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int16(v) => Some(i64::from(*v)),
        Value::Int32(v) => Some(i64::from(*v)),
        Value::Int64(v) => Some(*v),
        _ => None,
    }
}
