//! Native attribute values and attribute kinds.
//!
//! A [`Value`] is what a record holds in memory. The value coder converts it
//! to and from a storage-neutral [`Node`](crate::model::Node) according to the
//! attribute's declared [`AttributeKind`].

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Declared kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Int16,
    Int32,
    Int64,
    Decimal,
    Float,
    Double,
    String,
    Boolean,
    /// Microseconds since the Unix epoch.
    Date,
    Binary,
    Uuid,
    Uri,
    /// Converted by a named, caller-registered transformer.
    Transformable,
    /// Placeholder kind with no coding; fatal if a value is ever coded.
    Undefined,
    /// Store-internal object identifiers; never archivable.
    ObjectId,
}

impl AttributeKind {
    /// Returns true if the value coder can handle this kind.
    pub fn is_supported(self) -> bool {
        !matches!(self, AttributeKind::Undefined | AttributeKind::ObjectId)
    }
}

/// Decimal mantissa representation.
///
/// Most decimals fit in i64; larger values use big-endian two's complement bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecimalMantissa {
    /// Mantissa fits in signed 64-bit integer.
    I64(i64),
    /// Arbitrary precision: big-endian two's complement, minimal-length.
    Big(Vec<u8>),
}

impl DecimalMantissa {
    /// Returns true if this is the zero mantissa.
    pub fn is_zero(&self) -> bool {
        match self {
            DecimalMantissa::I64(v) => *v == 0,
            DecimalMantissa::Big(bytes) => bytes.iter().all(|b| *b == 0),
        }
    }

    /// Returns whether this mantissa is a non-zero multiple of ten.
    pub fn has_trailing_zeros(&self) -> bool {
        match self {
            DecimalMantissa::I64(v) => *v != 0 && *v % 10 == 0,
            DecimalMantissa::Big(bytes) => !self.is_zero() && big_mantissa_mod_10(bytes) == 0,
        }
    }

    /// Returns false if big-endian bytes carry a redundant sign-extension byte.
    pub fn is_minimal(&self) -> bool {
        match self {
            DecimalMantissa::I64(_) => true,
            DecimalMantissa::Big(bytes) => match bytes.as_slice() {
                [] => false,
                [first, second, ..] => {
                    !((*first == 0x00 && second & 0x80 == 0) || (*first == 0xFF && second & 0x80 != 0))
                }
                [_] => true,
            },
        }
    }
}

/// Computes |x| mod 10 for a big-endian two's complement integer.
///
/// Since 256 mod 10 = 6, the remainder folds as `(r * 6 + byte) mod 10`. For a
/// negative x, |x| = !x + 1, so the inverted bytes are folded and one is added.
fn big_mantissa_mod_10(bytes: &[u8]) -> u32 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut remainder = 0u32;
    for &byte in bytes {
        let byte = if negative { !byte } else { byte };
        remainder = (remainder * 6 + byte as u32) % 10;
    }
    if negative { (remainder + 1) % 10 } else { remainder }
}

/// Arbitrary-precision decimal: value = mantissa * 10^exponent.
///
/// Always normalized: a non-zero mantissa has no trailing decimal zeros, and
/// zero is `{0, 0}`. This gives every value exactly one stored form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal {
    exponent: i32,
    mantissa: DecimalMantissa,
}

impl Decimal {
    /// Creates a normalized decimal from an i64 mantissa and exponent.
    pub fn new(mut mantissa: i64, mut exponent: i32) -> Self {
        if mantissa == 0 {
            return Self::zero();
        }
        while mantissa % 10 == 0 && exponent < i32::MAX {
            mantissa /= 10;
            exponent += 1;
        }
        Self {
            exponent,
            mantissa: DecimalMantissa::I64(mantissa),
        }
    }

    /// The zero decimal.
    pub fn zero() -> Self {
        Self {
            exponent: 0,
            mantissa: DecimalMantissa::I64(0),
        }
    }

    /// Creates a decimal from parts, returning None unless they are already
    /// normalized and minimal.
    pub fn from_parts(mantissa: DecimalMantissa, exponent: i32) -> Option<Self> {
        let decimal = Self { exponent, mantissa };
        decimal.is_normalized().then_some(decimal)
    }

    /// Returns the base-10 exponent.
    pub fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Returns the mantissa.
    pub fn mantissa(&self) -> &DecimalMantissa {
        &self.mantissa
    }

    /// Returns true if this decimal satisfies the normalization rules.
    pub fn is_normalized(&self) -> bool {
        if !self.mantissa.is_minimal() {
            return false;
        }
        if self.mantissa.is_zero() {
            self.exponent == 0
        } else {
            !self.mantissa.has_trailing_zeros()
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mantissa {
            DecimalMantissa::I64(m) => write!(f, "{m}e{}", self.exponent),
            DecimalMantissa::Big(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                write!(f, "e{}", self.exponent)
            }
        }
    }
}

/// Error returned when a string is not an absolute URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid URI: {0:?}")]
pub struct InvalidUri(pub String);

/// An absolute URI (`scheme:rest`), stored in archives as its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri(String);

impl Uri {
    /// Parses an absolute URI.
    ///
    /// The scheme must start with an ASCII letter followed by letters, digits,
    /// `+`, `-` or `.`, and the URI may not contain whitespace or control
    /// characters.
    pub fn parse(s: &str) -> Result<Self, InvalidUri> {
        let invalid = || InvalidUri(s.to_string());
        let (scheme, _) = s.split_once(':').ok_or_else(invalid)?;
        let mut chars = scheme.chars();
        if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
            return Err(invalid());
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
            return Err(invalid());
        }
        if s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(invalid());
        }
        Ok(Uri(s.to_string()))
    }

    /// Returns the URI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the scheme component.
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(scheme, _)| scheme).unwrap_or_default()
    }
}

impl FromStr for Uri {
    type Err = InvalidUri;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uri::parse(s)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A caller-defined value held by a transformable attribute.
///
/// Implemented automatically for every `Clone + PartialEq + Debug` type, so
/// application types can be stored with [`Value::custom`] and read back with
/// [`Value::downcast_ref`].
pub trait CustomValue: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn CustomValue>;
    fn eq_dyn(&self, other: &dyn CustomValue) -> bool;
}

impl<T> CustomValue for T
where
    T: Any + fmt::Debug + Clone + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn CustomValue> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn CustomValue) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| o == self)
    }
}

/// A native attribute value.
#[derive(Debug)]
pub enum Value {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Decimal(Decimal),
    Float(f32),
    Double(f64),
    String(String),
    Bool(bool),
    /// Microseconds since the Unix epoch (1970-01-01T00:00:00Z).
    Date(i64),
    Binary(Vec<u8>),
    Uuid(Uuid),
    Uri(Uri),
    /// Caller-defined value for a transformable attribute.
    Custom(Box<dyn CustomValue>),
}

impl Value {
    /// Wraps a caller-defined value.
    pub fn custom<T: CustomValue>(value: T) -> Self {
        Value::Custom(Box::new(value))
    }

    /// Returns the caller-defined value if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Custom(v) => v.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns the attribute kind this value naturally belongs to.
    pub fn kind(&self) -> AttributeKind {
        match self {
            Value::Int16(_) => AttributeKind::Int16,
            Value::Int32(_) => AttributeKind::Int32,
            Value::Int64(_) => AttributeKind::Int64,
            Value::Decimal(_) => AttributeKind::Decimal,
            Value::Float(_) => AttributeKind::Float,
            Value::Double(_) => AttributeKind::Double,
            Value::String(_) => AttributeKind::String,
            Value::Bool(_) => AttributeKind::Boolean,
            Value::Date(_) => AttributeKind::Date,
            Value::Binary(_) => AttributeKind::Binary,
            Value::Uuid(_) => AttributeKind::Uuid,
            Value::Uri(_) => AttributeKind::Uri,
            Value::Custom(_) => AttributeKind::Transformable,
        }
    }

    /// Returns the string if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Int16(v) => Value::Int16(*v),
            Value::Int32(v) => Value::Int32(*v),
            Value::Int64(v) => Value::Int64(*v),
            Value::Decimal(v) => Value::Decimal(v.clone()),
            Value::Float(v) => Value::Float(*v),
            Value::Double(v) => Value::Double(*v),
            Value::String(v) => Value::String(v.clone()),
            Value::Bool(v) => Value::Bool(*v),
            Value::Date(v) => Value::Date(*v),
            Value::Binary(v) => Value::Binary(v.clone()),
            Value::Uuid(v) => Value::Uuid(*v),
            Value::Uri(v) => Value::Uri(v.clone()),
            Value::Custom(v) => Value::Custom(v.clone_box()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Uri(a), Value::Uri(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => a.eq_dyn(&**b),
            _ => false,
        }
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int16(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<Uri> for Value {
    fn from(v: Uri) -> Self {
        Value::Uri(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Rgba(u8, u8, u8, u8);

    #[test]
    fn test_decimal_normalization() {
        let d = Decimal::new(12500, -4);
        assert_eq!(d.mantissa(), &DecimalMantissa::I64(125));
        assert_eq!(d.exponent(), -2);
        assert!(d.is_normalized());

        assert_eq!(Decimal::new(0, 7), Decimal::zero());
        assert_eq!(Decimal::new(-30, 0).mantissa(), &DecimalMantissa::I64(-3));
    }

    #[test]
    fn test_decimal_from_parts_rejects_unnormalized() {
        assert!(Decimal::from_parts(DecimalMantissa::I64(1230), 0).is_none());
        assert!(Decimal::from_parts(DecimalMantissa::I64(0), 1).is_none());
        assert!(Decimal::from_parts(DecimalMantissa::I64(123), -1).is_some());
    }

    #[test]
    fn test_big_mantissa_rules() {
        // 0x00 0x7F has a redundant sign byte
        assert!(!DecimalMantissa::Big(vec![0x00, 0x7F]).is_minimal());
        assert!(DecimalMantissa::Big(vec![0x00, 0x80]).is_minimal());
        // 0x01 0x00 = 256, not divisible by 10
        assert!(!DecimalMantissa::Big(vec![0x01, 0x00]).has_trailing_zeros());
        // 0x01 0x2C = 300
        assert!(DecimalMantissa::Big(vec![0x01, 0x2C]).has_trailing_zeros());
        // 0xFF 0x9C = -100
        assert!(DecimalMantissa::Big(vec![0xFF, 0x9C]).has_trailing_zeros());
        // 0xFF 0x9D = -99
        assert!(!DecimalMantissa::Big(vec![0xFF, 0x9D]).has_trailing_zeros());
    }

    #[test]
    fn test_uri_parse() {
        let uri = Uri::parse("https://example.com/a?b=c").unwrap();
        assert_eq!(uri.scheme(), "https");
        assert_eq!(uri.to_string(), "https://example.com/a?b=c");

        assert!(Uri::parse("mailto:someone@example.com").is_ok());
        assert!(Uri::parse("no scheme here").is_err());
        assert!(Uri::parse("1http://x").is_err());
        assert!(Uri::parse("http://has space").is_err());
        assert!("urn:isbn:0451450523".parse::<Uri>().is_ok());
    }

    #[test]
    fn test_custom_value_equality() {
        let a = Value::custom(Rgba(1, 2, 3, 255));
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::custom(Rgba(1, 2, 3, 0)));
        assert_ne!(a, Value::custom("not a color".to_string()));
        assert_eq!(b.downcast_ref::<Rgba>(), Some(&Rgba(1, 2, 3, 255)));
        assert_eq!(b.kind(), AttributeKind::Transformable);
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::from(3i16).kind(), AttributeKind::Int16);
        assert_eq!(Value::from(3.0f32).kind(), AttributeKind::Float);
        assert_eq!(Value::Date(0).kind(), AttributeKind::Date);
        assert_ne!(Value::Int32(1), Value::Int64(1));
        assert!(!AttributeKind::Undefined.is_supported());
    }
}
