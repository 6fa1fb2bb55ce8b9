//! Tagged node encoding.
//!
//! Every [`Node`] is written as a one-byte tag followed by its payload:
//!
//! | Tag  | Node       | Payload                                             |
//! |------|------------|-----------------------------------------------------|
//! | 0x01 | Bool       | 0x00 or 0x01                                        |
//! | 0x02 | Integer    | signed varint                                       |
//! | 0x03 | Real       | f64 little-endian                                   |
//! | 0x04 | Decimal    | exponent varint, mantissa type, mantissa            |
//! | 0x05 | String     | length-prefixed UTF-8                               |
//! | 0x06 | Data       | length-prefixed bytes                               |
//! | 0x07 | Date       | signed varint, microseconds since the Unix epoch    |
//! | 0x08 | Uuid       | 16 bytes                                            |
//! | 0x09 | Array      | count varint, nodes                                 |
//! | 0x0A | Dictionary | count varint, (key string, node) in key order       |
//!
//! Dictionary keys must be strictly increasing, so every dictionary has
//! exactly one encoding.

use std::collections::btree_map;

use crate::codec::primitives::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{
    MAX_ARRAY_LEN, MAX_BYTES_LEN, MAX_DECIMAL_BYTES, MAX_DICT_ENTRIES, MAX_NESTING_DEPTH,
    MAX_STRING_LEN,
};
use crate::model::{Decimal, DecimalMantissa, Dictionary, Node};

const TAG_BOOL: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_REAL: u8 = 0x03;
const TAG_DECIMAL: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_DATA: u8 = 0x06;
const TAG_DATE: u8 = 0x07;
const TAG_UUID: u8 = 0x08;
const TAG_ARRAY: u8 = 0x09;
const TAG_DICTIONARY: u8 = 0x0A;

const MANTISSA_I64: u8 = 0x00;
const MANTISSA_BIG: u8 = 0x01;

// =============================================================================
// DECODING
// =============================================================================

/// Decodes one node.
///
/// Containers are read from an explicit stack, so nesting up to
/// [`MAX_NESTING_DEPTH`] does not grow the call stack.
pub fn decode_node(reader: &mut Reader<'_>) -> Result<Node, DecodeError> {
    let mut open: Vec<Open> = Vec::new();
    loop {
        let mut done = match reader.read_byte("node.tag")? {
            TAG_ARRAY => {
                enter(open.len())?;
                let count = reader.read_length(MAX_ARRAY_LEN, "array")?;
                // Every item takes at least two bytes.
                let items = Vec::with_capacity(count.min(reader.remaining_len() / 2));
                open.push(Open::Array {
                    items,
                    remaining: count,
                });
                None
            }
            TAG_DICTIONARY => {
                enter(open.len())?;
                let count = reader.read_length(MAX_DICT_ENTRIES, "dictionary")?;
                open.push(Open::Dictionary {
                    dict: Dictionary::new(),
                    remaining: count,
                    key: String::new(),
                });
                None
            }
            tag => Some(decode_scalar(reader, tag)?),
        };

        while let Some(top) = open.last_mut() {
            if let Some(node) = done.take() {
                top.push(node);
            }
            if top.remaining() > 0 {
                top.read_key(reader)?;
                break;
            }
            done = open.pop().map(Open::close);
        }

        if let Some(node) = done {
            return Ok(node);
        }
    }
}

/// A container whose items are still being read.
#[derive(Debug)]
enum Open {
    Array {
        items: Vec<Node>,
        remaining: usize,
    },
    Dictionary {
        dict: Dictionary,
        remaining: usize,
        /// Key of the value being read.
        key: String,
    },
}

impl Open {
    fn remaining(&self) -> usize {
        match self {
            Open::Array { remaining, .. } | Open::Dictionary { remaining, .. } => *remaining,
        }
    }

    fn push(&mut self, node: Node) {
        match self {
            Open::Array { items, remaining } => {
                items.push(node);
                *remaining -= 1;
            }
            Open::Dictionary { dict, remaining, key } => {
                dict.insert(std::mem::take(key), node);
                *remaining -= 1;
            }
        }
    }

    /// Reads the next dictionary key. Arrays have none.
    fn read_key(&mut self, reader: &mut Reader<'_>) -> Result<(), DecodeError> {
        if let Open::Dictionary { dict, key, .. } = self {
            let next = reader.read_string(MAX_STRING_LEN, "dictionary.key")?;
            if dict.last_key().is_some_and(|previous| previous >= next.as_str()) {
                return Err(DecodeError::UnsortedKey { key: next });
            }
            *key = next;
        }
        Ok(())
    }

    fn close(self) -> Node {
        match self {
            Open::Array { items, .. } => Node::Array(items),
            Open::Dictionary { dict, .. } => Node::Dictionary(dict),
        }
    }
}

fn decode_scalar(reader: &mut Reader<'_>, tag: u8) -> Result<Node, DecodeError> {
    match tag {
        TAG_BOOL => match reader.read_byte("bool")? {
            0x00 => Ok(Node::Bool(false)),
            0x01 => Ok(Node::Bool(true)),
            value => Err(DecodeError::InvalidBool { value }),
        },
        TAG_INTEGER => Ok(Node::Integer(reader.read_signed_varint("integer")?)),
        TAG_REAL => Ok(Node::Real(reader.read_f64("real")?)),
        TAG_DECIMAL => Ok(Node::Decimal(decode_decimal(reader)?)),
        TAG_STRING => Ok(Node::String(reader.read_string(MAX_STRING_LEN, "string")?)),
        TAG_DATA => Ok(Node::Data(reader.read_bytes_prefixed(MAX_BYTES_LEN, "data")?)),
        TAG_DATE => Ok(Node::Date(reader.read_signed_varint("date")?)),
        TAG_UUID => Ok(Node::Uuid(reader.read_uuid("uuid")?)),
        tag => Err(DecodeError::InvalidTag { tag }),
    }
}

fn decode_decimal(reader: &mut Reader<'_>) -> Result<Decimal, DecodeError> {
    let exponent = reader.read_signed_varint("decimal.exponent")?;
    let exponent = i32::try_from(exponent).map_err(|_| DecodeError::DecimalNotNormalized)?;
    let mantissa = match reader.read_byte("decimal.mantissa_type")? {
        MANTISSA_I64 => DecimalMantissa::I64(reader.read_signed_varint("decimal.mantissa")?),
        MANTISSA_BIG => {
            let bytes = reader.read_bytes_prefixed(MAX_DECIMAL_BYTES, "decimal.mantissa_bytes")?;
            DecimalMantissa::Big(bytes)
        }
        kind => return Err(DecodeError::InvalidMantissaType { kind }),
    };
    if !mantissa.is_minimal() {
        return Err(DecodeError::DecimalMantissaNotMinimal);
    }
    Decimal::from_parts(mantissa, exponent).ok_or(DecodeError::DecimalNotNormalized)
}

/// Fails if opening one more container inside `open` exceeds the limit.
fn enter(open: usize) -> Result<(), DecodeError> {
    if open >= MAX_NESTING_DEPTH {
        return Err(DecodeError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    Ok(())
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encodes one node.
pub fn encode_node(writer: &mut Writer, node: &Node) -> Result<(), EncodeError> {
    let mut open = Vec::new();
    write_node(writer, node, &mut open)?;
    drain(writer, open)
}

/// Encodes a dictionary node, tag included.
pub fn encode_dictionary(writer: &mut Writer, dict: &Dictionary) -> Result<(), EncodeError> {
    let mut open = Vec::new();
    open_dictionary(writer, dict, &mut open)?;
    drain(writer, open)
}

/// A container whose items are still being written.
enum Pending<'a> {
    Array(std::slice::Iter<'a, Node>),
    Dictionary(btree_map::Iter<'a, String, Node>),
}

/// Writes the remaining items of every open container, innermost first.
fn drain<'a>(writer: &mut Writer, mut open: Vec<Pending<'a>>) -> Result<(), EncodeError> {
    while let Some(top) = open.last_mut() {
        let next = match top {
            Pending::Array(items) => items.next(),
            Pending::Dictionary(entries) => match entries.next() {
                Some((key, value)) => {
                    check_len("dictionary.key", key.len(), MAX_STRING_LEN)?;
                    writer.write_string(key);
                    Some(value)
                }
                None => None,
            },
        };
        match next {
            Some(node) => write_node(writer, node, &mut open)?,
            None => {
                open.pop();
            }
        }
    }
    Ok(())
}

/// Writes a scalar in full, or a container header pushing the container
/// onto `open`.
fn write_node<'a>(writer: &mut Writer, node: &'a Node, open: &mut Vec<Pending<'a>>) -> Result<(), EncodeError> {
    match node {
        Node::Bool(v) => {
            writer.write_byte(TAG_BOOL);
            writer.write_byte(u8::from(*v));
        }
        Node::Integer(v) => {
            writer.write_byte(TAG_INTEGER);
            writer.write_signed_varint(*v);
        }
        Node::Real(v) => {
            writer.write_byte(TAG_REAL);
            writer.write_f64(*v);
        }
        Node::Decimal(d) => {
            writer.write_byte(TAG_DECIMAL);
            encode_decimal(writer, d)?;
        }
        Node::String(s) => {
            check_len("string", s.len(), MAX_STRING_LEN)?;
            writer.write_byte(TAG_STRING);
            writer.write_string(s);
        }
        Node::Data(bytes) => {
            check_len("data", bytes.len(), MAX_BYTES_LEN)?;
            writer.write_byte(TAG_DATA);
            writer.write_bytes_prefixed(bytes);
        }
        Node::Date(micros) => {
            writer.write_byte(TAG_DATE);
            writer.write_signed_varint(*micros);
        }
        Node::Uuid(id) => {
            writer.write_byte(TAG_UUID);
            writer.write_uuid(id);
        }
        Node::Array(items) => {
            enter_encode(open.len())?;
            check_len("array", items.len(), MAX_ARRAY_LEN)?;
            writer.write_byte(TAG_ARRAY);
            writer.write_varint(items.len() as u64);
            open.push(Pending::Array(items.iter()));
        }
        Node::Dictionary(dict) => open_dictionary(writer, dict, open)?,
    }
    Ok(())
}

fn open_dictionary<'a>(writer: &mut Writer, dict: &'a Dictionary, open: &mut Vec<Pending<'a>>) -> Result<(), EncodeError> {
    enter_encode(open.len())?;
    check_len("dictionary", dict.len(), MAX_DICT_ENTRIES)?;
    writer.write_byte(TAG_DICTIONARY);
    writer.write_varint(dict.len() as u64);
    open.push(Pending::Dictionary(dict.iter()));
    Ok(())
}

fn encode_decimal(writer: &mut Writer, decimal: &Decimal) -> Result<(), EncodeError> {
    if !decimal.is_normalized() {
        return Err(EncodeError::DecimalNotNormalized);
    }

    writer.write_signed_varint(decimal.exponent() as i64);

    match decimal.mantissa() {
        DecimalMantissa::I64(v) => {
            writer.write_byte(MANTISSA_I64);
            writer.write_signed_varint(*v);
        }
        DecimalMantissa::Big(bytes) => {
            check_len("decimal.mantissa_bytes", bytes.len(), MAX_DECIMAL_BYTES)?;
            writer.write_byte(MANTISSA_BIG);
            writer.write_bytes_prefixed(bytes);
        }
    }

    Ok(())
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), EncodeError> {
    if len > max {
        return Err(EncodeError::LengthExceedsLimit { field, len, max });
    }
    Ok(())
}

fn enter_encode(open: usize) -> Result<(), EncodeError> {
    if open >= MAX_NESTING_DEPTH {
        return Err(EncodeError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    Ok(())
}
