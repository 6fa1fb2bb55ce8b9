//! Binary encoding/decoding.
//!
//! - [`primitives`]: varints and fixed-width fields
//! - [`node`]: tagged node trees
//! - [`container`]: blob framing with digest and optional zstd
//! - [`value`]: typed attribute values to and from nodes

pub mod container;
pub mod node;
pub mod primitives;
pub mod value;

pub use container::{decode_archive, encode_archive, EncodeOptions};
pub use node::{decode_node, encode_node};
pub use primitives::{zigzag_decode, zigzag_encode, Reader, Writer};
pub use value::{FnTransformer, ValueCoder, ValueTransformer};
