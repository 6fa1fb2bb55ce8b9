//! Record graph traversal: encoding, decoding and duplication.

pub mod decoder;
pub mod encoder;
pub mod traversal;

pub use decoder::{insert_objects, Decoder};
pub use encoder::{archive_as_dictionary, encode_roots, Encoder};
pub use traversal::{LeafNode, Traversal};

use crate::codec::ValueCoder;
use crate::error::ArchiveError;
use crate::model::{Context, Node, RecordId};

/// Deep-copies `record` and everything it archives within its own context.
///
/// The copy gets fresh records throughout; relationships the encoder does
/// not follow are not copied.
pub fn duplicate(
    context: &mut Context,
    coder: &ValueCoder,
    record: RecordId,
) -> Result<RecordId, ArchiveError> {
    let dict = archive_as_dictionary(context, coder, record)?.ok_or(ArchiveError::NothingArchived)?;
    let records = insert_objects(context, coder, &[Node::Dictionary(dict)])?;
    records.into_iter().next().ok_or(ArchiveError::NothingArchived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeKind, Schema, Value};
    use std::sync::Arc;

    #[test]
    fn test_duplicate_is_distinct() {
        let schema = Arc::new(
            Schema::builder()
                .entity("Event", |e| {
                    e.attribute("title", AttributeKind::String)
                        .to_one("detail", "Detail", |r| r.cascade())
                })
                .entity("Detail", |e| {
                    e.attribute("note", AttributeKind::String)
                        .to_one("event", "Event", |r| r)
                })
                .build()
                .unwrap(),
        );
        let mut ctx = Context::new(schema);
        let event = ctx.insert("Event").unwrap();
        let detail = ctx.insert("Detail").unwrap();
        ctx.set_attribute(event, "title", "Launch").unwrap();
        ctx.set_attribute(detail, "note", "pad 39A").unwrap();
        ctx.set_to_one(event, "detail", Some(detail)).unwrap();
        ctx.save();

        let copy = duplicate(&mut ctx, &ValueCoder::new(), event).unwrap();
        assert_ne!(copy, event);
        assert_eq!(ctx.attribute(copy, "title").unwrap(), Some(&Value::from("Launch")));

        let copy_detail = ctx.to_one(copy, "detail").unwrap().unwrap();
        assert_ne!(copy_detail, detail);
        assert_eq!(ctx.to_one(copy_detail, "event").unwrap(), Some(copy));
        assert_eq!(ctx.to_one(detail, "event").unwrap(), Some(event));
        assert_eq!(ctx.inserted_objects().len(), 2);
    }
}
