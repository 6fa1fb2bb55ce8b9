//! Record graph encoding.
//!
//! A record becomes a [`Dictionary`] holding its entity name, a fresh archive
//! identifier, its set attributes and its archivable relationships. Related
//! records are nested the first time they are reached; later references are
//! stubs naming the archive identifier:
//!
//! - to-one: the bare identifier string
//! - to-many: a one-entry dictionary `{<relationship>: <identifier>}`
//!
//! Records are registered before their relationships are walked, so cycles
//! terminate and every distinct record is encoded at most once per traversal.

use tracing::{debug, warn};

use crate::codec::ValueCoder;
use crate::error::{AttributeError, EncodeError};
use crate::graph::Traversal;
use crate::limits::MAX_RECORD_DEPTH;
use crate::model::{
    Context, Dictionary, EntityDescription, Node, RecordId, Related, ARCHIVE_ID_KEY, ENTITY_KEY,
};

/// Encodes records from one context, sharing a traversal across calls.
///
/// Use [`encode_roots`] to encode each root with a fresh traversal; use an
/// `Encoder` directly when several roots should share identifiers, so a
/// record reached from an earlier root is only stubbed by later ones.
#[derive(Debug)]
pub struct Encoder<'a> {
    context: &'a Context,
    coder: &'a ValueCoder,
    traversal: Traversal,
}

impl<'a> Encoder<'a> {
    pub fn new(context: &'a Context, coder: &'a ValueCoder) -> Self {
        Self {
            context,
            coder,
            traversal: Traversal::new(),
        }
    }

    /// Encodes `root`, or returns `None` if this encoder already visited it.
    pub fn encode(&mut self, root: RecordId) -> Result<Option<Dictionary>, EncodeError> {
        if self.traversal.has_been_traversed(root) {
            return Ok(None);
        }
        let dict = self.encode_record(root)?;
        debug!(records = self.traversal.len(), "encoded record graph");
        Ok(Some(dict))
    }

    /// Forgets every visited record.
    pub fn reset(&mut self) {
        self.traversal.clear();
    }

    /// Walks the records below `root` depth first with an explicit stack.
    ///
    /// Each parent is parked with the to-one key its nested child belongs
    /// under, or `None` when the child is the next to-many item.
    fn encode_record(&mut self, root: RecordId) -> Result<Dictionary, EncodeError> {
        let mut current = self.open(root)?;
        let mut parents: Vec<(Frame<'a>, Option<&'a str>)> = Vec::new();

        loop {
            if let Some((child, key)) = self.advance(&mut current) {
                if parents.len() + 1 > MAX_RECORD_DEPTH {
                    return Err(EncodeError::NestingTooDeep {
                        max: MAX_RECORD_DEPTH,
                    });
                }
                let child = self.open(child)?;
                parents.push((std::mem::replace(&mut current, child), key));
                continue;
            }

            let dict = current.dict;
            match parents.pop() {
                Some((mut parent, Some(key))) => {
                    parent.dict.insert(key, dict);
                    current = parent;
                }
                Some((mut parent, None)) => {
                    parent.items.push(Node::Dictionary(dict));
                    current = parent;
                }
                None => return Ok(dict),
            }
        }
    }

    /// Registers `id` and encodes its attributes.
    fn open(&mut self, id: RecordId) -> Result<Frame<'a>, EncodeError> {
        let context = self.context;
        let entity = context.entity(id)?;

        let mut dict = Dictionary::new();
        dict.insert(ENTITY_KEY, entity.name());
        let archive_id = self.traversal.register(id);
        dict.insert(ARCHIVE_ID_KEY, archive_id);

        for (attribute, value) in context.attributes(id)? {
            match self.coder.encode(attribute, value) {
                Ok(node) => {
                    dict.insert(attribute.name(), node);
                }
                Err(AttributeError::Schema(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(
                        entity = entity.name(),
                        attribute = attribute.name(),
                        code = e.severity().code(),
                        error = %e,
                        "skipping attribute that failed to encode"
                    );
                }
            }
        }

        Ok(Frame {
            record: id,
            entity,
            dict,
            next: 0,
            many: None,
            items: Vec::new(),
        })
    }

    /// Stubs already-visited targets of `frame` until it reaches one that
    /// must be nested, returned with its to-one key. `None` once every
    /// relationship is written.
    fn advance(&mut self, frame: &mut Frame<'a>) -> Option<(RecordId, Option<&'a str>)> {
        let context = self.context;
        loop {
            if let Some((name, members)) = frame.many.as_mut() {
                let name: &'a str = *name;
                match members.next() {
                    Some(&member) => match self.traversal.archive_id(member) {
                        Some(archive_id) => {
                            let mut stub = Dictionary::new();
                            stub.insert(name, archive_id);
                            frame.items.push(Node::Dictionary(stub));
                        }
                        None => return Some((member, None)),
                    },
                    None => {
                        frame.dict.insert(name, std::mem::take(&mut frame.items));
                        frame.many = None;
                    }
                }
                continue;
            }

            let entity: &'a EntityDescription = frame.entity;
            let index = frame.next;
            let relationship = entity.relationships().get(index)?;
            frame.next += 1;
            if !relationship.should_archive() {
                continue;
            }
            match context.related_at(frame.record, index) {
                Related::One(Some(target)) => match self.traversal.archive_id(*target) {
                    Some(archive_id) => {
                        frame.dict.insert(relationship.name(), archive_id);
                    }
                    None => return Some((*target, Some(relationship.name()))),
                },
                Related::Many(members) if !members.is_empty() => {
                    frame.many = Some((relationship.name(), members.iter()));
                }
                Related::One(None) | Related::Many(_) => {}
            }
        }
    }
}

/// A record whose relationships are still being walked.
#[derive(Debug)]
struct Frame<'a> {
    record: RecordId,
    entity: &'a EntityDescription,
    dict: Dictionary,
    /// Index of the next relationship to visit.
    next: usize,
    /// The to-many relationship being walked and its remaining members.
    many: Option<(&'a str, std::slice::Iter<'a, RecordId>)>,
    items: Vec<Node>,
}

/// Encodes one record with a fresh traversal.
pub fn archive_as_dictionary(
    context: &Context,
    coder: &ValueCoder,
    root: RecordId,
) -> Result<Option<Dictionary>, EncodeError> {
    Encoder::new(context, coder).encode(root)
}

/// Encodes each root with its own fresh traversal, in order.
///
/// Records shared between roots are encoded once under each root.
pub fn encode_roots(
    context: &Context,
    coder: &ValueCoder,
    roots: &[RecordId],
) -> Result<Vec<Node>, EncodeError> {
    let mut nodes = Vec::with_capacity(roots.len());
    for &root in roots {
        if let Some(dict) = archive_as_dictionary(context, coder, root)? {
            nodes.push(Node::Dictionary(dict));
        }
    }
    Ok(nodes)
}
