//! Replicated data: namespaces, documents and oplog entries.

use crate::error::TypesError;
use crate::ids::OpTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `db.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub coll: String,
}

impl Namespace {
    /// Create a namespace from its parts.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(TypesError::InvalidNamespace(s.to_string())),
        }
    }
}

/// Document primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(String);

impl DocId {
    /// Create a DocId.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key.
    pub id: DocId,
    /// Document contents.
    pub body: serde_json::Value,
}

impl Document {
    /// Create a document.
    pub fn new(id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            id: DocId::new(id),
            body,
        }
    }

    /// Canonical MessagePack encoding, used for content digests.
    ///
    /// Object keys are emitted in sorted order, so equal documents always
    /// encode to equal bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, TypesError> {
        rmp_serde::to_vec_named(self).map_err(TypesError::Encoding)
    }
}

/// A client write accepted by a primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert a new document. Fails if the id exists.
    Insert(Document),
    /// Replace an existing document.
    Update(Document),
    /// Remove a document by id.
    Delete(DocId),
}

impl WriteOp {
    /// The document id this write targets.
    pub fn doc_id(&self) -> &DocId {
        match self {
            Self::Insert(doc) | Self::Update(doc) => &doc.id,
            Self::Delete(id) => id,
        }
    }
}

/// Operation recorded in an oplog entry.
///
/// Inserts and updates carry the full document image, so applying an entry
/// twice leaves the same result as applying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum OplogOp {
    /// No data change (elections, set initiation).
    Noop {
        /// Free-form description.
        msg: String,
    },
    /// Document inserted.
    Insert {
        /// Inserted document.
        doc: Document,
    },
    /// Document replaced.
    Update {
        /// New document image.
        doc: Document,
    },
    /// Document removed.
    Delete {
        /// Removed document id.
        id: DocId,
    },
}

impl From<WriteOp> for OplogOp {
    fn from(write: WriteOp) -> Self {
        match write {
            WriteOp::Insert(doc) => Self::Insert { doc },
            WriteOp::Update(doc) => Self::Update { doc },
            WriteOp::Delete(id) => Self::Delete { id },
        }
    }
}

/// One entry of a node's replicated operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Position in the log.
    pub optime: OpTime,
    /// Target namespace.
    pub ns: Namespace,
    /// What happened.
    pub op: OplogOp,
}

impl OplogEntry {
    /// The document id this entry touches, or `None` for no-ops.
    pub fn doc_id(&self) -> Option<&DocId> {
        match &self.op {
            OplogOp::Noop { .. } => None,
            OplogOp::Insert { doc } | OplogOp::Update { doc } => Some(&doc.id),
            OplogOp::Delete { id } => Some(id),
        }
    }
}

impl fmt::Display for OplogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            OplogOp::Noop { msg } => write!(f, "{} noop {} \"{}\"", self.optime, self.ns, msg),
            OplogOp::Insert { doc } => write!(f, "{} insert {} _id={}", self.optime, self.ns, doc.id),
            OplogOp::Update { doc } => write!(f, "{} update {} _id={}", self.optime, self.ns, doc.id),
            OplogOp::Delete { id } => write!(f, "{} delete {} _id={}", self.optime, self.ns, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespace_parse() {
        let ns: Namespace = "test.coll.with.dots".parse().unwrap();
        assert_eq!(ns.db, "test");
        assert_eq!(ns.coll, "coll.with.dots");
        assert_eq!(ns.to_string(), "test.coll.with.dots");
    }

    #[test]
    fn namespace_parse_rejects_missing_parts() {
        for bad in ["nodot", ".coll", "db.", ""] {
            let err = bad.parse::<Namespace>().unwrap_err();
            assert!(matches!(err, TypesError::InvalidNamespace(_)), "{bad}");
        }
    }

    #[test]
    fn canonical_bytes_ignore_key_insertion_order() {
        let a = Document::new("1", json!({"a": 1, "b": [1, 2]}));
        let b = Document::new("1", json!({"b": [1, 2], "a": 1}));
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn canonical_bytes_differ_on_content() {
        let a = Document::new("1", json!({"a": 1}));
        let b = Document::new("1", json!({"a": 2}));
        assert_ne!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[test]
    fn write_op_becomes_oplog_op() {
        let doc = Document::new("k", json!({}));
        let op: OplogOp = WriteOp::Update(doc.clone()).into();
        assert_eq!(op, OplogOp::Update { doc });
        let op: OplogOp = WriteOp::Delete(DocId::new("k")).into();
        assert!(matches!(op, OplogOp::Delete { id } if id.as_str() == "k"));
    }

    #[test]
    fn oplog_entry_display() {
        let entry = OplogEntry {
            optime: OpTime::new(2, 9),
            ns: Namespace::new("test", "c"),
            op: OplogOp::Delete {
                id: DocId::new("x"),
            },
        };
        assert_eq!(entry.to_string(), "(2, 9) delete test.c _id=x");
        assert_eq!(entry.doc_id().map(DocId::as_str), Some("x"));
    }
}
