//! Cross-node consistency comparison.
//!
//! Pure verdicts over data already fetched from the nodes. A failed
//! comparison returns a [`Divergence`] that names the nodes involved and
//! narrows the difference down to specific entries or document ids.

use repl_types::{DocId, Document, Namespace, NodeId, OpTime, OplogEntry, TypesError};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Every collection of one node, by namespace.
pub type CollectionSet = BTreeMap<Namespace, Vec<Document>>;

/// A node's oplog, oldest entry first.
#[derive(Debug, Clone, Copy)]
pub struct NodeOplog<'a> {
    /// Owning node.
    pub node: NodeId,
    /// Entries, oldest first.
    pub entries: &'a [OplogEntry],
}

/// SHA-256 over the canonical encoding of a collection's documents in id order.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionDigest([u8; 32]);

impl fmt::Display for CollectionDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for CollectionDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionDigest({})", &hex::encode(self.0)[..12])
    }
}

/// Ways two nodes can disagree.
#[derive(Debug, Error)]
pub enum Divergence {
    /// A data-bearing node has no oplog at all
    #[error("oplog of {node} is empty")]
    EmptyOplog {
        /// Node with the empty oplog.
        node: NodeId,
    },

    /// Oplog entries differ at the same distance from the newest entry
    #[error(
        "oplogs differ {depth} entries back from the newest: {reference} has [{reference_entry}], \
         {other} has [{other_entry}]; nearest newer agreeing entry: {}",
        describe_optime(.previous_match)
    )]
    OplogMismatch {
        /// Node with the longest oplog.
        reference: NodeId,
        /// Node that disagrees with it.
        other: NodeId,
        /// Number of entries between the mismatch and the newest entry.
        depth: usize,
        /// Entry on the reference node.
        reference_entry: Box<OplogEntry>,
        /// Entry on the other node.
        other_entry: Box<OplogEntry>,
        /// The last entry compared before the mismatch, if any.
        previous_match: Option<OpTime>,
    },

    /// A collection exists on one node only
    #[error("collection {ns} exists on {present_on} but not on {missing_on}")]
    MissingCollection {
        /// Namespace.
        ns: Namespace,
        /// Node that has it.
        present_on: NodeId,
        /// Node that lacks it.
        missing_on: NodeId,
    },

    /// Collection contents differ
    #[error(
        "collection {ns} differs between {left} (digest {left_digest}) and {right} \
         (digest {right_digest}): documents {} differ ({only_left} only on {left}, \
         {only_right} only on {right}, {changed} changed)",
        describe_range(.first_id, .last_id)
    )]
    CollectionMismatch {
        /// Namespace.
        ns: Namespace,
        /// First node compared.
        left: NodeId,
        /// Second node compared.
        right: NodeId,
        /// Digest on the first node.
        left_digest: CollectionDigest,
        /// Digest on the second node.
        right_digest: CollectionDigest,
        /// Smallest differing document id.
        first_id: Option<DocId>,
        /// Largest differing document id.
        last_id: Option<DocId>,
        /// Ids present only on the first node.
        only_left: usize,
        /// Ids present only on the second node.
        only_right: usize,
        /// Ids present on both with different contents.
        changed: usize,
    },

    /// Document counts differ
    #[error("collection {ns} has {left_count} documents on {left} but {right_count} on {right}")]
    CountMismatch {
        /// Namespace.
        ns: Namespace,
        /// First node compared.
        left: NodeId,
        /// Second node compared.
        right: NodeId,
        /// Count on the first node.
        left_count: usize,
        /// Count on the second node.
        right_count: usize,
    },

    /// A document could not be encoded for hashing
    #[error("could not hash collection: {0}")]
    Hashing(#[from] TypesError),
}

fn describe_optime(optime: &Option<OpTime>) -> String {
    optime.map_or_else(|| "none".to_string(), |o| o.to_string())
}

fn describe_range(first: &Option<DocId>, last: &Option<DocId>) -> String {
    match (first, last) {
        (Some(first), Some(last)) if first == last => format!("[{first}]"),
        (Some(first), Some(last)) => format!("[{first} .. {last}]"),
        _ => "<unknown>".to_string(),
    }
}

/// Compare oplogs newest to oldest.
///
/// The longest oplog is the reference. A shorter oplog only has to agree on
/// the entries it has, so a node that joined through initial sync (and
/// therefore starts its oplog later) still matches.
pub fn compare_oplogs(oplogs: &[NodeOplog<'_>]) -> Result<(), Divergence> {
    if let Some(empty) = oplogs.iter().find(|o| o.entries.is_empty()) {
        return Err(Divergence::EmptyOplog { node: empty.node });
    }
    // `rev` so that ties go to the first node listed
    let Some(reference) = oplogs.iter().rev().max_by_key(|o| o.entries.len()) else {
        return Ok(());
    };

    let mut previous_match = None;
    for depth in 0..reference.entries.len() {
        let expected = &reference.entries[reference.entries.len() - 1 - depth];
        for other in oplogs.iter().filter(|o| o.node != reference.node) {
            if depth >= other.entries.len() {
                continue;
            }
            let actual = &other.entries[other.entries.len() - 1 - depth];
            if actual != expected {
                return Err(Divergence::OplogMismatch {
                    reference: reference.node,
                    other: other.node,
                    depth,
                    reference_entry: Box::new(expected.clone()),
                    other_entry: Box::new(actual.clone()),
                    previous_match,
                });
            }
        }
        previous_match = Some(expected.optime);
    }
    Ok(())
}

/// Digest one collection. Document order in `docs` does not matter.
pub fn digest_collection(docs: &[Document]) -> Result<CollectionDigest, TypesError> {
    let mut sorted: Vec<&Document> = docs.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for doc in sorted {
        hasher.update(doc.canonical_bytes()?);
    }
    Ok(CollectionDigest(hasher.finalize().into()))
}

fn is_excluded(ns: &Namespace, excluded_dbs: &[&str]) -> bool {
    excluded_dbs.contains(&ns.db.as_str())
}

fn namespaces<'a>(
    left: &'a CollectionSet,
    right: &'a CollectionSet,
    excluded_dbs: &[&str],
) -> BTreeSet<&'a Namespace> {
    left.keys()
        .chain(right.keys())
        .filter(|ns| !is_excluded(ns, excluded_dbs))
        .collect()
}

/// Compare two nodes' collections by digest, skipping `excluded_dbs`.
pub fn compare_collections(
    left: (NodeId, &CollectionSet),
    right: (NodeId, &CollectionSet),
    excluded_dbs: &[&str],
) -> Result<(), Divergence> {
    let (left_node, left_set) = left;
    let (right_node, right_set) = right;

    for ns in namespaces(left_set, right_set, excluded_dbs) {
        let (left_docs, right_docs) = match (left_set.get(ns), right_set.get(ns)) {
            (Some(l), Some(r)) => (l, r),
            (Some(_), None) => return Err(missing(ns, left_node, right_node)),
            (None, _) => return Err(missing(ns, right_node, left_node)),
        };

        let left_digest = digest_collection(left_docs)?;
        let right_digest = digest_collection(right_docs)?;
        if left_digest == right_digest {
            continue;
        }

        let diff = DocDiff::between(left_docs, right_docs);
        return Err(Divergence::CollectionMismatch {
            ns: ns.clone(),
            left: left_node,
            right: right_node,
            left_digest,
            right_digest,
            first_id: diff.differing.first().cloned(),
            last_id: diff.differing.last().cloned(),
            only_left: diff.only_left,
            only_right: diff.only_right,
            changed: diff.changed,
        });
    }
    Ok(())
}

/// Compare per-collection document counts, skipping `excluded_dbs`.
pub fn compare_collection_counts(
    left: (NodeId, &CollectionSet),
    right: (NodeId, &CollectionSet),
    excluded_dbs: &[&str],
) -> Result<(), Divergence> {
    let (left_node, left_set) = left;
    let (right_node, right_set) = right;

    for ns in namespaces(left_set, right_set, excluded_dbs) {
        let (left_count, right_count) = match (left_set.get(ns), right_set.get(ns)) {
            (Some(l), Some(r)) => (l.len(), r.len()),
            (Some(_), None) => return Err(missing(ns, left_node, right_node)),
            (None, _) => return Err(missing(ns, right_node, left_node)),
        };
        if left_count != right_count {
            return Err(Divergence::CountMismatch {
                ns: ns.clone(),
                left: left_node,
                right: right_node,
                left_count,
                right_count,
            });
        }
    }
    Ok(())
}

fn missing(ns: &Namespace, present_on: NodeId, missing_on: NodeId) -> Divergence {
    Divergence::MissingCollection {
        ns: ns.clone(),
        present_on,
        missing_on,
    }
}

struct DocDiff {
    differing: Vec<DocId>,
    only_left: usize,
    only_right: usize,
    changed: usize,
}

impl DocDiff {
    fn between(left: &[Document], right: &[Document]) -> Self {
        let left: BTreeMap<&DocId, &Document> = left.iter().map(|d| (&d.id, d)).collect();
        let right: BTreeMap<&DocId, &Document> = right.iter().map(|d| (&d.id, d)).collect();
        let ids: BTreeSet<&DocId> = left.keys().chain(right.keys()).copied().collect();

        let mut diff = Self {
            differing: Vec::new(),
            only_left: 0,
            only_right: 0,
            changed: 0,
        };
        for id in ids {
            match (left.get(id), right.get(id)) {
                (Some(l), Some(r)) if l == r => continue,
                (Some(_), Some(_)) => diff.changed += 1,
                (Some(_), None) => diff.only_left += 1,
                (None, _) => diff.only_right += 1,
            }
            diff.differing.push(id.clone());
        }
        diff
    }
}
