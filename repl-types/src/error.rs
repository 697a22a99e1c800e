//! Error types for faultline shared types.

use thiserror::Error;

/// Errors raised while parsing or encoding shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Namespace string is not `db.collection`
    #[error("invalid namespace: {0:?}")]
    InvalidNamespace(String),

    /// Unknown member state name
    #[error("invalid member state: {0:?}")]
    InvalidMemberState(String),

    /// MessagePack serialization failed
    #[error("encoding failed: {0}")]
    Encoding(#[source] rmp_serde::encode::Error),
}
