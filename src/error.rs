//! Error taxonomy for the digest pipeline.
//!
//! Most of these are absorbed where they occur (logged, then replaced by an
//! empty or fallback value). Only [`DigestError::Persistence`] and
//! [`DigestError::Timeout`] fail an ingestion run, and only
//! [`DigestError::Auth`] is surfaced to HTTP callers as-is.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("failed to fetch source {source_name}: {reason}")]
    SourceFetch { source_name: String, reason: String },

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("{0}")]
    Persistence(String),

    #[error("unauthorized: {0}")]
    Auth(String),

    #[error("ingestion run exceeded {0:?} ceiling")]
    Timeout(Duration),
}

impl DigestError {
    pub fn source_fetch(source_name: impl Into<String>, reason: impl ToString) -> Self {
        DigestError::SourceFetch {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Wraps a store error, keeping the full context chain in the message.
    pub fn persistence(err: anyhow::Error) -> Self {
        DigestError::Persistence(format!("{err:#}"))
    }
}
