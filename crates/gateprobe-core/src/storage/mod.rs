use async_trait::async_trait;
use std::fmt;

use crate::model::HistoryRunRow;

/// Store failures, with environment loss kept distinct so callers can show
/// "history unavailable" instead of an empty list.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The storage environment is gone (host database closed, bridge down).
    Unavailable,
    Failed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => write!(f, "history store unavailable"),
            StoreError::Failed(msg) => write!(f, "history store error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Append-only run history, keyed by provider. The host owns the actual
/// database; this crate only defines the contract it must satisfy.
///
/// Rows carry the request envelope and the step record verbatim as JSON
/// strings. Implementations assign `id` monotonically per provider and are
/// free to return rows in any order; reconciliation re-sorts.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(
        &self,
        provider_id: &str,
        request_json: &str,
        result_json: &str,
    ) -> Result<(), StoreError>;

    /// Most recent rows first, at most `limit`.
    async fn list(&self, provider_id: &str, limit: u32) -> Result<Vec<HistoryRunRow>, StoreError>;

    /// Drops all rows for the provider. Returns whether anything was removed.
    async fn clear(&self, provider_id: &str) -> Result<bool, StoreError>;
}

pub mod memory;
