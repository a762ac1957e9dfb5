//! Remote key-path store abstraction.
//!
//! The store offers point reads, subtree writes and shallow merges with no
//! multi-key atomicity. `merge_if` is an optional compare-and-merge on a single
//! field that backends may implement; callers must cope with `Unsupported`.

mod memory;
mod path;

pub use memory::{JournalEntry, MemoryRemoteStore, RemoteOp};
pub use path::{is_valid_segment, StorePath};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected by remote: {0}")]
    Rejected(String),
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
    #[error("operation not supported by this store")]
    Unsupported,
    #[error("failed to decode remote value: {0}")]
    Decode(String),
}

/// Result of a guarded merge.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalMerge {
    Applied,
    /// The guard field no longer held the expected value; nothing was written.
    Conflict { current: Option<Value> },
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// One-shot read. `Ok(None)` when nothing (or `null`) is stored at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, RemoteError>;

    /// Replace the subtree at `path`.
    async fn write(&self, path: &StorePath, value: Value) -> Result<(), RemoteError>;

    /// Shallow-merge `fields` into the object at `path`.
    async fn merge(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), RemoteError>;

    /// Merge `fields` only if `guard_field` at `path` still equals `expected`.
    async fn merge_if(
        &self,
        _path: &StorePath,
        _guard_field: &str,
        _expected: &Value,
        _fields: Map<String, Value>,
    ) -> Result<ConditionalMerge, RemoteError> {
        Err(RemoteError::Unsupported)
    }
}

/// Run one remote call under `budget`, mapping expiry to `RemoteError::Timeout`.
///
/// The underlying request may still complete remotely after the timeout fires.
pub async fn with_timeout<T, F>(budget: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(budget)),
    }
}
