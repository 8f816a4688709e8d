//! Regis store: keyed JSON storage with monotonically increasing revisions.
//!
//! The registry layer never touches a backend directly; it goes through
//! [`Storage`], usually wrapped by [`storage_factory`] so each resource kind
//! gets a view scoped to its key prefix with a capped list page size.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod memory;
mod scoped;

pub use memory::{MemoryStorage, StorageSnapshot};
pub use scoped::{storage_factory, ScopedStorage, StorageFactory, StorageOptions, DEFAULT_LIST_LIMIT};

pub type Revision = u64;

/// A stored value together with the revision that last wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub value: Value,
    pub revision: Revision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Page size; `None` means everything the backend allows.
    pub limit: Option<usize>,
    /// Resume strictly after this key (the previous page's `continue_after`).
    pub continue_after: Option<String>,
}

impl ListOptions {
    pub fn with_limit(limit: usize) -> Self { Self { limit: Some(limit), continue_after: None } }
}

#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub items: Vec<(String, Versioned)>,
    /// Backend revision at the time of the list.
    pub revision: Revision,
    /// Set when the page was truncated; pass back to fetch the next page.
    pub continue_after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("key already exists: {0}")]
    KeyExists(String),
    #[error("revision conflict on {key}: expected {expected}, found {actual}")]
    Conflict { key: String, expected: Revision, actual: Revision },
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("codec: {0}")]
    Codec(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Generic storage engine. Implementations must be safe to share across requests.
pub trait Storage: Send + Sync {
    fn create(&self, key: &str, value: Value) -> Result<Versioned, StorageError>;
    fn get(&self, key: &str) -> Result<Versioned, StorageError>;
    /// Replace an existing key. With `precondition`, the stored revision must match.
    fn update(&self, key: &str, value: Value, precondition: Option<Revision>) -> Result<Versioned, StorageError>;
    /// Remove a key, returning its final state.
    fn delete(&self, key: &str) -> Result<Versioned, StorageError>;
    /// Keys under `prefix` treated as a directory, in key order.
    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError>;
    fn current_revision(&self) -> Revision;
}

/// `/nodes` -> `/nodes/`, so listing `/nodes` never matches `/nodesx/a`.
pub fn dir_prefix(prefix: &str) -> String {
    if prefix.ends_with('/') { prefix.to_string() } else { format!("{prefix}/") }
}
