use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{dir_prefix, ListOptions, ListResult, Revision, Storage, StorageError, Versioned};

/// Page-size cap applied when a resource kind does not override it.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Per-resource-kind storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOptions {
    /// Key root for the kind, e.g. `/serviceaccounts`.
    pub prefix: String,
    /// Maximum items per list page; `0` disables the cap.
    pub list_limit: usize,
    /// Namespaced kinds key objects as `prefix/ns/name`, others as `prefix/name`.
    pub namespaced: bool,
}

impl StorageOptions {
    pub fn new(prefix: impl Into<String>, namespaced: bool) -> Self {
        Self { prefix: prefix.into(), list_limit: DEFAULT_LIST_LIMIT, namespaced }
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }
}

/// A view of a backend restricted to one resource kind's keyspace.
pub struct ScopedStorage {
    backend: Arc<dyn Storage>,
    options: StorageOptions,
    dir: String,
}

/// Builds the storage a resource kind's adapter talks to.
pub type StorageFactory = fn(Arc<dyn Storage>, StorageOptions) -> Arc<dyn Storage>;

/// Default [`StorageFactory`]: wrap `backend` for one resource kind.
pub fn storage_factory(backend: Arc<dyn Storage>, options: StorageOptions) -> Arc<dyn Storage> {
    Arc::new(ScopedStorage::new(backend, options))
}

impl ScopedStorage {
    pub fn new(backend: Arc<dyn Storage>, options: StorageOptions) -> Self {
        let dir = dir_prefix(&options.prefix);
        debug!(prefix = %options.prefix, limit = options.list_limit, namespaced = options.namespaced, "scoped storage");
        Self { backend, options, dir }
    }

    pub fn options(&self) -> &StorageOptions { &self.options }

    fn invalid(key: &str, reason: &str) -> StorageError {
        StorageError::InvalidKey { key: key.to_string(), reason: reason.to_string() }
    }

    fn check_object_key(&self, key: &str) -> Result<(), StorageError> {
        let rest = key.strip_prefix(&self.dir).ok_or_else(|| Self::invalid(key, &format!("outside prefix {}", self.options.prefix)))?;
        let depth = if self.options.namespaced { 2 } else { 1 };
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() != depth || segments.iter().any(|s| s.is_empty()) {
            let shape = if self.options.namespaced { "prefix/namespace/name" } else { "prefix/name" };
            return Err(Self::invalid(key, &format!("expected {shape}")));
        }
        Ok(())
    }

    fn check_list_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        if prefix.trim_end_matches('/') == self.options.prefix.trim_end_matches('/') {
            return Ok(());
        }
        let rest = prefix.strip_prefix(&self.dir).ok_or_else(|| Self::invalid(prefix, "list outside prefix"))?;
        let rest = rest.trim_end_matches('/');
        if self.options.namespaced && !rest.is_empty() && !rest.contains('/') {
            return Ok(());
        }
        Err(Self::invalid(prefix, "list root must be the prefix or a namespace under it"))
    }

    fn page_limit(&self, requested: Option<usize>) -> Option<usize> {
        match (requested, self.options.list_limit) {
            (r, 0) => r,
            (Some(r), cap) => Some(r.min(cap)),
            (None, cap) => Some(cap),
        }
    }
}

impl Storage for ScopedStorage {
    fn create(&self, key: &str, value: Value) -> Result<Versioned, StorageError> {
        self.check_object_key(key)?;
        self.backend.create(key, value)
    }

    fn get(&self, key: &str) -> Result<Versioned, StorageError> {
        self.check_object_key(key)?;
        self.backend.get(key)
    }

    fn update(&self, key: &str, value: Value, precondition: Option<Revision>) -> Result<Versioned, StorageError> {
        self.check_object_key(key)?;
        self.backend.update(key, value, precondition)
    }

    fn delete(&self, key: &str) -> Result<Versioned, StorageError> {
        self.check_object_key(key)?;
        self.backend.delete(key)
    }

    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError> {
        self.check_list_prefix(prefix)?;
        let capped = ListOptions { limit: self.page_limit(opts.limit), continue_after: opts.continue_after.clone() };
        self.backend.list(prefix, &capped)
    }

    fn current_revision(&self) -> Revision { self.backend.current_revision() }
}
