use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{dir_prefix, ListOptions, ListResult, Revision, Storage, StorageError, Versioned};

/// Serializable image of a [`MemoryStorage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub revision: Revision,
    pub entries: BTreeMap<String, Versioned>,
}

#[derive(Default)]
struct Inner {
    revision: Revision,
    data: BTreeMap<String, Versioned>,
}

/// Ordered in-memory keyspace. Every write bumps one global revision counter.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn from_snapshot(snap: StorageSnapshot) -> Self {
        // Never hand out a revision at or below one already stored.
        let max_seen = snap.entries.values().map(|v| v.revision).max().unwrap_or(0);
        Self { inner: RwLock::new(Inner { revision: snap.revision.max(max_seen), data: snap.entries }) }
    }

    pub fn snapshot(&self) -> Result<StorageSnapshot, StorageError> {
        let g = self.read()?;
        Ok(StorageSnapshot { revision: g.revision, entries: g.data.clone() })
    }

    /// Load a snapshot file; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no state file; starting empty");
            return Ok(Self::new());
        }
        let bytes = std::fs::read(path).with_context(|| format!("reading state file {}", path.display()))?;
        let snap: StorageSnapshot =
            serde_json::from_slice(&bytes).with_context(|| format!("decoding state file {}", path.display()))?;
        Ok(Self::from_snapshot(snap))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let snap = self.snapshot()?;
        let bytes = serde_json::to_vec_pretty(&snap).context("encoding state snapshot")?;
        std::fs::write(path, bytes).with_context(|| format!("writing state file {}", path.display()))?;
        Ok(())
    }

    pub fn len(&self) -> usize { self.read().map(|g| g.data.len()).unwrap_or(0) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner.read().map_err(|_| StorageError::Internal("memory storage lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner.write().map_err(|_| StorageError::Internal("memory storage lock poisoned".into()))
    }
}

impl Storage for MemoryStorage {
    fn create(&self, key: &str, value: Value) -> Result<Versioned, StorageError> {
        counter!("storage_ops_total", 1, "op" => "create");
        let mut g = self.write()?;
        if g.data.contains_key(key) {
            return Err(StorageError::KeyExists(key.to_string()));
        }
        g.revision += 1;
        let v = Versioned { value, revision: g.revision };
        g.data.insert(key.to_string(), v.clone());
        Ok(v)
    }

    fn get(&self, key: &str) -> Result<Versioned, StorageError> {
        counter!("storage_ops_total", 1, "op" => "get");
        self.read()?.data.get(key).cloned().ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }

    fn update(&self, key: &str, value: Value, precondition: Option<Revision>) -> Result<Versioned, StorageError> {
        counter!("storage_ops_total", 1, "op" => "update");
        let mut g = self.write()?;
        let actual = match g.data.get(key) {
            Some(cur) => cur.revision,
            None => return Err(StorageError::KeyNotFound(key.to_string())),
        };
        if let Some(expected) = precondition {
            if expected != actual {
                return Err(StorageError::Conflict { key: key.to_string(), expected, actual });
            }
        }
        g.revision += 1;
        let v = Versioned { value, revision: g.revision };
        g.data.insert(key.to_string(), v.clone());
        Ok(v)
    }

    fn delete(&self, key: &str) -> Result<Versioned, StorageError> {
        counter!("storage_ops_total", 1, "op" => "delete");
        let mut g = self.write()?;
        let gone = g.data.remove(key).ok_or_else(|| StorageError::KeyNotFound(key.to_string()))?;
        g.revision += 1;
        Ok(gone)
    }

    fn list(&self, prefix: &str, opts: &ListOptions) -> Result<ListResult, StorageError> {
        counter!("storage_ops_total", 1, "op" => "list");
        let dir = dir_prefix(prefix);
        let g = self.read()?;
        let start = match opts.continue_after.as_deref() {
            Some(after) if after >= dir.as_str() => Bound::Excluded(after.to_string()),
            _ => Bound::Included(dir.clone()),
        };
        let limit = opts.limit.unwrap_or(usize::MAX);
        let mut items: Vec<(String, Versioned)> = Vec::new();
        let mut continue_after = None;
        for (k, v) in g.data.range((start, Bound::Unbounded)) {
            if !k.starts_with(&dir) {
                break;
            }
            if items.len() == limit {
                continue_after = items.last().map(|(last, _)| last.clone());
                break;
            }
            items.push((k.clone(), v.clone()));
        }
        Ok(ListResult { items, revision: g.revision, continue_after })
    }

    fn current_revision(&self) -> Revision {
        self.read().map(|g| g.revision).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revisions_increase_across_keys() {
        let s = MemoryStorage::new();
        let a = s.create("/nodes/a", json!({"n": 1})).unwrap();
        let b = s.create("/nodes/b", json!({"n": 2})).unwrap();
        assert!(b.revision > a.revision);
        let a2 = s.update("/nodes/a", json!({"n": 3}), Some(a.revision)).unwrap();
        assert!(a2.revision > b.revision);
        assert_eq!(s.current_revision(), a2.revision);
    }

    #[test]
    fn update_with_stale_revision_conflicts() {
        let s = MemoryStorage::new();
        let a = s.create("/k", json!(1)).unwrap();
        s.update("/k", json!(2), None).unwrap();
        let err = s.update("/k", json!(3), Some(a.revision)).unwrap_err();
        assert!(matches!(err, StorageError::Conflict { expected, .. } if expected == a.revision));
        assert_eq!(s.get("/k").unwrap().value, json!(2));
    }

    #[test]
    fn snapshot_restores_counter_and_entries() {
        let s = MemoryStorage::new();
        s.create("/a/x", json!("x")).unwrap();
        s.create("/a/y", json!("y")).unwrap();
        let snap = s.snapshot().unwrap();
        let restored = MemoryStorage::from_snapshot(snap);
        assert_eq!(restored.len(), 2);
        let next = restored.create("/a/z", json!("z")).unwrap();
        assert_eq!(next.revision, 3);
    }

    #[test]
    fn truncated_list_hands_back_last_key() {
        let s = MemoryStorage::new();
        for k in ["/nodes/a", "/nodes/b", "/nodes/c", "/other/d"] {
            s.create(k, json!(k)).unwrap();
        }
        let page = s.list("/nodes", &ListOptions { limit: Some(2), ..Default::default() }).unwrap();
        let keys: Vec<&str> = page.items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/nodes/a", "/nodes/b"]);
        assert_eq!(page.continue_after.as_deref(), Some("/nodes/b"));

        let rest = s.list("/nodes", &ListOptions { limit: Some(2), continue_after: page.continue_after }).unwrap();
        assert_eq!(rest.items.len(), 1);
        assert_eq!(rest.continue_after, None);
    }
}
