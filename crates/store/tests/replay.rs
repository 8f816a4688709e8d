#![forbid(unsafe_code)]

use std::sync::Arc;

use regis_store::{storage_factory, ListOptions, MemoryStorage, Storage, StorageError, StorageOptions};
use serde_json::json;

fn obj(name: &str, ns: Option<&str>) -> serde_json::Value {
    let mut meta = json!({ "name": name });
    if let Some(ns) = ns { meta["namespace"] = serde_json::Value::String(ns.to_string()); }
    json!({ "metadata": meta })
}

#[test]
fn replay_basic_sequence() {
    let backend = Arc::new(MemoryStorage::new());
    let nodes = storage_factory(backend.clone(), StorageOptions::new("/nodes", false));

    let a = nodes.create("/nodes/a", obj("a", None)).unwrap();
    assert!(matches!(nodes.create("/nodes/a", obj("a", None)), Err(StorageError::KeyExists(_))));
    nodes.create("/nodes/b", obj("b", None)).unwrap();
    let a2 = nodes.update("/nodes/a", obj("a2", None), Some(a.revision)).unwrap();
    let gone = nodes.delete("/nodes/b").unwrap();
    assert_eq!(gone.value["metadata"]["name"], "b");

    let page = nodes.list("/nodes", &ListOptions::default()).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].0, "/nodes/a");
    assert_eq!(page.items[0].1.revision, a2.revision);
    assert_eq!(page.revision, backend.current_revision());
    assert!(page.continue_after.is_none());
}

#[test]
fn list_is_directory_scoped() {
    let backend: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    backend.create("/nodes/a", obj("a", None)).unwrap();
    backend.create("/nodesx/b", obj("b", None)).unwrap();
    let page = backend.list("/nodes", &ListOptions::default()).unwrap();
    assert_eq!(page.items.len(), 1);
}

#[test]
fn scoped_view_rejects_foreign_and_malformed_keys() {
    let backend = Arc::new(MemoryStorage::new());
    let sas = storage_factory(backend, StorageOptions::new("/serviceaccounts", true));
    assert!(matches!(sas.create("/nodes/a", obj("a", None)), Err(StorageError::InvalidKey { .. })));
    assert!(matches!(sas.create("/serviceaccounts/default", obj("d", None)), Err(StorageError::InvalidKey { .. })));
    assert!(sas.create("/serviceaccounts/default/builder", obj("builder", Some("default"))).is_ok());
    assert!(sas.list("/serviceaccounts/default", &ListOptions::default()).is_ok());
    assert!(sas.list("/serviceaccounts/default/builder", &ListOptions::default()).is_err());
}

#[test]
fn list_pages_are_capped_and_resumable() {
    let backend = Arc::new(MemoryStorage::new());
    let sas = storage_factory(backend, StorageOptions::new("/serviceaccounts", true).with_list_limit(2));
    for name in ["a", "b", "c", "d", "e"] {
        sas.create(&format!("/serviceaccounts/ns/{name}"), obj(name, Some("ns"))).unwrap();
    }

    // A larger request is still capped at the per-kind limit.
    let first = sas.list("/serviceaccounts", &ListOptions::with_limit(50)).unwrap();
    assert_eq!(first.items.len(), 2);
    let token = first.continue_after.clone().expect("truncated page carries a continue key");
    assert_eq!(token, "/serviceaccounts/ns/b");

    let mut seen: Vec<String> = first.items.into_iter().map(|(k, _)| k).collect();
    let mut next = Some(token);
    while let Some(after) = next {
        let page = sas.list("/serviceaccounts", &ListOptions { limit: None, continue_after: Some(after) }).unwrap();
        seen.extend(page.items.into_iter().map(|(k, _)| k));
        next = page.continue_after;
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen.last().map(String::as_str), Some("/serviceaccounts/ns/e"));
}
