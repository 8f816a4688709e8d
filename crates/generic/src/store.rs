//! The generic REST store: runs a kind's strategy hooks around the storage engine.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use metrics::{counter, histogram};
use regis_core::{fields, labels, ApiObject, Context, ErrorList, FieldError, ObjectList, RegistryError, RegistryResult};
use regis_store::{ListOptions, Storage, StorageError, Versioned};
use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::predicate::Matcher;
use crate::strategy::{RestStrategy, SharedStrategy};

pub type KeyRootFn = Arc<dyn Fn(&Context) -> String + Send + Sync>;
pub type KeyFn = Arc<dyn Fn(&Context, &str) -> RegistryResult<String> + Send + Sync>;
pub type ObjectNameFn<K> = fn(&K) -> RegistryResult<String>;
pub type PredicateFn = fn(labels::Selector, fields::Selector) -> Box<dyn Matcher>;

/// Result of a delete: the final object, or a bare success status.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome<K> {
    Deleted(K),
    Success,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome<K> {
    pub object: K,
    /// The update created the object (only when the strategy allows it).
    pub created: bool,
}

/// Storage wiring for one resource kind. Every field is supplied by the
/// kind's storage adapter; the store itself carries no per-kind logic.
pub struct GenericStore<K: ApiObject> {
    pub new_list_fn: fn() -> ObjectList<K>,
    pub key_root_fn: KeyRootFn,
    pub key_fn: KeyFn,
    pub object_name_fn: ObjectNameFn<K>,
    pub predicate_fn: PredicateFn,
    /// Resource name used in logs and metrics, e.g. `serviceaccounts`.
    pub endpoint_name: String,
    pub create_strategy: SharedStrategy<K>,
    pub update_strategy: SharedStrategy<K>,
    /// Delete returns the object's final state instead of a bare status.
    pub return_deleted_object: bool,
    pub storage: Arc<dyn Storage>,
}

impl<K: ApiObject> Clone for GenericStore<K> {
    fn clone(&self) -> Self {
        Self {
            new_list_fn: self.new_list_fn,
            key_root_fn: Arc::clone(&self.key_root_fn),
            key_fn: Arc::clone(&self.key_fn),
            object_name_fn: self.object_name_fn,
            predicate_fn: self.predicate_fn,
            endpoint_name: self.endpoint_name.clone(),
            create_strategy: Arc::clone(&self.create_strategy),
            update_strategy: Arc::clone(&self.update_strategy),
            return_deleted_object: self.return_deleted_object,
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<K: ApiObject> GenericStore<K> {
    /// Same storage and keys, different update hooks (status subresources).
    pub fn with_update_strategy(&self, strategy: SharedStrategy<K>) -> Self {
        let mut copy = self.clone();
        copy.update_strategy = strategy;
        copy
    }

    pub fn kind(&self) -> String { K::kind_name() }

    pub fn new_list(&self) -> ObjectList<K> { (self.new_list_fn)() }

    pub fn create(&self, ctx: &Context, obj: K) -> RegistryResult<K> {
        let started = Instant::now();
        let res = self.create_inner(ctx, obj);
        self.observe("create", started, &res);
        res
    }

    pub fn update(&self, ctx: &Context, obj: K) -> RegistryResult<UpdateOutcome<K>> {
        let started = Instant::now();
        let res = self.update_inner(ctx, obj);
        self.observe("update", started, &res);
        res
    }

    pub fn get(&self, ctx: &Context, name: &str) -> RegistryResult<K> {
        let started = Instant::now();
        let res = (self.key_fn)(ctx, name).and_then(|key| self.load(&key, name));
        self.observe("get", started, &res);
        res
    }

    pub fn delete(&self, ctx: &Context, name: &str) -> RegistryResult<DeleteOutcome<K>> {
        let started = Instant::now();
        let res = (self.key_fn)(ctx, name).and_then(|key| {
            let gone = self.storage.delete(&key).map_err(|e| self.interpret(e, name))?;
            debug!(kind = %self.kind(), key = %key, "deleted");
            if self.return_deleted_object {
                Ok(DeleteOutcome::Deleted(self.decode(gone)?))
            } else {
                Ok(DeleteOutcome::Success)
            }
        });
        self.observe("delete", started, &res);
        res
    }

    pub fn list(&self, ctx: &Context, label: labels::Selector, field: fields::Selector, opts: &ListOptions) -> RegistryResult<ObjectList<K>> {
        let started = Instant::now();
        let res = self.list_inner(ctx, label, field, opts);
        self.observe("list", started, &res);
        res
    }

    fn create_inner(&self, ctx: &Context, mut obj: K) -> RegistryResult<K> {
        self.before_create(ctx, &mut obj)?;
        let name = (self.object_name_fn)(&obj)?;
        let key = (self.key_fn)(ctx, &name)?;
        let stored = self.storage.create(&key, self.encode(&obj)?).map_err(|e| self.interpret(e, &name))?;
        debug!(kind = %self.kind(), key = %key, rv = stored.revision, "created");
        self.decode(stored)
    }

    fn update_inner(&self, ctx: &Context, mut obj: K) -> RegistryResult<UpdateOutcome<K>> {
        let strategy = &self.update_strategy;
        let name = (self.object_name_fn)(&obj)?;
        let key = (self.key_fn)(ctx, &name)?;

        let existing = match self.storage.get(&key) {
            Ok(v) => v,
            Err(StorageError::KeyNotFound(_)) if strategy.allow_create_on_update() => {
                info!(kind = %self.kind(), name = %name, "object missing; creating on update");
                let object = self.create_inner(ctx, obj)?;
                return Ok(UpdateOutcome { object, created: true });
            }
            Err(e) => return Err(self.interpret(e, &name)),
        };
        let revision = existing.revision;
        let old = self.decode(existing)?;

        let requested = obj.meta().resource_version.clone().filter(|rv| !rv.is_empty());
        match requested {
            None if !strategy.allow_unconditional_update() => {
                let errs: ErrorList =
                    vec![FieldError::invalid("metadata.resourceVersion", "", "must be specified for an update")].into();
                return Err(RegistryError::invalid(self.kind(), name, errs));
            }
            None => {}
            Some(rv) => {
                let parsed: u64 = rv.parse().map_err(|_| {
                    let errs: ErrorList = vec![FieldError::invalid("metadata.resourceVersion", rv.clone(), "must be an integer")].into();
                    RegistryError::invalid(self.kind(), name.clone(), errs)
                })?;
                if parsed != revision {
                    return Err(self.conflict(&name));
                }
            }
        }

        self.before_update(ctx, &mut obj, &old)?;
        // Always guard the write with the revision we validated against.
        let stored = self.storage.update(&key, self.encode(&obj)?, Some(revision)).map_err(|e| self.interpret(e, &name))?;
        debug!(kind = %self.kind(), key = %key, rv = stored.revision, "updated");
        Ok(UpdateOutcome { object: self.decode(stored)?, created: false })
    }

    fn list_inner(&self, ctx: &Context, label: labels::Selector, field: fields::Selector, opts: &ListOptions) -> RegistryResult<ObjectList<K>> {
        let matcher = (self.predicate_fn)(label, field);
        let mut out = self.new_list();

        if let Some(name) = matcher.matches_single() {
            // A pinned name within a known scope is a point lookup.
            if let Ok(key) = (self.key_fn)(ctx, name) {
                match self.load(&key, name) {
                    Ok(obj) => {
                        if self.check_match(matcher.as_ref(), &obj)? {
                            out.items.push(obj);
                        }
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                out.metadata.resource_version = Some(self.storage.current_revision().to_string());
                return Ok(out);
            }
        }

        let root = (self.key_root_fn)(ctx);
        let page = self.storage.list(&root, opts).map_err(|e| self.interpret(e, ""))?;
        for (_, v) in page.items {
            let obj = self.decode(v)?;
            if self.check_match(matcher.as_ref(), &obj)? {
                out.items.push(obj);
            }
        }
        out.metadata.resource_version = Some(page.revision.to_string());
        out.metadata.continue_ = page.continue_after;
        Ok(out)
    }

    fn check_match(&self, matcher: &dyn Matcher, obj: &K) -> RegistryResult<bool> {
        matcher.matches(obj).map_err(|e| {
            if let RegistryError::TypeMismatch { expected, found } = &e {
                error!(endpoint = %self.endpoint_name, expected = %expected, found = %found, "matcher received an object of the wrong kind");
            }
            e
        })
    }

    fn before_create(&self, ctx: &Context, obj: &mut K) -> RegistryResult<()> {
        let strategy = &self.create_strategy;
        reconcile_namespace(strategy.namespace_scoped(), ctx, obj.meta_mut())?;
        strategy.prepare_for_create(obj);

        let meta = obj.meta_mut();
        if meta.name.as_deref().unwrap_or("").is_empty() {
            if let Some(base) = meta.generate_name.clone().filter(|b| !b.is_empty()) {
                meta.name = Some(strategy.generate_name(&base));
            }
        }
        fill_system_fields(meta);

        let errs = strategy.validate(ctx, obj);
        self.reject_invalid(obj, errs)
    }

    fn before_update(&self, ctx: &Context, obj: &mut K, old: &K) -> RegistryResult<()> {
        let strategy: &dyn RestStrategy<Object = K> = self.update_strategy.as_ref();
        reconcile_namespace(strategy.namespace_scoped(), ctx, obj.meta_mut())?;
        strategy.prepare_for_update(obj, old);

        // Clients may omit system fields on update; carry them forward.
        let (meta, old_meta) = (obj.meta_mut(), old.meta());
        if meta.uid.as_deref().unwrap_or("").is_empty() {
            meta.uid = old_meta.uid.clone();
        }
        if meta.creation_timestamp.is_none() {
            meta.creation_timestamp = old_meta.creation_timestamp.clone();
        }

        let errs = strategy.validate_update(ctx, obj, old);
        self.reject_invalid(obj, errs)?;
        strategy.canonicalize(obj);
        Ok(())
    }

    fn reject_invalid(&self, obj: &K, errs: ErrorList) -> RegistryResult<()> {
        if errs.is_empty() {
            return Ok(());
        }
        counter!("registry_validation_failures_total", 1, "resource" => self.endpoint_name.clone());
        debug!(kind = %self.kind(), name = %obj.name_any(), errors = errs.len(), "validation failed");
        Err(RegistryError::invalid(self.kind(), obj.meta().name.clone().unwrap_or_default(), errs))
    }

    fn load(&self, key: &str, name: &str) -> RegistryResult<K> {
        let v = self.storage.get(key).map_err(|e| self.interpret(e, name))?;
        self.decode(v)
    }

    fn encode(&self, obj: &K) -> RegistryResult<Value> {
        let mut v = serde_json::to_value(obj)?;
        // The revision is owned by storage, not by the stored document.
        if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("resourceVersion");
        }
        Ok(v)
    }

    fn decode(&self, v: Versioned) -> RegistryResult<K> {
        let expected = self.kind();
        if let Some(found) = v.value.get("kind").and_then(Value::as_str) {
            if found != expected {
                error!(endpoint = %self.endpoint_name, expected = %expected, found = %found, "storage returned an object of the wrong kind");
                return Err(RegistryError::TypeMismatch { expected, found: found.to_string() });
            }
        }
        let mut obj: K = serde_json::from_value(v.value)?;
        obj.meta_mut().resource_version = Some(v.revision.to_string());
        Ok(obj)
    }

    fn conflict(&self, name: &str) -> RegistryError {
        RegistryError::conflict(
            self.kind(),
            name,
            "the object has been modified; please apply your changes to the latest version and try again",
        )
    }

    fn interpret(&self, e: StorageError, name: &str) -> RegistryError {
        match e {
            StorageError::KeyNotFound(_) => RegistryError::not_found(self.kind(), name),
            StorageError::KeyExists(_) => RegistryError::AlreadyExists { kind: self.kind(), name: name.to_string() },
            StorageError::Conflict { .. } => self.conflict(name),
            other => RegistryError::Internal(other.to_string()),
        }
    }

    fn observe<T>(&self, op: &'static str, started: Instant, res: &RegistryResult<T>) {
        let outcome = match res {
            Ok(_) => "ok",
            Err(e) => e.reason(),
        };
        counter!("registry_ops_total", 1, "op" => op, "resource" => self.endpoint_name.clone(), "outcome" => outcome);
        histogram!("registry_op_latency_ms", started.elapsed().as_secs_f64() * 1000.0, "op" => op);
    }
}

/// Namespaced kinds take the request namespace when the object has none and
/// must agree with it otherwise; cluster-scoped kinds never carry one.
fn reconcile_namespace(namespaced: bool, ctx: &Context, meta: &mut ObjectMeta) -> RegistryResult<()> {
    if !namespaced {
        meta.namespace = None;
        return Ok(());
    }
    if meta.namespace.as_deref().unwrap_or("").is_empty() {
        meta.namespace = ctx.namespace().map(str::to_string);
    }
    if meta.namespace.as_deref().unwrap_or("") != ctx.namespace_value() {
        return Err(RegistryError::BadRequest(
            "the namespace of the provided object does not match the namespace sent on the request".to_string(),
        ));
    }
    Ok(())
}

fn fill_system_fields(meta: &mut ObjectMeta) {
    meta.uid = Some(Uuid::new_v4().to_string());
    meta.creation_timestamp = Some(Time(Utc::now()));
    meta.resource_version = None;
    meta.deletion_timestamp = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{namespace_key_func, namespace_key_root_func};
    use crate::predicate::{object_meta_fields_set, SelectionPredicate};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use regis_core::{downcast, validation, RuntimeObject};
    use regis_store::{storage_factory, MemoryStorage, StorageOptions};
    use std::collections::BTreeMap;

    // Data is user-writable; the `status` annotation stands in for a
    // system-owned half so the update hooks have something to protect.
    struct ConfigMapStrategy {
        create_on_update: bool,
        unconditional: bool,
    }

    impl RestStrategy for ConfigMapStrategy {
        type Object = ConfigMap;
        fn namespace_scoped(&self) -> bool { true }
        fn allow_create_on_update(&self) -> bool { self.create_on_update }
        fn allow_unconditional_update(&self) -> bool { self.unconditional }
        fn prepare_for_create(&self, _obj: &mut ConfigMap) {}
        fn prepare_for_update(&self, obj: &mut ConfigMap, old: &ConfigMap) {
            obj.metadata.annotations = old.metadata.annotations.clone();
        }
        fn validate(&self, _ctx: &Context, obj: &ConfigMap) -> ErrorList {
            validation::validate_object_meta(&obj.metadata, true, validation::validate_dns1123_subdomain_name).prefix("metadata")
        }
        fn validate_update(&self, ctx: &Context, obj: &ConfigMap, old: &ConfigMap) -> ErrorList {
            self.validate(ctx, obj)
                .and(validation::validate_object_meta_update(&obj.metadata, &old.metadata).prefix("metadata"))
        }
        fn canonicalize(&self, obj: &mut ConfigMap) {
            if let Some(data) = obj.data.as_mut() {
                for v in data.values_mut() {
                    *v = v.trim().to_string();
                }
            }
        }
    }

    fn attrs(obj: &dyn RuntimeObject) -> RegistryResult<(labels::Set, fields::Set)> {
        let cm = downcast::<ConfigMap>(obj)?;
        Ok((cm.metadata.labels.clone().unwrap_or_default(), object_meta_fields_set(&cm.metadata, true)))
    }

    fn matcher(label: labels::Selector, field: fields::Selector) -> Box<dyn Matcher> {
        Box::new(SelectionPredicate::new(label, field, attrs))
    }

    fn store_with(strategy: ConfigMapStrategy, return_deleted_object: bool) -> GenericStore<ConfigMap> {
        let prefix = "/configmaps";
        let storage = storage_factory(Arc::new(MemoryStorage::new()), StorageOptions::new(prefix, true));
        let strategy: SharedStrategy<ConfigMap> = Arc::new(strategy);
        GenericStore {
            new_list_fn: ObjectList::empty,
            key_root_fn: Arc::new(move |ctx: &Context| namespace_key_root_func(ctx, prefix)),
            key_fn: Arc::new(move |ctx: &Context, name: &str| namespace_key_func(ctx, prefix, name)),
            object_name_fn: |cm: &ConfigMap| Ok(cm.metadata.name.clone().unwrap_or_default()),
            predicate_fn: matcher,
            endpoint_name: "configmaps".to_string(),
            create_strategy: strategy.clone(),
            update_strategy: strategy,
            return_deleted_object,
            storage,
        }
    }

    fn store() -> GenericStore<ConfigMap> {
        store_with(ConfigMapStrategy { create_on_update: false, unconditional: true }, true)
    }

    fn cm(name: &str, value: &str) -> ConfigMap {
        let mut c = ConfigMap::default();
        c.metadata.name = Some(name.to_string());
        c.data = Some(BTreeMap::from([("k".to_string(), value.to_string())]));
        c
    }

    fn ns() -> Context { Context::with_namespace("default") }

    #[test]
    fn create_fills_system_fields_and_namespace() {
        let s = store();
        let created = s.create(&ns(), cm("a", "1")).unwrap();
        assert_eq!(created.metadata.namespace.as_deref(), Some("default"));
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.creation_timestamp.is_some());
        assert!(created.metadata.resource_version.is_some());
        let err = s.create(&ns(), cm("a", "1")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
    }

    #[test]
    fn create_rejects_namespace_mismatch_and_invalid_objects() {
        let s = store();
        let mut other = cm("a", "1");
        other.metadata.namespace = Some("prod".into());
        assert!(s.create(&ns(), other).unwrap_err().is_bad_request());
        let err = s.create(&ns(), cm("Not_Valid", "1")).unwrap_err();
        assert!(err.is_invalid());
        assert!(s.list(&ns(), labels::Selector::everything(), fields::Selector::everything(), &ListOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn generate_name_is_honored() {
        let s = store();
        let mut c = cm("", "1");
        c.metadata.name = None;
        c.metadata.generate_name = Some("cfg-".into());
        let created = s.create(&ns(), c).unwrap();
        assert!(created.metadata.name.unwrap().starts_with("cfg-"));
    }

    #[test]
    fn update_runs_hooks_in_order() {
        let s = store();
        let mut first = cm("a", "1");
        first.metadata.annotations = Some(BTreeMap::from([("status".to_string(), "ready".to_string())]));
        let created = s.create(&ns(), first).unwrap();

        let mut next = created.clone();
        next.data = Some(BTreeMap::from([("k".to_string(), "  2  ".to_string())]));
        next.metadata.annotations = Some(BTreeMap::from([("status".to_string(), "hacked".to_string())]));
        let out = s.update(&ns(), next).unwrap();
        assert!(!out.created);
        assert_eq!(out.object.data.as_ref().unwrap()["k"], "2");
        assert_eq!(out.object.metadata.annotations.as_ref().unwrap()["status"], "ready");
        assert_eq!(out.object.metadata.uid, created.metadata.uid);
    }

    #[test]
    fn stale_resource_version_conflicts() {
        let s = store();
        let created = s.create(&ns(), cm("a", "1")).unwrap();
        s.update(&ns(), cm("a", "2")).unwrap();
        let err = s.update(&ns(), created).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn unconditional_update_needs_permission() {
        let s = store_with(ConfigMapStrategy { create_on_update: false, unconditional: false }, true);
        s.create(&ns(), cm("a", "1")).unwrap();
        let err = s.update(&ns(), cm("a", "2")).unwrap_err();
        match err {
            RegistryError::Invalid { errors, .. } => {
                assert_eq!(errors.iter().next().map(|e| e.field.as_str()), Some("metadata.resourceVersion"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_object_on_update() {
        let s = store();
        assert!(s.update(&ns(), cm("ghost", "1")).unwrap_err().is_not_found());
        let s = store_with(ConfigMapStrategy { create_on_update: true, unconditional: true }, true);
        assert!(s.update(&ns(), cm("ghost", "1")).unwrap().created);
    }

    #[test]
    fn delete_returns_final_state_when_configured() {
        let s = store();
        s.create(&ns(), cm("a", "1")).unwrap();
        match s.delete(&ns(), "a").unwrap() {
            DeleteOutcome::Deleted(obj) => assert_eq!(obj.metadata.name.as_deref(), Some("a")),
            DeleteOutcome::Success => panic!("expected the deleted object"),
        }
        assert!(s.get(&ns(), "a").unwrap_err().is_not_found());

        let s = store_with(ConfigMapStrategy { create_on_update: false, unconditional: true }, false);
        s.create(&ns(), cm("a", "1")).unwrap();
        assert_eq!(s.delete(&ns(), "a").unwrap(), DeleteOutcome::Success);
    }

    #[test]
    fn list_filters_and_scopes() {
        let s = store();
        s.create(&ns(), cm("a", "1")).unwrap();
        s.create(&ns(), cm("b", "1")).unwrap();
        s.create(&Context::with_namespace("prod"), cm("c", "1")).unwrap();

        let all = s.list(&Context::new(), labels::Selector::everything(), fields::Selector::everything(), &ListOptions::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.kind, "ConfigMapList");

        let one = s.list(&ns(), labels::Selector::everything(), fields::Selector::parse("metadata.name=b").unwrap(), &ListOptions::default()).unwrap();
        assert_eq!(one.items.iter().map(|c| c.metadata.name.clone().unwrap()).collect::<Vec<_>>(), vec!["b"]);

        let none = s.list(&ns(), labels::Selector::everything(), fields::Selector::parse("metadata.name=zzz").unwrap(), &ListOptions::default()).unwrap();
        assert!(none.is_empty());

        let prod = s.list(&Context::new(), labels::Selector::everything(), fields::Selector::parse("metadata.namespace=prod").unwrap(), &ListOptions::default()).unwrap();
        assert_eq!(prod.len(), 1);
    }

    #[test]
    fn foreign_kind_in_storage_is_a_type_mismatch() {
        let s = store();
        let mut secret = Secret::default();
        secret.metadata.name = Some("x".into());
        secret.metadata.namespace = Some("default".into());
        s.storage.create("/configmaps/default/x", serde_json::to_value(&secret).unwrap()).unwrap();
        let err = s.get(&ns(), "x").unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { ref expected, ref found } if expected == "ConfigMap" && found == "Secret"));
    }
}
