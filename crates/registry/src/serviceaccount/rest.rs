use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use regis_core::{fields, labels, Context, ObjectList, RegistryResult};
use regis_generic::{namespace_key_func, namespace_key_root_func, DeleteOutcome, GenericStore, SharedStrategy, UpdateOutcome};
use regis_store::{ListOptions, Storage, StorageFactory, StorageOptions, DEFAULT_LIST_LIMIT};
use tracing::info;

use super::strategy::{service_account_matcher, ServiceAccountStrategy};

pub const SERVICE_ACCOUNT_PREFIX: &str = "/serviceaccounts";

/// Service account endpoint: pure wiring of the strategy into the generic store.
pub struct ServiceAccountRest {
    store: GenericStore<ServiceAccount>,
}

impl ServiceAccountRest {
    pub fn new(backend: Arc<dyn Storage>, factory: StorageFactory) -> Self {
        Self::with_list_limit(backend, factory, DEFAULT_LIST_LIMIT)
    }

    pub fn with_list_limit(backend: Arc<dyn Storage>, factory: StorageFactory, list_limit: usize) -> Self {
        let storage = factory(backend, StorageOptions::new(SERVICE_ACCOUNT_PREFIX, true).with_list_limit(list_limit));
        let strategy: SharedStrategy<ServiceAccount> = Arc::new(ServiceAccountStrategy);
        info!(prefix = SERVICE_ACCOUNT_PREFIX, list_limit, "service account registry ready");
        let store = GenericStore {
            new_list_fn: ObjectList::empty,
            key_root_fn: Arc::new(|ctx: &Context| namespace_key_root_func(ctx, SERVICE_ACCOUNT_PREFIX)),
            key_fn: Arc::new(|ctx: &Context, name: &str| namespace_key_func(ctx, SERVICE_ACCOUNT_PREFIX, name)),
            object_name_fn: |sa: &ServiceAccount| Ok(sa.metadata.name.clone().unwrap_or_default()),
            predicate_fn: service_account_matcher,
            endpoint_name: "serviceaccounts".to_string(),
            create_strategy: strategy.clone(),
            update_strategy: strategy,
            return_deleted_object: true,
            storage,
        };
        Self { store }
    }

    pub fn store(&self) -> &GenericStore<ServiceAccount> { &self.store }

    pub fn create(&self, ctx: &Context, sa: ServiceAccount) -> RegistryResult<ServiceAccount> { self.store.create(ctx, sa) }

    pub fn update(&self, ctx: &Context, sa: ServiceAccount) -> RegistryResult<UpdateOutcome<ServiceAccount>> {
        self.store.update(ctx, sa)
    }

    pub fn get(&self, ctx: &Context, name: &str) -> RegistryResult<ServiceAccount> { self.store.get(ctx, name) }

    pub fn delete(&self, ctx: &Context, name: &str) -> RegistryResult<DeleteOutcome<ServiceAccount>> {
        self.store.delete(ctx, name)
    }

    pub fn list(
        &self,
        ctx: &Context,
        label: labels::Selector,
        field: fields::Selector,
        opts: &ListOptions,
    ) -> RegistryResult<ObjectList<ServiceAccount>> {
        self.store.list(ctx, label, field, opts)
    }
}
