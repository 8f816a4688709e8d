use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use regis_core::{fields, labels, Context, ObjectList, RegistryResult};
use regis_generic::{no_namespace_key_func, DeleteOutcome, GenericStore, SharedStrategy, UpdateOutcome};
use regis_store::{ListOptions, Storage, StorageFactory, StorageOptions};
use tracing::info;

use super::location::{resource_location, ProxyTarget, ResourceGetter};
use super::strategy::{node_matcher, node_to_selectable_fields, NodeStatusStrategy, NodeStrategy};
use crate::kubelet::{ConnectionInfoGetter, SharedTransport};

pub const NODE_PREFIX: &str = "/nodes";

/// The node endpoint and its status subresource, sharing one store.
pub struct NodeStorage {
    pub node: NodeRest,
    pub status: NodeStatusRest,
}

impl NodeStorage {
    pub fn new(
        backend: Arc<dyn Storage>,
        factory: StorageFactory,
        list_limit: usize,
        strategy: NodeStrategy,
        connection: Arc<dyn ConnectionInfoGetter>,
        proxy_transport: SharedTransport,
    ) -> RegistryResult<Self> {
        // A colliding selectable field is a wiring error; surface it now rather than on first list.
        node_to_selectable_fields(&Node::default())?;

        let storage = factory(backend, StorageOptions::new(NODE_PREFIX, false).with_list_limit(list_limit));
        let main: SharedStrategy<Node> = Arc::new(strategy);
        let status: SharedStrategy<Node> = Arc::new(NodeStatusStrategy::new(strategy));
        let store = GenericStore {
            new_list_fn: ObjectList::empty,
            key_root_fn: Arc::new(|_ctx: &Context| NODE_PREFIX.to_string()),
            key_fn: Arc::new(|ctx: &Context, name: &str| no_namespace_key_func(ctx, NODE_PREFIX, name)),
            object_name_fn: |node: &Node| Ok(node.metadata.name.clone().unwrap_or_default()),
            predicate_fn: node_matcher,
            endpoint_name: "nodes".to_string(),
            create_strategy: main.clone(),
            update_strategy: main,
            return_deleted_object: false,
            storage,
        };
        info!(prefix = NODE_PREFIX, list_limit, "node registry ready");
        Ok(Self {
            status: NodeStatusRest { store: store.with_update_strategy(status) },
            node: NodeRest { store, connection, proxy_transport },
        })
    }
}

pub struct NodeRest {
    store: GenericStore<Node>,
    connection: Arc<dyn ConnectionInfoGetter>,
    proxy_transport: SharedTransport,
}

impl NodeRest {
    pub fn store(&self) -> &GenericStore<Node> { &self.store }

    pub fn create(&self, ctx: &Context, node: Node) -> RegistryResult<Node> { self.store.create(ctx, node) }

    pub fn update(&self, ctx: &Context, node: Node) -> RegistryResult<UpdateOutcome<Node>> { self.store.update(ctx, node) }

    pub fn get(&self, ctx: &Context, name: &str) -> RegistryResult<Node> { self.store.get(ctx, name) }

    pub fn delete(&self, ctx: &Context, name: &str) -> RegistryResult<DeleteOutcome<Node>> { self.store.delete(ctx, name) }

    pub fn list(&self, ctx: &Context, label: labels::Selector, field: fields::Selector, opts: &ListOptions) -> RegistryResult<ObjectList<Node>> {
        self.store.list(ctx, label, field, opts)
    }

    /// Proxy destination for `id` (`[scheme:]name[:port]`).
    pub fn resource_location(&self, ctx: &Context, id: &str) -> RegistryResult<ProxyTarget> {
        resource_location(self, self.connection.as_ref(), &self.proxy_transport, ctx, id)
    }
}

impl ResourceGetter for NodeRest {
    fn get(&self, ctx: &Context, name: &str) -> RegistryResult<Node> { self.store.get(ctx, name) }
}

/// `nodes/<name>/status`: reads the node, writes only its status.
pub struct NodeStatusRest {
    store: GenericStore<Node>,
}

impl NodeStatusRest {
    pub fn get(&self, ctx: &Context, name: &str) -> RegistryResult<Node> { self.store.get(ctx, name) }

    pub fn update(&self, ctx: &Context, node: Node) -> RegistryResult<UpdateOutcome<Node>> { self.store.update(ctx, node) }
}
