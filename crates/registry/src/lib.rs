//! Regis registries: the per-kind glue that plugs concrete resource types
//! into the generic store.
//!
//! - [`node`]: cluster-scoped nodes with a status subresource and proxy
//!   location resolution toward the node agent.
//! - [`serviceaccount`]: namespaced service accounts.
//! - [`kubelet`]: the connection-info provider used for node agent traffic.

#![forbid(unsafe_code)]

pub mod kubelet;
pub mod node;
pub mod serviceaccount;

pub use kubelet::{
    ConnectionInfo, ConnectionInfoGetter, HttpKubeletClient, HttpTransport, KubeletConfig, RoundTripper, SharedTransport,
    TlsClientConfig, KUBELET_PORT,
};
pub use node::{NodeRest, NodeStatusRest, NodeStatusStrategy, NodeStorage, NodeStrategy, ProxyTarget, ResourceGetter};
pub use serviceaccount::{ServiceAccountRest, ServiceAccountStrategy};
