//! Nodes: cluster-scoped, with a status subresource and proxy location.

mod location;
mod rest;
mod strategy;
pub mod validation;

pub use location::{node_host_ip, resource_location, split_scheme_name_port, ProxyTarget, ResourceGetter};
pub use rest::{NodeRest, NodeStatusRest, NodeStorage, NODE_PREFIX};
pub use strategy::{match_node, node_matcher, node_to_selectable_fields, NodeStatusStrategy, NodeStrategy};
pub use validation::{validate_node, validate_node_update};
