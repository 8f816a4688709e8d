use k8s_openapi::api::core::v1::Node;
use regis_core::{downcast, fields, labels, Context, ErrorList, RegistryResult, RuntimeObject};
use regis_generic::{merge_fields_sets, object_meta_fields_set, Matcher, RestStrategy, SelectionPredicate, StatusOnCreate};

use super::validation::{validate_node, validate_node_update};

/// Lifecycle hooks for nodes on the main (spec) path.
///
/// Nodes describe machines the system does not provision itself, so by
/// default create accepts every field, status included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStrategy {
    status_on_create: StatusOnCreate,
}

impl NodeStrategy {
    pub const fn new() -> Self { Self { status_on_create: StatusOnCreate::Accept } }

    pub const fn with_status_on_create(status_on_create: StatusOnCreate) -> Self { Self { status_on_create } }

    pub fn status_on_create(&self) -> StatusOnCreate { self.status_on_create }
}

impl Default for NodeStrategy {
    fn default() -> Self { Self::new() }
}

impl RestStrategy for NodeStrategy {
    type Object = Node;

    fn namespace_scoped(&self) -> bool { false }

    fn allow_create_on_update(&self) -> bool { false }

    fn allow_unconditional_update(&self) -> bool { true }

    fn prepare_for_create(&self, obj: &mut Node) {
        if self.status_on_create == StatusOnCreate::Clear {
            obj.status = None;
        }
    }

    /// Status only changes through [`NodeStatusStrategy`].
    fn prepare_for_update(&self, obj: &mut Node, old: &Node) {
        obj.status = old.status.clone();
    }

    fn validate(&self, _ctx: &Context, obj: &Node) -> ErrorList { validate_node(obj) }

    fn validate_update(&self, _ctx: &Context, obj: &Node, old: &Node) -> ErrorList {
        validate_node(obj).and(validate_node_update(obj, old))
    }

    fn canonicalize(&self, _obj: &mut Node) {}
}

/// Status subresource hooks: everything from the base strategy except the
/// mutation hooks, which protect spec instead of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeStatusStrategy {
    base: NodeStrategy,
}

impl NodeStatusStrategy {
    pub const fn new(base: NodeStrategy) -> Self { Self { base } }
}

impl RestStrategy for NodeStatusStrategy {
    type Object = Node;

    fn namespace_scoped(&self) -> bool { self.base.namespace_scoped() }

    fn allow_create_on_update(&self) -> bool { self.base.allow_create_on_update() }

    fn allow_unconditional_update(&self) -> bool { self.base.allow_unconditional_update() }

    fn validate(&self, ctx: &Context, obj: &Node) -> ErrorList { self.base.validate(ctx, obj) }

    fn canonicalize(&self, obj: &mut Node) { self.base.canonicalize(obj) }

    // Overrides.

    fn prepare_for_create(&self, _obj: &mut Node) {}

    fn prepare_for_update(&self, obj: &mut Node, old: &Node) {
        obj.spec = old.spec.clone();
    }

    fn validate_update(&self, _ctx: &Context, obj: &Node, old: &Node) -> ErrorList { validate_node_update(obj, old) }
}

/// Flattened fields a node exposes to field selectors.
pub fn node_to_selectable_fields(node: &Node) -> RegistryResult<fields::Set> {
    let unschedulable = node.spec.as_ref().and_then(|s| s.unschedulable).unwrap_or(false);
    let specific = fields::Set::from([("spec.unschedulable".to_string(), unschedulable.to_string())]);
    merge_fields_sets(object_meta_fields_set(&node.metadata, false), specific)
}

fn node_attrs(obj: &dyn RuntimeObject) -> RegistryResult<(labels::Set, fields::Set)> {
    let node = downcast::<Node>(obj)?;
    Ok((node.metadata.labels.clone().unwrap_or_default(), node_to_selectable_fields(node)?))
}

pub fn match_node(label: labels::Selector, field: fields::Selector) -> SelectionPredicate {
    SelectionPredicate::new(label, field, node_attrs)
}

/// [`match_node`] in the shape the generic store wires in.
pub fn node_matcher(label: labels::Selector, field: fields::Selector) -> Box<dyn Matcher> {
    Box::new(match_node(label, field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeSpec, NodeStatus, ServiceAccount};
    use regis_core::RegistryError;

    fn node(unschedulable: Option<bool>) -> Node {
        let mut n = Node::default();
        n.metadata.name = Some("worker-1".into());
        n.metadata.labels = Some([("zone".to_string(), "a".to_string())].into());
        n.spec = Some(NodeSpec { unschedulable, ..Default::default() });
        n
    }

    #[test]
    fn selectable_fields_are_meta_plus_schedulability() {
        let set = node_to_selectable_fields(&node(Some(true))).unwrap();
        let keys: Vec<&str> = set.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["metadata.name", "spec.unschedulable"]);
        assert_eq!(set["spec.unschedulable"], "true");
        assert_eq!(node_to_selectable_fields(&node(None)).unwrap()["spec.unschedulable"], "false");
        assert_eq!(node_to_selectable_fields(&Node::default()).unwrap()["spec.unschedulable"], "false");
    }

    #[test]
    fn matcher_uses_labels_and_fields() {
        let m = match_node(labels::Selector::parse("zone=a").unwrap(), fields::Selector::parse("spec.unschedulable=false").unwrap());
        assert!(m.matches(&node(None)).unwrap());
        assert!(!m.matches(&node(Some(true))).unwrap());
    }

    #[test]
    fn matcher_rejects_other_kinds() {
        let m = match_node(labels::Selector::everything(), fields::Selector::parse("spec.unschedulable=true").unwrap());
        let err = m.matches(&ServiceAccount::default()).unwrap_err();
        assert_eq!(err, RegistryError::TypeMismatch { expected: "Node".into(), found: "ServiceAccount".into() });
    }

    #[test]
    fn create_policy_is_per_strategy_value() {
        let mut n = node(None);
        n.status = Some(NodeStatus { phase: Some("Running".into()), ..Default::default() });
        let mut accepted = n.clone();
        NodeStrategy::new().prepare_for_create(&mut accepted);
        assert_eq!(accepted.status, n.status);

        let mut cleared = n.clone();
        NodeStrategy::with_status_on_create(StatusOnCreate::Clear).prepare_for_create(&mut cleared);
        assert_eq!(cleared.status, None);
    }
}
