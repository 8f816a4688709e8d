use std::collections::HashSet;

use k8s_openapi::api::core::v1::Node;
use regis_core::validation::{self, is_qualified_name, is_valid_cidr, is_valid_label_value};
use regis_core::{ErrorList, FieldError};

pub const TAINT_EFFECTS: [&str; 3] = ["NoSchedule", "PreferNoSchedule", "NoExecute"];

/// Structural checks for a node on its own.
pub fn validate_node(node: &Node) -> ErrorList {
    let mut errs =
        validation::validate_object_meta(&node.metadata, false, validation::validate_dns1123_subdomain_name).prefix("metadata");

    let Some(spec) = node.spec.as_ref() else { return errs };
    if let Some(cidr) = spec.pod_cidr.as_deref().filter(|c| !c.is_empty()) {
        if !is_valid_cidr(cidr) {
            errs.push(FieldError::invalid("spec.podCIDR", cidr, "must be a valid CIDR"));
        }
    }

    let mut seen = HashSet::new();
    for (i, taint) in spec.taints.iter().flatten().enumerate() {
        let path = format!("spec.taints[{i}]");
        if taint.key.is_empty() {
            errs.push(FieldError::required(format!("{path}.key"), ""));
        } else {
            for m in is_qualified_name(&taint.key) {
                errs.push(FieldError::invalid(format!("{path}.key"), taint.key.clone(), m));
            }
        }
        for m in is_valid_label_value(taint.value.as_deref().unwrap_or("")) {
            errs.push(FieldError::invalid(format!("{path}.value"), taint.value.clone().unwrap_or_default(), m));
        }
        if !TAINT_EFFECTS.contains(&taint.effect.as_str()) {
            errs.push(FieldError::not_supported(format!("{path}.effect"), taint.effect.clone(), &TAINT_EFFECTS));
        }
        if !seen.insert((taint.key.as_str(), taint.effect.as_str())) {
            errs.push(FieldError::duplicate(path, format!("{}:{}", taint.key, taint.effect)));
        }
    }
    errs
}

/// Checks that only make sense against the stored version.
pub fn validate_node_update(node: &Node, old: &Node) -> ErrorList {
    let mut errs = validation::validate_object_meta_update(&node.metadata, &old.metadata).prefix("metadata");

    let cidr = |n: &Node| n.spec.as_ref().and_then(|s| s.pod_cidr.clone()).filter(|c| !c.is_empty());
    if let Some(was) = cidr(old) {
        if cidr(node).as_ref() != Some(&was) {
            errs.push(FieldError::forbidden("spec.podCIDR", format!("may not change once set (was {was:?})")));
        }
    }

    let mut seen = HashSet::new();
    let addresses = node.status.as_ref().and_then(|s| s.addresses.as_ref());
    for (i, addr) in addresses.into_iter().flatten().enumerate() {
        if !seen.insert((addr.type_.as_str(), addr.address.as_str())) {
            errs.push(FieldError::duplicate(format!("status.addresses[{i}]"), format!("{}/{}", addr.type_, addr.address)));
        }
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeSpec, NodeStatus, Taint};
    use regis_core::ErrorType;

    fn node(name: &str) -> Node {
        let mut n = Node::default();
        n.metadata.name = Some(name.to_string());
        n
    }

    fn taint(key: &str, effect: &str) -> Taint {
        Taint { key: key.to_string(), effect: effect.to_string(), ..Default::default() }
    }

    fn fields(errs: &ErrorList) -> Vec<String> { errs.iter().map(|e| e.field.clone()).collect() }

    #[test]
    fn minimal_node_is_valid() {
        assert!(validate_node(&node("worker-1")).is_empty());
    }

    #[test]
    fn pod_cidr_and_taints_are_checked() {
        let mut n = node("worker-1");
        n.spec = Some(NodeSpec {
            pod_cidr: Some("10.244.1.0/33".into()),
            taints: Some(vec![
                taint("dedicated", "NoSchedule"),
                taint("dedicated", "NoSchedule"),
                taint("", "Sometimes"),
            ]),
            ..Default::default()
        });
        let errs = validate_node(&n);
        assert_eq!(
            fields(&errs),
            vec!["spec.podCIDR", "spec.taints[1]", "spec.taints[2].key", "spec.taints[2].effect"]
        );
        assert_eq!(errs.iter().nth(1).map(|e| e.error_type), Some(ErrorType::Duplicate));
    }

    #[test]
    fn namespace_is_forbidden() {
        let mut n = node("worker-1");
        n.metadata.namespace = Some("default".into());
        assert_eq!(fields(&validate_node(&n)), vec!["metadata.namespace"]);
    }

    #[test]
    fn pod_cidr_is_sticky() {
        let mut old = node("worker-1");
        old.spec = Some(NodeSpec { pod_cidr: Some("10.244.1.0/24".into()), ..Default::default() });
        let mut new = old.clone();
        assert!(validate_node_update(&new, &old).is_empty());
        new.spec = Some(NodeSpec { pod_cidr: Some("10.244.2.0/24".into()), ..Default::default() });
        assert_eq!(fields(&validate_node_update(&new, &old)), vec!["spec.podCIDR"]);

        // Unset -> set is allowed.
        assert!(validate_node_update(&new, &node("worker-1")).is_empty());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let addr = NodeAddress { type_: "InternalIP".into(), address: "10.0.0.1".into() };
        let mut n = node("worker-1");
        n.status = Some(NodeStatus { addresses: Some(vec![addr.clone(), addr]), ..Default::default() });
        assert_eq!(fields(&validate_node_update(&n, &node("worker-1"))), vec!["status.addresses[1]"]);
    }
}
