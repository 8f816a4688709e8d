//! Field-pathed validation errors and the metadata validators shared by every kind.

use std::fmt;
use std::net::IpAddr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DNS1123_LABEL_MAX_LEN: usize = 63;
pub const DNS1123_SUBDOMAIN_MAX_LEN: usize = 253;
pub const QUALIFIED_NAME_MAX_LEN: usize = 63;
pub const LABEL_VALUE_MAX_LEN: usize = 63;

static DNS1123_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
static DNS1123_SUBDOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});
static QUALIFIED_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    Required,
    Invalid,
    Duplicate,
    NotSupported,
    Forbidden,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorType::Required => "Required value",
            ErrorType::Invalid => "Invalid value",
            ErrorType::Duplicate => "Duplicate value",
            ErrorType::NotSupported => "Unsupported value",
            ErrorType::Forbidden => "Forbidden",
        };
        f.write_str(s)
    }
}

/// One validation failure, addressed by its field path (`metadata.name`, `spec.taints[0].key`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub error_type: ErrorType,
    pub field: String,
    pub bad_value: Option<String>,
    pub detail: String,
}

impl FieldError {
    pub fn required(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { error_type: ErrorType::Required, field: field.into(), bad_value: None, detail: detail.into() }
    }

    pub fn invalid(field: impl Into<String>, value: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { error_type: ErrorType::Invalid, field: field.into(), bad_value: Some(value.into()), detail: detail.into() }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self { error_type: ErrorType::Duplicate, field: field.into(), bad_value: Some(value.into()), detail: String::new() }
    }

    pub fn not_supported(field: impl Into<String>, value: impl Into<String>, valid: &[&str]) -> Self {
        let detail = format!("supported values: {}", valid.iter().map(|v| format!("{v:?}")).collect::<Vec<_>>().join(", "));
        Self { error_type: ErrorType::NotSupported, field: field.into(), bad_value: Some(value.into()), detail }
    }

    pub fn forbidden(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { error_type: ErrorType::Forbidden, field: field.into(), bad_value: None, detail: detail.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error_type)?;
        if let Some(v) = &self.bad_value {
            write!(f, ": {v:?}")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// Ordered list of validation failures. Empty means valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<FieldError>);

impl ErrorList {
    pub fn new() -> Self { Self(Vec::new()) }
    pub fn push(&mut self, e: FieldError) { self.0.push(e) }
    pub fn extend(&mut self, other: ErrorList) { self.0.extend(other.0) }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> std::slice::Iter<'_, FieldError> { self.0.iter() }

    /// Prepend `path` to every field, e.g. `name` -> `metadata.name`.
    pub fn prefix(mut self, path: &str) -> Self {
        for e in self.0.iter_mut() {
            e.field = if e.field.is_empty() { path.to_string() } else { format!("{path}.{}", e.field) };
        }
        self
    }

    /// Concatenate: `self` first, then `other`.
    pub fn and(mut self, other: ErrorList) -> Self {
        self.extend(other);
        self
    }
}

impl From<Vec<FieldError>> for ErrorList {
    fn from(v: Vec<FieldError>) -> Self { Self(v) }
}

impl FromIterator<FieldError> for ErrorList {
    fn from_iter<I: IntoIterator<Item = FieldError>>(iter: I) -> Self { Self(iter.into_iter().collect()) }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a FieldError;
    type IntoIter = std::slice::Iter<'a, FieldError>;
    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Name validator: `(name, is_prefix) -> problems`. `is_prefix` is set when
/// validating a `generateName` base, which may end in a dash.
pub type ValidateNameFn = fn(&str, bool) -> Vec<String>;

fn mask_trailing_dash(name: &str, prefix: bool) -> &str {
    if prefix && name.len() > 1 { name.strip_suffix('-').unwrap_or(name) } else { name }
}

pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LEN {
        errs.push(format!("must be no more than {DNS1123_LABEL_MAX_LEN} characters"));
    }
    if !DNS1123_LABEL.is_match(value) {
        errs.push("a DNS-1123 label must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character".to_string());
    }
    errs
}

pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX_LEN {
        errs.push(format!("must be no more than {DNS1123_SUBDOMAIN_MAX_LEN} characters"));
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        errs.push("a DNS-1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character".to_string());
    }
    errs
}

/// Name validator for kinds whose names are DNS-1123 subdomains (nodes, service accounts).
pub fn validate_dns1123_subdomain_name(name: &str, prefix: bool) -> Vec<String> {
    is_dns1123_subdomain(mask_trailing_dash(name, prefix))
}

/// `[prefix/]name` where prefix is a DNS-1123 subdomain. Used for label and annotation keys.
pub fn is_qualified_name(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let (prefix, name) = match value.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, value),
    };
    if name.contains('/') {
        errs.push("a qualified name may contain at most one '/'".to_string());
        return errs;
    }
    if let Some(p) = prefix {
        if p.is_empty() {
            errs.push("prefix part must be non-empty".to_string());
        } else {
            errs.extend(is_dns1123_subdomain(p).into_iter().map(|m| format!("prefix part {m}")));
        }
    }
    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else if name.len() > QUALIFIED_NAME_MAX_LEN {
        errs.push(format!("name part must be no more than {QUALIFIED_NAME_MAX_LEN} characters"));
    }
    if !name.is_empty() && !QUALIFIED_NAME.is_match(name) {
        errs.push("name part must consist of alphanumeric characters, '-', '_' or '.', and must start and end with an alphanumeric character".to_string());
    }
    errs
}

pub fn is_valid_label_value(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > LABEL_VALUE_MAX_LEN {
        errs.push(format!("must be no more than {LABEL_VALUE_MAX_LEN} characters"));
    }
    if !value.is_empty() && !QUALIFIED_NAME.is_match(value) {
        errs.push("a valid label must be an empty string or consist of alphanumeric characters, '-', '_' or '.'".to_string());
    }
    errs
}

/// `a.b.c.d/n` or `x::y/n`; the prefix length must fit the address family.
pub fn is_valid_cidr(value: &str) -> bool {
    let Some((ip, bits)) = value.split_once('/') else { return false };
    let Ok(ip) = ip.parse::<IpAddr>() else { return false };
    let Ok(bits) = bits.parse::<u8>() else { return false };
    match ip {
        IpAddr::V4(_) => bits <= 32,
        IpAddr::V6(_) => bits <= 128,
    }
}

fn validate_labels(labels: Option<&std::collections::BTreeMap<String, String>>, field: &str) -> ErrorList {
    let mut errs = ErrorList::new();
    for (k, v) in labels.into_iter().flatten() {
        for m in is_qualified_name(k) {
            errs.push(FieldError::invalid(field, k.clone(), m));
        }
        for m in is_valid_label_value(v) {
            errs.push(FieldError::invalid(field, v.clone(), m));
        }
    }
    errs
}

fn validate_annotations(annotations: Option<&std::collections::BTreeMap<String, String>>, field: &str) -> ErrorList {
    let mut errs = ErrorList::new();
    for k in annotations.into_iter().flatten().map(|(k, _)| k) {
        for m in is_qualified_name(&k.to_lowercase()) {
            errs.push(FieldError::invalid(field, k.clone(), m));
        }
    }
    errs
}

/// Validate object metadata. Paths are relative to `metadata` (callers prefix).
pub fn validate_object_meta(meta: &ObjectMeta, requires_namespace: bool, name_fn: ValidateNameFn) -> ErrorList {
    let mut errs = ErrorList::new();
    let name = meta.name.as_deref().unwrap_or("");
    let generate_name = meta.generate_name.as_deref().unwrap_or("");

    if !generate_name.is_empty() {
        for m in name_fn(generate_name, true) {
            errs.push(FieldError::invalid("generateName", generate_name, m));
        }
    }
    if name.is_empty() {
        if generate_name.is_empty() {
            errs.push(FieldError::required("name", "name or generateName is required"));
        }
    } else {
        for m in name_fn(name, false) {
            errs.push(FieldError::invalid("name", name, m));
        }
    }

    let namespace = meta.namespace.as_deref().unwrap_or("");
    if requires_namespace {
        if namespace.is_empty() {
            errs.push(FieldError::required("namespace", ""));
        } else {
            for m in is_dns1123_label(namespace) {
                errs.push(FieldError::invalid("namespace", namespace, m));
            }
        }
    } else if !namespace.is_empty() {
        errs.push(FieldError::forbidden("namespace", "not allowed on this type"));
    }

    errs.extend(validate_labels(meta.labels.as_ref(), "labels"));
    errs.extend(validate_annotations(meta.annotations.as_ref(), "annotations"));
    errs
}

/// Identity fields that may not change across versions. Paths relative to `metadata`.
pub fn validate_object_meta_update(new: &ObjectMeta, old: &ObjectMeta) -> ErrorList {
    let mut errs = ErrorList::new();
    if new.name != old.name {
        errs.push(FieldError::invalid("name", new.name.clone().unwrap_or_default(), "field is immutable"));
    }
    if new.namespace != old.namespace {
        errs.push(FieldError::invalid("namespace", new.namespace.clone().unwrap_or_default(), "field is immutable"));
    }
    if new.uid != old.uid {
        errs.push(FieldError::invalid("uid", new.uid.clone().unwrap_or_default(), "field is immutable"));
    }
    if new.creation_timestamp != old.creation_timestamp {
        let shown = new.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339()).unwrap_or_default();
        errs.push(FieldError::invalid("creationTimestamp", shown, "field is immutable"));
    }
    errs.extend(validate_labels(new.labels.as_ref(), "labels"));
    errs.extend(validate_annotations(new.annotations.as_ref(), "annotations"));
    errs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, ns: Option<&str>) -> ObjectMeta {
        ObjectMeta { name: Some(name.to_string()), namespace: ns.map(|s| s.to_string()), ..Default::default() }
    }

    #[test]
    fn subdomain_names() {
        assert!(is_dns1123_subdomain("node-1.example.com").is_empty());
        assert!(!is_dns1123_subdomain("Node_1").is_empty());
        assert!(!is_dns1123_subdomain(&"a".repeat(254)).is_empty());
        assert!(validate_dns1123_subdomain_name("worker-", true).is_empty());
        assert!(!validate_dns1123_subdomain_name("worker-", false).is_empty());
    }

    #[test]
    fn qualified_names() {
        assert!(is_qualified_name("app").is_empty());
        assert!(is_qualified_name("kubernetes.io/hostname").is_empty());
        assert!(!is_qualified_name("/hostname").is_empty());
        assert!(!is_qualified_name("a/b/c").is_empty());
        assert!(!is_qualified_name("-bad").is_empty());
    }

    #[test]
    fn cidrs() {
        assert!(is_valid_cidr("10.244.0.0/24"));
        assert!(is_valid_cidr("fd00::/64"));
        assert!(!is_valid_cidr("10.244.0.0/33"));
        assert!(!is_valid_cidr("10.244.0.0"));
        assert!(!is_valid_cidr("banana/8"));
    }

    #[test]
    fn object_meta_requires_name_and_scopes_namespace() {
        let errs = validate_object_meta(&ObjectMeta::default(), false, validate_dns1123_subdomain_name).prefix("metadata");
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.iter().next().map(|e| e.field.as_str()), Some("metadata.name"));

        let errs = validate_object_meta(&meta("n1", Some("default")), false, validate_dns1123_subdomain_name);
        assert!(errs.iter().any(|e| e.field == "namespace" && e.error_type == ErrorType::Forbidden));

        let errs = validate_object_meta(&meta("sa", None), true, validate_dns1123_subdomain_name);
        assert!(errs.iter().any(|e| e.field == "namespace" && e.error_type == ErrorType::Required));

        let generated = ObjectMeta { generate_name: Some("worker-".into()), ..Default::default() };
        assert!(validate_object_meta(&generated, false, validate_dns1123_subdomain_name).is_empty());
    }

    #[test]
    fn meta_update_rejects_identity_changes() {
        let mut old = meta("n1", None);
        old.uid = Some("u-1".into());
        let mut new = old.clone();
        assert!(validate_object_meta_update(&new, &old).is_empty());
        new.uid = Some("u-2".into());
        new.name = Some("n2".into());
        let errs = validate_object_meta_update(&new, &old);
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "uid"]);
    }

    #[test]
    fn prefix_and_concat_keep_order() {
        let a: ErrorList = vec![FieldError::required("name", "")].into();
        let b: ErrorList = vec![FieldError::forbidden("podCIDR", "x")].into();
        let joined = a.prefix("metadata").and(b.prefix("spec"));
        let fields: Vec<_> = joined.iter().map(|e| e.field.clone()).collect();
        assert_eq!(fields, vec!["metadata.name", "spec.podCIDR"]);
    }
}
