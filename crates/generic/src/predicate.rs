//! Selection predicates: label + field selectors evaluated against the
//! attributes a kind exposes for an object.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use regis_core::{fields, labels, RegistryError, RegistryResult, RuntimeObject};

/// Extracts `(labels, selectable fields)` from an object of the expected kind.
pub type AttrFunc = fn(&dyn RuntimeObject) -> RegistryResult<(labels::Set, fields::Set)>;

/// What the store consults when filtering lists.
pub trait Matcher: Send + Sync {
    fn matches(&self, obj: &dyn RuntimeObject) -> RegistryResult<bool>;

    /// Name pinned by a `metadata.name=<name>` term, allowing a direct lookup.
    fn matches_single(&self) -> Option<&str> { None }
}

pub struct SelectionPredicate {
    pub label: labels::Selector,
    pub field: fields::Selector,
    pub get_attrs: AttrFunc,
}

impl SelectionPredicate {
    pub fn new(label: labels::Selector, field: fields::Selector, get_attrs: AttrFunc) -> Self {
        Self { label, field, get_attrs }
    }

    /// Attributes for `obj`; fails with a type mismatch for a foreign kind.
    pub fn attrs(&self, obj: &dyn RuntimeObject) -> RegistryResult<(labels::Set, fields::Set)> {
        (self.get_attrs)(obj)
    }

    pub fn is_everything(&self) -> bool { self.label.is_empty() && self.field.is_empty() }
}

impl Matcher for SelectionPredicate {
    fn matches(&self, obj: &dyn RuntimeObject) -> RegistryResult<bool> {
        if self.is_everything() {
            return Ok(true);
        }
        let (l, f) = self.attrs(obj)?;
        Ok(self.label.matches(&l) && self.field.matches(&f))
    }

    fn matches_single(&self) -> Option<&str> {
        self.field.requires_exact_match("metadata.name")
    }
}

/// Generic metadata fields every kind exposes: `metadata.name`, plus
/// `metadata.namespace` for namespaced kinds.
pub fn object_meta_fields_set(meta: &ObjectMeta, has_namespace_field: bool) -> fields::Set {
    let mut set = fields::Set::new();
    set.insert("metadata.name".to_string(), meta.name.clone().unwrap_or_default());
    if has_namespace_field {
        set.insert("metadata.namespace".to_string(), meta.namespace.clone().unwrap_or_default());
    }
    set
}

/// Merge kind-specific fields into the generic set. A key defined by both is a
/// wiring error; registries probe this once at construction.
pub fn merge_fields_sets(base: fields::Set, specific: fields::Set) -> RegistryResult<fields::Set> {
    let mut out = base;
    for (k, v) in specific {
        if out.contains_key(&k) {
            return Err(RegistryError::Internal(format!("selectable field {k:?} is defined twice")));
        }
        out.insert(k, v);
    }
    Ok(out)
}
