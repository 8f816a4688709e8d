//! Regis core types: object glue, request context, error taxonomy and selectors.
//!
//! Every other crate in the workspace speaks in terms of these types. Concrete
//! resource types come from `k8s-openapi`; anything implementing
//! [`kube::Resource`] with a static dynamic type is an [`ApiObject`].

#![forbid(unsafe_code)]

use std::any::Any;
use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use kube::Resource;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod error;
pub mod fields;
pub mod labels;
pub mod validation;

pub use error::{RegistryError, RegistryResult};
pub use validation::{ErrorList, ErrorType, FieldError};

/// A typed API object the registry can store: metadata access via
/// [`kube::Resource`], plus serde so the storage engine can hold it as JSON.
pub trait ApiObject:
    Resource<DynamicType = ()> + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind name, e.g. `Node`.
    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }
}

impl<T> ApiObject for T where
    T: Resource<DynamicType = ()> + Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Type-erased object as it travels through kind-agnostic seams (matchers).
/// Recover the concrete type with [`downcast`].
pub trait RuntimeObject: Any + Send + Sync {
    fn object_kind(&self) -> String;
    fn as_any(&self) -> &dyn Any;
}

impl<T: ApiObject> RuntimeObject for T {
    fn object_kind(&self) -> String { T::kind_name() }
    fn as_any(&self) -> &dyn Any { self }
}

/// Borrow `obj` as `K`, or fail with a type-mismatch fault naming both kinds.
pub fn downcast<K: ApiObject>(obj: &dyn RuntimeObject) -> RegistryResult<&K> {
    obj.as_any().downcast_ref::<K>().ok_or_else(|| RegistryError::TypeMismatch {
        expected: K::kind_name(),
        found: obj.object_kind(),
    })
}

/// Per-request context handed to strategies and key functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    namespace: Option<String>,
}

impl Context {
    pub fn new() -> Self { Self::default() }

    pub fn with_namespace(ns: impl Into<String>) -> Self {
        let ns = ns.into();
        Self { namespace: if ns.is_empty() { None } else { Some(ns) } }
    }

    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }

    /// Namespace or `""` when the request is not namespaced.
    pub fn namespace_value(&self) -> &str { self.namespace.as_deref().unwrap_or("") }
}

/// List envelope returned by list operations (`NodeList`, `ServiceAccountList`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList<K> {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default = "Vec::new")]
    pub items: Vec<K>,
}

impl<K: ApiObject> ObjectList<K> {
    pub fn empty() -> Self {
        Self {
            api_version: K::api_version(&()).into_owned(),
            kind: format!("{}List", K::kind_name()),
            metadata: ListMeta::default(),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, ServiceAccount};

    #[test]
    fn context_treats_empty_namespace_as_absent() {
        let ctx = Context::with_namespace("");
        assert_eq!(ctx.namespace(), None);
        assert_eq!(ctx.namespace_value(), "");
        assert_eq!(Context::with_namespace("kube-system").namespace(), Some("kube-system"));
    }

    #[test]
    fn empty_list_carries_kind_and_version() {
        let nodes = ObjectList::<Node>::empty();
        assert_eq!(nodes.kind, "NodeList");
        assert_eq!(nodes.api_version, "v1");
        assert!(nodes.is_empty());
        assert_eq!(ObjectList::<ServiceAccount>::empty().kind, "ServiceAccountList");
    }

    #[test]
    fn downcast_reports_both_kinds_on_mismatch() {
        let sa = ServiceAccount::default();
        let obj: &dyn RuntimeObject = &sa;
        assert!(downcast::<ServiceAccount>(obj).is_ok());
        let err = downcast::<Node>(obj).unwrap_err();
        assert_eq!(err, RegistryError::TypeMismatch { expected: "Node".into(), found: "ServiceAccount".into() });
    }
}
