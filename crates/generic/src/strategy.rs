use std::sync::Arc;

use regis_core::{ApiObject, Context, ErrorList};

use crate::names::{NameGenerator, SimpleNameGenerator};

/// Lifecycle hooks a resource kind supplies to the generic store.
///
/// Create path: `prepare_for_create -> validate -> persist`.
/// Update path: `prepare_for_update -> validate_update -> canonicalize -> persist`.
///
/// Implementations hold no per-call state; one immutable instance per kind is
/// built at startup and shared by every request.
pub trait RestStrategy: Send + Sync {
    type Object: ApiObject;

    /// Whether the kind is partitioned by namespace. Constant per kind.
    fn namespace_scoped(&self) -> bool;

    /// Whether an update of a missing object creates it.
    fn allow_create_on_update(&self) -> bool;

    /// Whether updates without a resourceVersion are accepted.
    fn allow_unconditional_update(&self) -> bool;

    /// Strip or default fields clients may not set on create. Never fails.
    fn prepare_for_create(&self, obj: &mut Self::Object);

    /// Restore fields this path may not change from `old`. Never fails.
    fn prepare_for_update(&self, obj: &mut Self::Object, old: &Self::Object);

    fn validate(&self, ctx: &Context, obj: &Self::Object) -> ErrorList;

    fn validate_update(&self, ctx: &Context, obj: &Self::Object, old: &Self::Object) -> ErrorList;

    /// Normalize after validation passed.
    fn canonicalize(&self, _obj: &mut Self::Object) {}

    /// Name for objects created with `metadata.generateName`.
    fn generate_name(&self, base: &str) -> String {
        SimpleNameGenerator.generate_name(base)
    }
}

pub type SharedStrategy<K> = Arc<dyn RestStrategy<Object = K>>;

/// What `prepare_for_create` does with client-supplied status.
///
/// Most kinds clear it; kinds describing infrastructure the system does not
/// itself populate (nodes) accept every field on create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusOnCreate {
    Accept,
    #[default]
    Clear,
}
