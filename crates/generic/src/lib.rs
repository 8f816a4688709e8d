//! Regis generic registry.
//!
//! One storage/REST engine ([`GenericStore`]) serves every resource kind. A kind
//! plugs in by supplying a [`RestStrategy`] (lifecycle hooks), a predicate
//! builder (selectable fields) and key functions; everything else is shared.

#![forbid(unsafe_code)]

pub mod keys;
pub mod names;
pub mod predicate;
pub mod store;
pub mod strategy;

pub use keys::{namespace_key_func, namespace_key_root_func, no_namespace_key_func};
pub use names::{NameGenerator, SimpleNameGenerator};
pub use predicate::{merge_fields_sets, object_meta_fields_set, AttrFunc, Matcher, SelectionPredicate};
pub use store::{DeleteOutcome, GenericStore, KeyFn, KeyRootFn, PredicateFn, UpdateOutcome};
pub use strategy::{RestStrategy, SharedStrategy, StatusOnCreate};
