//! Service accounts: namespaced identities for workloads.

mod rest;
mod strategy;

pub use rest::{ServiceAccountRest, SERVICE_ACCOUNT_PREFIX};
pub use strategy::{
    match_service_account, service_account_matcher, service_account_to_selectable_fields, validate_service_account,
    validate_service_account_update, ServiceAccountStrategy,
};
