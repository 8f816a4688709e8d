use k8s_openapi::api::core::v1::{ObjectReference, ServiceAccount};
use regis_core::validation::{self, is_dns1123_subdomain};
use regis_core::{downcast, fields, labels, Context, ErrorList, FieldError, RegistryResult, RuntimeObject};
use regis_generic::{object_meta_fields_set, Matcher, RestStrategy, SelectionPredicate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceAccountStrategy;

impl RestStrategy for ServiceAccountStrategy {
    type Object = ServiceAccount;

    fn namespace_scoped(&self) -> bool { true }

    fn allow_create_on_update(&self) -> bool { false }

    fn allow_unconditional_update(&self) -> bool { true }

    fn prepare_for_create(&self, obj: &mut ServiceAccount) { clean_secret_references(obj) }

    fn prepare_for_update(&self, obj: &mut ServiceAccount, _old: &ServiceAccount) { clean_secret_references(obj) }

    fn validate(&self, _ctx: &Context, obj: &ServiceAccount) -> ErrorList { validate_service_account(obj) }

    fn validate_update(&self, _ctx: &Context, obj: &ServiceAccount, old: &ServiceAccount) -> ErrorList {
        validate_service_account(obj).and(validate_service_account_update(obj, old))
    }
}

/// Secret references are by name only; anything else a client sends is dropped.
fn clean_secret_references(sa: &mut ServiceAccount) {
    for secret in sa.secrets.iter_mut().flatten() {
        *secret = ObjectReference { name: secret.name.take(), ..Default::default() };
    }
}

pub fn validate_service_account(sa: &ServiceAccount) -> ErrorList {
    let mut errs =
        validation::validate_object_meta(&sa.metadata, true, validation::validate_dns1123_subdomain_name).prefix("metadata");

    let secret_names = sa.secrets.iter().flatten().map(|s| s.name.as_deref());
    errs.extend(validate_reference_names("secrets", secret_names));
    let pull_names = sa.image_pull_secrets.iter().flatten().map(|s| s.name.as_deref());
    errs.extend(validate_reference_names("imagePullSecrets", pull_names));
    errs
}

fn validate_reference_names<'a>(field: &str, names: impl Iterator<Item = Option<&'a str>>) -> ErrorList {
    let mut errs = ErrorList::new();
    for (i, name) in names.enumerate() {
        let path = format!("{field}[{i}].name");
        match name.filter(|n| !n.is_empty()) {
            None => errs.push(FieldError::required(path, "")),
            Some(n) => {
                for m in is_dns1123_subdomain(n) {
                    errs.push(FieldError::invalid(path.clone(), n, m));
                }
            }
        }
    }
    errs
}

pub fn validate_service_account_update(sa: &ServiceAccount, old: &ServiceAccount) -> ErrorList {
    validation::validate_object_meta_update(&sa.metadata, &old.metadata).prefix("metadata")
}

pub fn service_account_to_selectable_fields(sa: &ServiceAccount) -> fields::Set {
    object_meta_fields_set(&sa.metadata, true)
}

fn service_account_attrs(obj: &dyn RuntimeObject) -> RegistryResult<(labels::Set, fields::Set)> {
    let sa = downcast::<ServiceAccount>(obj)?;
    Ok((sa.metadata.labels.clone().unwrap_or_default(), service_account_to_selectable_fields(sa)))
}

pub fn match_service_account(label: labels::Selector, field: fields::Selector) -> SelectionPredicate {
    SelectionPredicate::new(label, field, service_account_attrs)
}

pub fn service_account_matcher(label: labels::Selector, field: fields::Selector) -> Box<dyn Matcher> {
    Box::new(match_service_account(label, field))
}
