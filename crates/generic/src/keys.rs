//! Storage key construction. Keys are only ever built here; callers never
//! concatenate prefixes themselves.

use regis_core::{Context, RegistryError, RegistryResult};

/// Key root for list operations: `prefix/ns` within a namespace, `prefix` across all.
pub fn namespace_key_root_func(ctx: &Context, prefix: &str) -> String {
    match ctx.namespace() {
        Some(ns) => format!("{prefix}/{ns}"),
        None => prefix.to_string(),
    }
}

/// `prefix/ns/name` for namespaced kinds; the context must carry a namespace.
pub fn namespace_key_func(ctx: &Context, prefix: &str, name: &str) -> RegistryResult<String> {
    let ns = ctx
        .namespace()
        .ok_or_else(|| RegistryError::BadRequest("Namespace parameter required.".to_string()))?;
    check_name(name)?;
    Ok(format!("{prefix}/{ns}/{name}"))
}

/// `prefix/name` for cluster-scoped kinds.
pub fn no_namespace_key_func(_ctx: &Context, prefix: &str, name: &str) -> RegistryResult<String> {
    check_name(name)?;
    Ok(format!("{prefix}/{name}"))
}

fn check_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::BadRequest("Name parameter required.".to_string()));
    }
    let problem = if name == "." || name == ".." {
        Some("may not be '.' or '..'")
    } else if name.contains('/') {
        Some("may not contain '/'")
    } else if name.contains('%') {
        Some("may not contain '%'")
    } else {
        None
    };
    match problem {
        Some(p) => Err(RegistryError::BadRequest(format!("Name parameter invalid: {name:?}: {p}"))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_keys_share_the_root() {
        let ctx = Context::with_namespace("default");
        let root = namespace_key_root_func(&ctx, "/serviceaccounts");
        let key = namespace_key_func(&ctx, "/serviceaccounts", "builder").unwrap();
        assert_eq!(root, "/serviceaccounts/default");
        assert!(key.starts_with(&format!("{root}/")));
        assert_eq!(namespace_key_root_func(&Context::new(), "/serviceaccounts"), "/serviceaccounts");
    }

    #[test]
    fn namespaced_key_requires_namespace() {
        let err = namespace_key_func(&Context::new(), "/serviceaccounts", "builder").unwrap_err();
        assert_eq!(err, RegistryError::BadRequest("Namespace parameter required.".into()));
    }

    #[test]
    fn names_must_be_path_segments() {
        let ctx = Context::new();
        assert_eq!(no_namespace_key_func(&ctx, "/nodes", "n1").unwrap(), "/nodes/n1");
        for bad in ["", ".", "..", "a/b", "a%2F"] {
            assert!(no_namespace_key_func(&ctx, "/nodes", bad).unwrap_err().is_bad_request(), "{bad}");
        }
    }
}
