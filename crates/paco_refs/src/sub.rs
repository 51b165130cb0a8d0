//! `paco.sub` substitution strings.
//!
//! A substitution is a scalar containing embedded references:
//! `paco.sub 'arn:aws:s3:::${paco.ref resource.s3.buckets.logs.name}/*'`.
//! Each embedded `${paco.ref ...}` is replaced with its resolved value in a
//! single pass; resolved substrings are not re-scanned.

use paco_model::{Project, REF_SCHEME, SUB_SCHEME};

use crate::error::{RefError, RefResult};
use crate::reference::Reference;
use crate::resolver::{RefValue, ResolverRegistry};

/// Strip the `paco.sub` scheme and surrounding quotes, returning the body.
pub fn sub_body(raw: &str) -> RefResult<&str> {
    let rest = raw
        .strip_prefix(&format!("{} ", SUB_SCHEME))
        .ok_or_else(|| RefError::MalformedRef(raw.to_string()))?;
    let rest = rest.trim();
    let body = rest
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| rest.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(rest);
    Ok(body)
}

/// Substitute every embedded reference in a `paco.sub` string.
pub async fn substitute(
    project: &Project,
    registry: &ResolverRegistry,
    raw: &str,
) -> RefResult<String> {
    let body = sub_body(raw)?;
    let marker = format!("${{{} ", REF_SCHEME);

    let mut result = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(start) = rest.find(&marker) {
        let after = &rest[start..];
        let end = after
            .find('}')
            .ok_or_else(|| RefError::MalformedRef(raw.to_string()))?;
        let ref_str = &after[2..end]; // inside ${ ... }

        result.push_str(&rest[..start]);
        let reference = Reference::parse(ref_str)?;
        match registry.resolve(project, &reference).await? {
            RefValue::Scalar(s) => result.push_str(&s),
            RefValue::List(l) => result.push_str(&l.join(",")),
            RefValue::Node(path) => {
                return Err(RefError::RefTypeMismatch {
                    reference: ref_str.to_string(),
                    attribute: path,
                })
            }
            RefValue::Output(source, key) => {
                let value = source.output_value(&key).await?;
                result.push_str(&value);
            }
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use paco_model::{Account, ProjectManifest, ProjectPaths};
    use std::collections::BTreeMap;

    fn project() -> Project {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            "dev".to_string(),
            Account {
                name: "dev".to_string(),
                title: None,
                account_id: "123456789012".to_string(),
                region: "us-west-2".to_string(),
                admin_delegate_role_name: "Delegate".to_string(),
                organization_account: false,
                root_email: None,
            },
        );
        Project {
            manifest: ProjectManifest {
                name: "p".to_string(),
                title: None,
                active_regions: vec![],
                default_account: None,
            },
            accounts,
            network_environments: BTreeMap::new(),
            resources: BTreeMap::new(),
            paths: ProjectPaths::new("/tmp/p", "p"),
        }
    }

    #[tokio::test]
    async fn test_substitute_single_ref() {
        let registry = ResolverRegistry::new();
        let out = substitute(
            &project(),
            &registry,
            "paco.sub 'arn:aws:iam::${paco.ref accounts.dev.id}:root'",
        )
        .await
        .unwrap();
        assert_eq!(out, "arn:aws:iam::123456789012:root");
    }

    #[tokio::test]
    async fn test_substitute_multiple_refs() {
        let registry = ResolverRegistry::new();
        let out = substitute(
            &project(),
            &registry,
            "paco.sub '${paco.ref accounts.dev.id}-${paco.ref accounts.dev.region}'",
        )
        .await
        .unwrap();
        assert_eq!(out, "123456789012-us-west-2");
    }

    #[tokio::test]
    async fn test_substitute_is_single_pass() {
        // A resolved value that itself looks like a marker is not re-scanned.
        let registry = ResolverRegistry::new();
        let mut project = project();
        project.accounts.get_mut("dev").unwrap().account_id =
            "${paco.ref accounts.dev.region}".to_string();

        let out = substitute(
            &project,
            &registry,
            "paco.sub 'x-${paco.ref accounts.dev.id}'",
        )
        .await
        .unwrap();
        assert_eq!(out, "x-${paco.ref accounts.dev.region}");
    }

    #[tokio::test]
    async fn test_unterminated_marker_is_malformed() {
        let registry = ResolverRegistry::new();
        let err = substitute(
            &project(),
            &registry,
            "paco.sub 'broken ${paco.ref accounts.dev.id'",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RefError::MalformedRef(_)));
    }
}
