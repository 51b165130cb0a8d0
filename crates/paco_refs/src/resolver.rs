//! Reference resolution against the model and registered resolvers.
//!
//! Resolution walks a reference's parts against the project graph. Before
//! each structural descent the registry is consulted: when a controller or
//! stack has registered itself for a path prefix, the remaining tail is
//! delegated to it. This is how terminal attribute requests (`.arn`,
//! `.name`, `.id`) are answered from live data.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use paco_model::Project;
use tracing::debug;

use crate::error::{RefError, RefResult};
use crate::reference::Reference;

/// A value produced by resolving a reference.
#[derive(Clone)]
pub enum RefValue {
    /// A literal attribute value.
    Scalar(String),
    /// A comma-joinable list of values.
    List(Vec<String>),
    /// A model node, identified by its dotted path.
    Node(String),
    /// A deferred stack output: materialized only once the producing stack
    /// reaches a terminal success state.
    Output(Arc<dyn OutputSource>, String),
}

impl std::fmt::Debug for RefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefValue::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            RefValue::List(l) => f.debug_tuple("List").field(l).finish(),
            RefValue::Node(p) => f.debug_tuple("Node").field(p).finish(),
            RefValue::Output(src, key) => f
                .debug_tuple("Output")
                .field(&src.source_id())
                .field(key)
                .finish(),
        }
    }
}

/// Something that can supply a deployed stack output.
///
/// Implemented by the engine's Stack type; kept abstract here so resolution
/// does not depend on the engine.
#[async_trait]
pub trait OutputSource: Send + Sync {
    /// A stable identifier for diagnostics (the stack name).
    fn source_id(&self) -> String;

    /// Read a deployed output value. Fails when the source has not reached
    /// a terminal success state.
    async fn output_value(&self, key: &str) -> RefResult<String>;
}

/// An object able to answer references for some subtree of the model.
#[async_trait]
pub trait RefResolver: Send + Sync {
    async fn resolve_ref(&self, reference: &Reference) -> RefResult<RefValue>;
}

/// Registry mapping model path prefixes to resolver objects.
///
/// Registered keys are `paco_ref_parts` strings; lookup picks the longest
/// prefix matching at a dot boundary. The in-flight set provides circular
/// reference detection: resolution is serialized per process, so reentering
/// a path that is still resolving indicates a cycle.
#[derive(Default)]
pub struct ResolverRegistry {
    resolvers: RwLock<BTreeMap<String, Arc<dyn RefResolver>>>,
    in_flight: Mutex<HashSet<String>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for a path prefix. Later registrations for the
    /// same prefix replace earlier ones.
    pub fn register(&self, path_prefix: impl Into<String>, resolver: Arc<dyn RefResolver>) {
        let prefix = path_prefix.into();
        debug!("Registering resolver for: {}", prefix);
        self.resolvers
            .write()
            .expect("resolver registry lock")
            .insert(prefix, resolver);
    }

    /// Find the longest registered prefix covering `path`.
    fn longest_match(&self, path: &str) -> Option<(String, Arc<dyn RefResolver>)> {
        let resolvers = self.resolvers.read().expect("resolver registry lock");
        let mut best: Option<(String, Arc<dyn RefResolver>)> = None;
        for (prefix, resolver) in resolvers.iter() {
            let matches = path == prefix || path.starts_with(&format!("{}.", prefix));
            if matches {
                match &best {
                    Some((b, _)) if b.len() >= prefix.len() => {}
                    _ => best = Some((prefix.clone(), resolver.clone())),
                }
            }
        }
        best
    }

    fn enter(&self, path: &str) -> RefResult<()> {
        let mut in_flight = self.in_flight.lock().expect("in-flight lock");
        if !in_flight.insert(path.to_string()) {
            return Err(RefError::CircularRef(path.to_string()));
        }
        Ok(())
    }

    fn exit(&self, path: &str) {
        self.in_flight.lock().expect("in-flight lock").remove(path);
    }

    /// Resolve a reference against the model and the registered resolvers.
    pub async fn resolve(&self, project: &Project, reference: &Reference) -> RefResult<RefValue> {
        let path = reference.ref_path();
        self.enter(&path)?;
        let result = self.resolve_inner(project, reference).await;
        self.exit(&path);
        result
    }

    async fn resolve_inner(
        &self,
        project: &Project,
        reference: &Reference,
    ) -> RefResult<RefValue> {
        // Delegation first: a registered resolver owns its whole subtree.
        if let Some((prefix, resolver)) = self.longest_match(&reference.ref_path()) {
            debug!("Delegating {} to resolver at {}", reference.raw(), prefix);
            return resolver.resolve_ref(reference).await;
        }

        // Structural descent through the model.
        let parts: Vec<&str> = reference.parts.iter().map(String::as_str).collect();
        if let Some(node) = project.node_at(&parts) {
            return Ok(match node.as_scalar() {
                Some(s) => RefValue::Scalar(s.to_string()),
                None => RefValue::Node(reference.ref_path()),
            });
        }

        // The full path failed. When everything but the final segment names
        // a node, the tail is an attribute request nothing implements.
        let parent: Vec<&str> = parts[..parts.len() - 1].to_vec();
        if !parent.is_empty() && project.node_at(&parent).is_some() {
            return Err(RefError::RefTypeMismatch {
                reference: reference.raw().to_string(),
                attribute: reference.last_part().to_string(),
            });
        }

        // Report the first segment that fails to resolve.
        let mut failed = parts[0];
        for i in 1..=parts.len() {
            if project.node_at(&parts[..i]).is_none() {
                failed = parts[i - 1];
                break;
            }
        }
        Err(RefError::UnresolvedRef {
            reference: reference.raw().to_string(),
            segment: failed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paco_model::{Account, Project, ProjectManifest, ProjectPaths};
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

    struct ArnResolver;

    #[async_trait]
    impl RefResolver for ArnResolver {
        async fn resolve_ref(&self, reference: &Reference) -> RefResult<RefValue> {
            match reference.last_part() {
                "arn" => Ok(RefValue::Scalar("arn:aws:iam::123456789012:root".into())),
                other => Err(RefError::RefTypeMismatch {
                    reference: reference.raw().to_string(),
                    attribute: other.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_structural_scalar() {
        let registry = ResolverRegistry::new();
        let reference = Reference::parse("paco.ref accounts.dev.id").unwrap();
        let value = registry.resolve(&project(), &reference).await.unwrap();
        assert!(matches!(value, RefValue::Scalar(s) if s == "123456789012"));
    }

    #[tokio::test]
    async fn test_unresolved_segment() {
        let registry = ResolverRegistry::new();
        let reference = Reference::parse("paco.ref accounts.prod.id").unwrap();
        let err = registry.resolve(&project(), &reference).await.unwrap_err();
        assert!(matches!(err, RefError::UnresolvedRef { .. }));
    }

    #[tokio::test]
    async fn test_type_mismatch_on_unknown_attribute() {
        let registry = ResolverRegistry::new();
        let reference = Reference::parse("paco.ref accounts.dev.arn").unwrap();
        let err = registry.resolve(&project(), &reference).await.unwrap_err();
        assert!(matches!(err, RefError::RefTypeMismatch { attribute, .. } if attribute == "arn"));
    }

    #[tokio::test]
    async fn test_delegation_longest_prefix() {
        let registry = ResolverRegistry::new();
        registry.register("accounts.dev", Arc::new(ArnResolver));

        let reference = Reference::parse("paco.ref accounts.dev.arn").unwrap();
        let value = registry.resolve(&project(), &reference).await.unwrap();
        assert!(matches!(value, RefValue::Scalar(s) if s.starts_with("arn:")));

        // A delegated resolver also reports unknown attributes.
        let reference = Reference::parse("paco.ref accounts.dev.bogus").unwrap();
        let err = registry.resolve(&project(), &reference).await.unwrap_err();
        assert!(matches!(err, RefError::RefTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_circular_detection() {
        let registry = Arc::new(ResolverRegistry::new());

        // Simulate reentry: mark the path as in-flight, then resolve it.
        let reference = Reference::parse("paco.ref accounts.dev.id").unwrap();
        registry.enter(&reference.ref_path()).unwrap();
        let err = registry.resolve(&project(), &reference).await.unwrap_err();
        assert!(matches!(err, RefError::CircularRef(_)));
        registry.exit(&reference.ref_path());

        // After the cycle clears, resolution succeeds again.
        assert!(registry.resolve(&project(), &reference).await.is_ok());
    }
}
