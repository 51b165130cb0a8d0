//! Stack hooks.
//!
//! Hooks interleave side-effects with CloudFormation transitions: a hook is
//! a callable registered for one `(action, timing)` pair on one stack.
//! Hooks may carry a cache callable returning a deterministic string; the
//! engine persists the combined id for each pair after a successful run and
//! skips cache-keyed hooks whose id is unchanged. Hooks without a cache
//! callable always run.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{StackError, StackResult};
use crate::names::content_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for HookAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookAction::Create => write!(f, "create"),
            HookAction::Update => write!(f, "update"),
            HookAction::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookTiming {
    Pre,
    Post,
}

impl fmt::Display for HookTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTiming::Pre => write!(f, "pre"),
            HookTiming::Post => write!(f, "post"),
        }
    }
}

/// The hook body. Runs at its registered point in the stack transition.
#[async_trait]
pub trait HookFn: Send + Sync {
    async fn run(&self) -> StackResult<()>;
}

/// Content key for skip detection. Must be a pure function of the hook's
/// inputs (file contents, key material), never of time or randomness.
#[async_trait]
pub trait HookCacheFn: Send + Sync {
    async fn cache_id(&self) -> StackResult<String>;
}

pub struct StackHook {
    pub name: String,
    pub action: HookAction,
    pub timing: HookTiming,
    pub body: Arc<dyn HookFn>,
    pub cache: Option<Arc<dyn HookCacheFn>>,
}

/// All hooks registered on one stack, invoked in registration order.
#[derive(Default)]
pub struct StackHooks {
    hooks: Vec<StackHook>,
}

impl StackHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        action: HookAction,
        timing: HookTiming,
        body: Arc<dyn HookFn>,
        cache: Option<Arc<dyn HookCacheFn>>,
    ) {
        self.hooks.push(StackHook {
            name: name.into(),
            action,
            timing,
            body,
            cache,
        });
    }

    pub fn merge(&mut self, other: StackHooks) {
        self.hooks.extend(other.hooks);
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn matching(&self, action: HookAction, timing: HookTiming) -> Vec<&StackHook> {
        self.hooks
            .iter()
            .filter(|h| h.action == action && h.timing == timing)
            .collect()
    }

    /// Combined cache id for a pair: hash of every cache callable's result
    /// in registration order. `None` when no hook in the pair is keyed.
    pub async fn cache_id(
        &self,
        action: HookAction,
        timing: HookTiming,
    ) -> StackResult<Option<String>> {
        let mut keyed = false;
        let mut combined = String::new();
        for hook in self.matching(action, timing) {
            if let Some(cache) = &hook.cache {
                keyed = true;
                combined.push_str(&cache.cache_id().await?);
                combined.push('\n');
            }
        }
        Ok(keyed.then(|| content_id(combined.as_bytes())))
    }

    /// Run the pair's hooks. When `last_cache_id` equals the current id,
    /// cache-keyed hooks are skipped and only unkeyed hooks run.
    ///
    /// Returns the cache id to persist on success.
    pub async fn run(
        &self,
        stack_name: &str,
        action: HookAction,
        timing: HookTiming,
        last_cache_id: Option<&str>,
    ) -> StackResult<Option<String>> {
        let current = self.cache_id(action, timing).await?;
        let skip_keyed = match (&current, last_cache_id) {
            (Some(current), Some(last)) => current == last,
            _ => false,
        };
        for hook in self.matching(action, timing) {
            if skip_keyed && hook.cache.is_some() {
                info!(
                    "Hook {} on {} skipped: {}-{} content unchanged",
                    hook.name, stack_name, timing, action
                );
                continue;
            }
            debug!("Running {}-{} hook {} on {}", timing, action, hook.name, stack_name);
            hook.body.run().await.map_err(|e| StackError::HookFailed {
                hook: hook.name.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(current)
    }
}

/// Persisted map of `"<action>:<timing>"` to last successful cache id.
pub type HookCacheMap = BTreeMap<String, String>;

pub fn cache_key(action: HookAction, timing: HookTiming) -> String {
    format!("{}:{}", action, timing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl HookFn for Counter {
        async fn run(&self) -> StackResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedCache(String);

    #[async_trait]
    impl HookCacheFn for FixedCache {
        async fn cache_id(&self) -> StackResult<String> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl HookFn for Failing {
        async fn run(&self) -> StackResult<()> {
            Err(StackError::HookFailed {
                hook: "inner".to_string(),
                message: "boom".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_keyed_hook_skipped_when_unchanged() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut hooks = StackHooks::new();
        hooks.add(
            "keys",
            HookAction::Create,
            HookTiming::Post,
            Arc::new(Counter(runs.clone())),
            Some(Arc::new(FixedCache("abc".to_string()))),
        );

        let id = hooks
            .run("S", HookAction::Create, HookTiming::Post, None)
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Same cache id: skipped.
        let id2 = hooks
            .run("S", HookAction::Create, HookTiming::Post, id.as_deref())
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(id, id2);
    }

    #[tokio::test]
    async fn test_changed_cache_id_reruns() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut hooks = StackHooks::new();
        hooks.add(
            "keys",
            HookAction::Create,
            HookTiming::Post,
            Arc::new(Counter(runs.clone())),
            Some(Arc::new(FixedCache("new".to_string()))),
        );

        hooks
            .run("S", HookAction::Create, HookTiming::Post, Some("old-id"))
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unkeyed_hook_always_runs() {
        let runs = Arc::new(AtomicU32::new(0));
        let mut hooks = StackHooks::new();
        hooks.add(
            "notify",
            HookAction::Update,
            HookTiming::Pre,
            Arc::new(Counter(runs.clone())),
            None,
        );

        let id = hooks
            .run("S", HookAction::Update, HookTiming::Pre, None)
            .await
            .unwrap();
        assert!(id.is_none());
        hooks
            .run("S", HookAction::Update, HookTiming::Pre, None)
            .await
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_carries_hook_name() {
        let mut hooks = StackHooks::new();
        hooks.add("broken", HookAction::Delete, HookTiming::Pre, Arc::new(Failing), None);
        let err = hooks
            .run("S", HookAction::Delete, HookTiming::Pre, None)
            .await
            .unwrap_err();
        match err {
            StackError::HookFailed { hook, .. } => assert_eq!(hook, "broken"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_only_matching_pair_runs() {
        let create_runs = Arc::new(AtomicU32::new(0));
        let delete_runs = Arc::new(AtomicU32::new(0));
        let mut hooks = StackHooks::new();
        hooks.add(
            "c",
            HookAction::Create,
            HookTiming::Post,
            Arc::new(Counter(create_runs.clone())),
            None,
        );
        hooks.add(
            "d",
            HookAction::Delete,
            HookTiming::Pre,
            Arc::new(Counter(delete_runs.clone())),
            None,
        );

        hooks
            .run("S", HookAction::Create, HookTiming::Post, None)
            .await
            .unwrap();
        assert_eq!(create_runs.load(Ordering::SeqCst), 1);
        assert_eq!(delete_runs.load(Ordering::SeqCst), 0);
    }
}
