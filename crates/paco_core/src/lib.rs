//! # paco_core
//!
//! The stack orchestration engine: per-stack reconciliation against
//! CloudFormation, content-keyed hooks, and phase-ordered stack groups.

pub mod error;
pub mod group;
pub mod hooks;
pub mod names;
pub mod outputs;
pub mod param;
pub mod stack;
pub mod template;
pub mod testing;

pub use error::{StackError, StackResult};
pub use group::{GroupItem, ManagedStackEntry, StackGroup, StackOrder};
pub use hooks::{cache_key, HookAction, HookCacheFn, HookFn, HookTiming, StackHook, StackHooks};
pub use outputs::{StackStateRecord, StackStateStore};
pub use param::{resolve_parameters, ParamValue, Parameter};
pub use stack::{PollConfig, Stack, StackBuilder, StackFlags, STACK_NAME_TAG};
pub use template::{canonicalize, diff_summary, StackTemplate};
