//! # paco_refs
//!
//! Symbolic cross-resource references for paco.
//!
//! References have the form `paco.ref <type>.<dotted-path>[.<attr>]` where
//! `<type>` is one of `netenv`, `resource`, `service`, `accounts` or
//! `function`. Resolution walks the project model, delegating to resolver
//! objects registered for path prefixes so controllers and stacks can
//! answer runtime-valued attributes from live data.
//!
//! `paco.sub '<text>'` strings embed references with `${paco.ref ...}`
//! markers and are rewritten in a single pass.

pub mod error;
pub mod reference;
pub mod resolver;
pub mod sub;

pub use error::{RefError, RefResult};
pub use reference::{RefType, Reference};
pub use resolver::{OutputSource, RefResolver, RefValue, ResolverRegistry};
pub use sub::{sub_body, substitute};
