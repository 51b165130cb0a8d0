//! Parsed symbolic references.
//!
//! A reference is a string of the form `paco.ref <dotted.path>` pointing at
//! a node in the project model, or at a runtime attribute of one (`.arn`,
//! `.id`, `.name`). References are immutable after construction and
//! round-trip through `Display`.

use std::fmt;

use paco_model::{REF_SCHEME, SUB_SCHEME};

use crate::error::{RefError, RefResult};

/// The first path segment of a reference, naming the model subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefType {
    NetEnv,
    Resource,
    Service,
    Accounts,
    Function,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::NetEnv => "netenv",
            RefType::Resource => "resource",
            RefType::Service => "service",
            RefType::Accounts => "accounts",
            RefType::Function => "function",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "netenv" => Some(RefType::NetEnv),
            "resource" => Some(RefType::Resource),
            "service" => Some(RefType::Service),
            "accounts" => Some(RefType::Accounts),
            "function" => Some(RefType::Function),
            _ => None,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A parsed `paco.ref` pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub scheme: String,
    pub ref_type: RefType,
    pub parts: Vec<String>,
    pub region: Option<String>,
    pub account: Option<String>,
    raw: String,
}

impl Reference {
    /// Parse a normalized reference string: the scheme token, one space,
    /// then a dotted path.
    pub fn parse(raw: &str) -> RefResult<Self> {
        let (scheme, path) = raw
            .split_once(' ')
            .ok_or_else(|| RefError::MalformedRef(raw.to_string()))?;
        if scheme != REF_SCHEME {
            return Err(RefError::MalformedRef(raw.to_string()));
        }
        let parts: Vec<String> = path.split('.').map(str::to_string).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(RefError::MalformedRef(raw.to_string()));
        }
        let ref_type = RefType::parse(&parts[0])
            .ok_or_else(|| RefError::MalformedRef(raw.to_string()))?;

        // For netenv references the 4th segment is the region name:
        // netenv.<name>.<env>.<region>...
        let region = if ref_type == RefType::NetEnv {
            parts.get(3).cloned()
        } else {
            None
        };

        Ok(Self {
            scheme: scheme.to_string(),
            ref_type,
            parts,
            region,
            account: None,
            raw: raw.to_string(),
        })
    }

    /// True when the string looks like a reference or substitution.
    pub fn is_ref(s: &str) -> bool {
        s.starts_with(&format!("{} ", REF_SCHEME)) || s.starts_with(&format!("{} ", SUB_SCHEME))
    }

    /// The dotted path without the scheme.
    pub fn ref_path(&self) -> String {
        self.parts.join(".")
    }

    pub fn last_part(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    /// The original reference string.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Attach a region hint when the consuming stack knows its region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        if self.region.is_none() {
            self.region = Some(region.into());
        }
        self
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// The path with the final attribute segment removed.
    pub fn parent_path(&self) -> String {
        self.parts[..self.parts.len().saturating_sub(1)].join(".")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_netenv_ref() {
        let r = Reference::parse("paco.ref netenv.mynet.dev.us-west-2.applications.app").unwrap();
        assert_eq!(r.ref_type, RefType::NetEnv);
        assert_eq!(r.region.as_deref(), Some("us-west-2"));
        assert_eq!(r.last_part(), "app");
        assert_eq!(r.parts.len(), 6);
    }

    #[test]
    fn test_parse_round_trip() {
        let raw = "paco.ref resource.s3.buckets.logs.arn";
        let r = Reference::parse(raw).unwrap();
        assert_eq!(r.to_string(), raw);
    }

    #[test]
    fn test_parse_rejects_bad_scheme() {
        assert!(Reference::parse("other.ref netenv.x").is_err());
        assert!(Reference::parse("paco.ref").is_err());
        assert!(Reference::parse("paco.ref netenv..x").is_err());
        assert!(Reference::parse("paco.ref unknown.x").is_err());
    }

    #[test]
    fn test_is_ref() {
        assert!(Reference::is_ref("paco.ref accounts.dev"));
        assert!(Reference::is_ref("paco.sub 'x ${paco.ref accounts.dev.id}'"));
        assert!(!Reference::is_ref("arn:aws:s3:::bucket"));
    }

    #[test]
    fn test_region_hint_does_not_override() {
        let r = Reference::parse("paco.ref netenv.n.dev.eu-west-1.applications.a")
            .unwrap()
            .with_region("us-west-2");
        assert_eq!(r.region.as_deref(), Some("eu-west-1"));

        let r = Reference::parse("paco.ref accounts.dev")
            .unwrap()
            .with_region("us-west-2");
        assert_eq!(r.region.as_deref(), Some("us-west-2"));
    }
}
