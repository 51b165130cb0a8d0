//! Stack template bodies and canonicalization.
//!
//! Template bodies are opaque strings as far as the engine is concerned.
//! Change detection compares canonical forms: parsed YAML with mapping keys
//! sorted, re-serialized. Canonicalization of an already-canonical body is
//! a fixed point, so declared and deployed templates diff reliably even
//! when CloudFormation reformats what it stores.

use paco_aws::Capability;
use tracing::warn;

/// CloudFormation rejects template bodies over this size on direct upload.
pub const MAX_TEMPLATE_BODY_BYTES: usize = 51_200;

#[derive(Debug, Clone)]
pub struct StackTemplate {
    body: String,
    capabilities: Vec<Capability>,
}

impl StackTemplate {
    pub fn new(body: impl Into<String>) -> Self {
        let body = body.into();
        if body.len() > MAX_TEMPLATE_BODY_BYTES {
            warn!(
                "Template body is {} bytes, over the {} byte direct-upload limit",
                body.len(),
                MAX_TEMPLATE_BODY_BYTES
            );
        }
        Self {
            body,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn canonical(&self) -> String {
        canonicalize(&self.body)
    }
}

/// Normalized serialization of a template body used for diffing.
///
/// Bodies that do not parse as YAML are compared as trimmed text.
pub fn canonicalize(body: &str) -> String {
    match serde_yaml::from_str::<serde_yaml::Value>(body) {
        Ok(value) => {
            let sorted = sort_value(value);
            serde_yaml::to_string(&sorted).unwrap_or_else(|_| body.trim().to_string())
        }
        Err(_) => body.trim().to_string(),
    }
}

fn sort_value(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(map) => {
            let mut entries: Vec<(serde_yaml::Value, serde_yaml::Value)> = map
                .into_iter()
                .map(|(k, v)| (k, sort_value(v)))
                .collect();
            entries.sort_by(|(a, _), (b, _)| key_text(a).cmp(&key_text(b)));
            serde_yaml::Value::Mapping(entries.into_iter().collect())
        }
        serde_yaml::Value::Sequence(seq) => {
            serde_yaml::Value::Sequence(seq.into_iter().map(sort_value).collect())
        }
        serde_yaml::Value::Tagged(tagged) => {
            serde_yaml::Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                tag: tagged.tag.clone(),
                value: sort_value(tagged.value),
            }))
        }
        other => other,
    }
}

fn key_text(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

/// Line-oriented diff summary between two canonical bodies, for
/// `validate` reporting. Not a minimal diff; lines only in one side.
pub fn diff_summary(deployed: &str, declared: &str) -> Vec<String> {
    let deployed_lines: Vec<&str> = deployed.lines().collect();
    let declared_lines: Vec<&str> = declared.lines().collect();
    let mut out = Vec::new();
    for line in &declared_lines {
        if !deployed_lines.contains(line) {
            out.push(format!("+ {}", line));
        }
    }
    for line in &deployed_lines {
        if !declared_lines.contains(line) {
            out.push(format!("- {}", line));
        }
    }
    out
}
