//! Deterministic AWS resource names.
//!
//! Stack and resource names are pure functions of model identity so that
//! repeated runs address the same AWS objects. Names that would exceed an
//! AWS identifier limit are truncated and suffixed with a short content
//! hash; limits differ per resource type and are kept as a lookup table.

use sha2::{Digest, Sha256};

/// AWS identifier length limits by resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Stack,
    IamRole,
    IamPolicy,
    SecurityGroup,
}

impl NameKind {
    pub fn limit(self) -> usize {
        match self {
            NameKind::Stack => 128,
            NameKind::IamRole => 64,
            NameKind::IamPolicy => 128,
            NameKind::SecurityGroup => 255,
        }
    }
}

/// CloudFormation stack names allow only alphanumerics and dashes and must
/// begin with a letter. Each model segment becomes a capitalized
/// alphanumeric run.
pub fn stack_name(segments: &[&str]) -> String {
    let mut name = String::new();
    for segment in segments {
        let part = camel(segment);
        if !part.is_empty() {
            if !name.is_empty() {
                name.push('-');
            }
            name.push_str(&part);
        }
    }
    if !name.chars().next().map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
        name.insert(0, 'P');
    }
    truncate(&name, NameKind::Stack)
}

fn camel(segment: &str) -> String {
    let mut out = String::new();
    let mut boundary = true;
    for c in segment.chars() {
        if c.is_ascii_alphanumeric() {
            if boundary {
                out.extend(c.to_uppercase());
            } else {
                out.push(c);
            }
            boundary = false;
        } else {
            boundary = true;
        }
    }
    out
}

/// Enforce a per-type length limit, keeping a prefix and appending a dash
/// plus eight hex characters of the full name's hash so truncated names
/// stay unique and stable.
pub fn truncate(name: &str, kind: NameKind) -> String {
    let limit = kind.limit();
    if name.len() <= limit {
        return name.to_string();
    }
    let digest = Sha256::digest(name.as_bytes());
    let suffix = hex::encode(&digest[..4]);
    // Back the cut off to a char boundary; callers are not obliged to
    // pass ASCII.
    let mut cut = limit - 9;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}-{}", &name[..cut], suffix)
}

/// Hash arbitrary content to a stable hex id. Used for hook cache ids and
/// template fingerprints.
pub fn content_id(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
