use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a single header is treated before a record leaves the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMaskPolicy {
    /// Removed under strict masking, passed through otherwise.
    #[default]
    Unset,
    /// Passed through as received.
    Preserve,
    /// Dropped entirely.
    Remove,
    /// Header kept, every value removed.
    RemoveValues,
    /// Every value replaced by its digest.
    HashValues,
    /// Header name and every value replaced by their digests.
    HashHeaderAndValues,
    /// `Bearer <header>.<payload>.<signature>` values lose their signature segment.
    RedactBearerSignature,
}

impl HeaderMaskPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderMaskPolicy::Unset => "unset",
            HeaderMaskPolicy::Preserve => "preserve",
            HeaderMaskPolicy::Remove => "remove",
            HeaderMaskPolicy::RemoveValues => "remove_values",
            HeaderMaskPolicy::HashValues => "hash_values",
            HeaderMaskPolicy::HashHeaderAndValues => "hash_header_and_values",
            HeaderMaskPolicy::RedactBearerSignature => "redact_bearer_signature",
        }
    }
}

impl std::fmt::Display for HeaderMaskPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request headers that carry credentials or session state.
pub const SENSITIVE_REQUEST_HEADERS: &[&str] = &[
    "set-cookie",
    "cookie",
    "authorization",
    "x-api-key",
    "token",
    "api-token",
    "api-key",
];

/// Header name → policy. Names are stored lower-cased, so lookups are
/// case-insensitive; a missing entry resolves to [`HeaderMaskPolicy::Unset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, HeaderMaskPolicy>")]
pub struct MaskTable(HashMap<String, HeaderMaskPolicy>);

impl MaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the values of every header in [`SENSITIVE_REQUEST_HEADERS`].
    pub fn sensitive_defaults() -> Self {
        SENSITIVE_REQUEST_HEADERS
            .iter()
            .map(|name| (*name, HeaderMaskPolicy::HashValues))
            .collect()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, policy: HeaderMaskPolicy) {
        self.0.insert(name.as_ref().to_ascii_lowercase(), policy);
    }

    pub fn with(mut self, name: impl AsRef<str>, policy: HeaderMaskPolicy) -> Self {
        self.insert(name, policy);
        self
    }

    /// Resolve the policy for `name` (case-insensitive).
    pub fn policy_for(&self, name: &str) -> HeaderMaskPolicy {
        if let Some(policy) = self.0.get(name) {
            return *policy;
        }
        self.0
            .get(&name.to_ascii_lowercase())
            .copied()
            .unwrap_or_default()
    }

    /// Add entries from `other` that this table does not already define.
    pub fn merge_missing(&mut self, other: &MaskTable) {
        for (name, policy) in &other.0 {
            self.0.entry(name.clone()).or_insert(*policy);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, HeaderMaskPolicy)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl From<HashMap<String, HeaderMaskPolicy>> for MaskTable {
    fn from(raw: HashMap<String, HeaderMaskPolicy>) -> Self {
        raw.into_iter().collect()
    }
}

impl<K: AsRef<str>> FromIterator<(K, HeaderMaskPolicy)> for MaskTable {
    fn from_iter<I: IntoIterator<Item = (K, HeaderMaskPolicy)>>(iter: I) -> Self {
        let mut table = MaskTable::new();
        for (name, policy) in iter {
            table.insert(name, policy);
        }
        table
    }
}
