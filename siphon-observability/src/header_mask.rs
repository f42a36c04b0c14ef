//! Header masking for request/response log records.
//!
//! Every header in the input is resolved against a [`MaskTable`] exactly once
//! and the policy decides whether it is kept, emptied, digested or dropped.
//!
//! ```
//! use siphon_core::mask::{HeaderMaskPolicy, MaskTable};
//! use siphon_core::record::Headers;
//! use siphon_observability::header_mask::mask_headers;
//!
//! let headers: Headers = [
//!     ("Authorization", "Bearer aaa.bbb.ccc"),
//!     ("Accept", "application/json"),
//!     ("Cookie", "sid=1"),
//! ]
//! .into_iter()
//! .collect();
//! let table = MaskTable::new()
//!     .with("authorization", HeaderMaskPolicy::RedactBearerSignature)
//!     .with("accept", HeaderMaskPolicy::Preserve);
//!
//! // Strict: anything not listed in the table is dropped.
//! let masked = mask_headers(&headers, &table, true);
//! assert_eq!(masked.get("authorization").unwrap(), &["Bearer aaa.bbb".to_string()]);
//! assert!(masked.contains("accept"));
//! assert!(!masked.contains("cookie"));
//! ```

use crate::hasher::Digest;
use regex::Regex;
use siphon_core::mask::{HeaderMaskPolicy, MaskTable};
use siphon_core::record::Headers;
use std::sync::LazyLock;

/// `Bearer <header>.<payload>.<signature>`, capturing everything before the
/// final dot.
static BEARER_JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i:bearer)(\s+[A-Za-z0-9_=-]+\.[A-Za-z0-9_=-]+)\.[A-Za-z0-9_=-]*$")
        .expect("bearer pattern is valid")
});

/// Mask `headers` using SHA-1 digests.
pub fn mask_headers(headers: &Headers, table: &MaskTable, strict: bool) -> Headers {
    mask_headers_with(headers, table, strict, Digest::SHA1)
}

/// Mask `headers` with an explicit digest.
pub fn mask_headers_with(
    headers: &Headers,
    table: &MaskTable,
    strict: bool,
    digest: Digest,
) -> Headers {
    let mut masked = Headers::new();

    for (name, values) in headers.iter() {
        match table.policy_for(name) {
            HeaderMaskPolicy::Unset => {
                if !strict {
                    masked.extend_values(name, values.iter().cloned());
                }
            }
            HeaderMaskPolicy::Preserve => {
                masked.extend_values(name, values.iter().cloned());
            }
            HeaderMaskPolicy::Remove => {}
            HeaderMaskPolicy::RemoveValues => {
                masked.extend_values(name, Vec::<String>::new());
            }
            HeaderMaskPolicy::HashValues => {
                masked.extend_values(name, digest.hash_all(values));
            }
            HeaderMaskPolicy::HashHeaderAndValues => {
                let hashed_name = digest.hash(&name.to_ascii_lowercase());
                masked.extend_values(hashed_name, digest.hash_all(values));
            }
            HeaderMaskPolicy::RedactBearerSignature => {
                masked.extend_values(name, values.iter().map(|v| redact_bearer_signature(v)));
            }
        }
    }

    masked
}

/// Drop the signature segment of a bearer JWT. Values of any other shape are
/// returned unchanged.
pub fn redact_bearer_signature(value: &str) -> String {
    match BEARER_JWT.captures(value) {
        Some(caps) => {
            let keep = caps.get(1).map_or(value.len(), |m| m.end());
            value[..keep].to_string()
        }
        None => value.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────
