//! Record sanitisation: header masking plus optional body redaction.
//!
//! A [`Sanitizer`] is built once from configuration and then applied to every
//! record before it is enqueued.
//!
//! ```
//! use siphon_core::record::{LogRecord, RequestRecord, ResponseRecord};
//! use siphon_observability::sanitizer::Sanitizer;
//!
//! let mut request = RequestRecord::new("GET", "http://api.test/");
//! request.headers.append("Cookie", "sid=abc");
//! request.body = "card=4111111111111111".into();
//! let record = LogRecord::new(request, ResponseRecord::new(200), 1.0);
//!
//! let sanitizer = Sanitizer::sensitive_defaults()
//!     .with_request_body(|_| "[REDACTED]".to_string());
//! let clean = sanitizer.sanitize(record);
//!
//! assert_ne!(clean.request.headers.get("cookie").unwrap()[0], "sid=abc");
//! assert_eq!(clean.request.body, "[REDACTED]");
//! ```

use crate::hasher::Digest;
use crate::header_mask::mask_headers_with;
use siphon_core::config::MaskingConfig;
use siphon_core::mask::MaskTable;
use siphon_core::record::LogRecord;
use std::fmt;
use std::sync::Arc;

/// Body transform applied to a request or response body.
pub type BodyRedactor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Transforms raw log records into records safe to ship.
///
/// Header tables are optional: without one, that direction's headers are left
/// untouched regardless of the strict flag. Masking `HashValues` headers twice
/// hashes them twice, so a record must only pass through once.
#[derive(Clone, Default)]
pub struct Sanitizer {
    request_table: Option<MaskTable>,
    request_strict: bool,
    response_table: Option<MaskTable>,
    response_strict: bool,
    request_body: Option<BodyRedactor>,
    response_body: Option<BodyRedactor>,
    digest: Digest,
}

impl Sanitizer {
    /// A sanitizer that returns every record unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the values of credential-bearing request headers, leave the rest.
    pub fn sensitive_defaults() -> Self {
        Self::new().with_request_table(MaskTable::sensitive_defaults(), false)
    }

    pub fn from_config(config: &MaskingConfig) -> Self {
        Self {
            request_table: config.request_table(),
            request_strict: config.request_strict(),
            response_table: config.response_table(),
            response_strict: config.response_strict(),
            request_body: None,
            response_body: None,
            digest: Digest::new(config.digest),
        }
    }

    pub fn with_request_table(mut self, table: MaskTable, strict: bool) -> Self {
        self.request_table = Some(table);
        self.request_strict = strict;
        self
    }

    pub fn with_response_table(mut self, table: MaskTable, strict: bool) -> Self {
        self.response_table = Some(table);
        self.response_strict = strict;
        self
    }

    pub fn with_request_body<F>(mut self, redact: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.request_body = Some(Arc::new(redact));
        self
    }

    pub fn with_response_body<F>(mut self, redact: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.response_body = Some(Arc::new(redact));
        self
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.digest = digest;
        self
    }

    /// Return a redacted copy of `record`. Fields other than headers and
    /// bodies, including `created_at`, are carried over as-is.
    pub fn sanitize(&self, mut record: LogRecord) -> LogRecord {
        if let Some(table) = &self.request_table {
            record.request.headers =
                mask_headers_with(&record.request.headers, table, self.request_strict, self.digest);
        }
        if let Some(table) = &self.response_table {
            record.response.headers = mask_headers_with(
                &record.response.headers,
                table,
                self.response_strict,
                self.digest,
            );
        }
        if let Some(redact) = &self.request_body {
            record.request.body = redact(&record.request.body);
        }
        if let Some(redact) = &self.response_body {
            record.response.body = redact(&record.response.body);
        }
        record
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer")
            .field("request_table", &self.request_table)
            .field("request_strict", &self.request_strict)
            .field("response_table", &self.response_table)
            .field("response_strict", &self.response_strict)
            .field("request_body", &self.request_body.is_some())
            .field("response_body", &self.response_body.is_some())
            .field("digest", &self.digest)
            .finish()
    }
}
