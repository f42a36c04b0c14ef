//! The structured log record emitted once per handled request/response pair.
//!
//! Field names on the wire follow the collector's logging schema (camelCase,
//! `version` / `dateCreated` / `executionTime`), so a record serialised here
//! can be posted without any further mapping.

use crate::error::SiphonError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Version tag of the logging schema written into every record.
pub const SCHEMA_VERSION: &str = "1.0.0-alpha";

static LAST_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock milliseconds since the UNIX epoch, never smaller than a value
/// previously returned in this process.
pub fn now_millis() -> i64 {
    let wall = Utc::now().timestamp_millis();
    let prev = LAST_TIMESTAMP_MS.fetch_max(wall, Ordering::AcqRel);
    prev.max(wall)
}

// ─────────────────────────────────────────────────────────────
// Headers
// ─────────────────────────────────────────────────────────────

/// Multi-valued header map with case-insensitive names.
///
/// The first spelling seen for a name is kept; later values under any casing
/// of the same name are appended to that entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>")]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(&self, name: &str) -> Option<String> {
        if self.0.contains_key(name) {
            return Some(name.to_string());
        }
        self.0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Append one value under `name`.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = self.key_for(&name).unwrap_or(name);
        self.0.entry(key).or_default().push(value.into());
    }

    /// Append several values under `name`, creating the entry even when
    /// `values` is empty.
    pub fn extend_values<I, S>(&mut self, name: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let key = self.key_for(&name).unwrap_or(name);
        self.0
            .entry(key)
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Replace every value under `name`.
    pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        let key = self.key_for(&name).unwrap_or(name);
        self.0.insert(key, values);
    }

    /// Values for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[String]> {
        let key = self.key_for(name)?;
        self.0.get(&key).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.key_for(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self.key_for(name)?;
        self.0.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl From<BTreeMap<String, Vec<String>>> for Headers {
    fn from(raw: BTreeMap<String, Vec<String>>) -> Self {
        let mut headers = Headers::new();
        for (name, values) in raw {
            headers.extend_values(name, values);
        }
        headers
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// Non UTF-8 header values are recorded lossily rather than dropped.
impl From<&http::HeaderMap> for Headers {
    fn from(map: &http::HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }
}

// ─────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────

/// HTTP protocol version of the logged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpProtocol {
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[serde(rename = "HTTP/1.1")]
    Http11,
    #[serde(rename = "HTTP/2")]
    Http2,
    #[serde(rename = "HTTP/3")]
    Http3,
}

impl From<http::Version> for HttpProtocol {
    fn from(version: http::Version) -> Self {
        match version {
            http::Version::HTTP_10 | http::Version::HTTP_09 => HttpProtocol::Http10,
            http::Version::HTTP_2 => HttpProtocol::Http2,
            http::Version::HTTP_3 => HttpProtocol::Http3,
            _ => HttpProtocol::Http11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub http_protocol: HttpProtocol,
    /// Absolute URI the request was made to.
    pub uri: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    /// Request body, stringified.
    #[serde(default)]
    pub body: String,
    /// Source IP of the request.
    #[serde(default)]
    pub ip: String,
    /// Path template of the matched resource, e.g. `/pets/{id}`.
    #[serde(default)]
    pub resource: String,
}

impl RequestRecord {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            http_protocol: HttpProtocol::Http11,
            uri: uri.into(),
            method: method.into(),
            headers: Headers::new(),
            body: String::new(),
            ip: String::new(),
            resource: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
}

impl ResponseRecord {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
            body: String::new(),
        }
    }
}

/// One entry per handled request.
///
/// `created_at` is fixed at construction; there is no setter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "version")]
    pub schema_version: String,
    #[serde(rename = "dateCreated")]
    created_at: i64,
    /// Time the downstream handler took, in milliseconds.
    #[serde(rename = "executionTime")]
    pub execution_time_ms: f64,
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

impl LogRecord {
    /// Create a record stamped with the current [`now_millis`].
    pub fn new(request: RequestRecord, response: ResponseRecord, execution_time_ms: f64) -> Self {
        Self::with_created_at(now_millis(), request, response, execution_time_ms)
    }

    /// Create a record with an explicit creation timestamp (ms since epoch).
    pub fn with_created_at(
        created_at: i64,
        request: RequestRecord,
        response: ResponseRecord,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at,
            execution_time_ms,
            request,
            response,
        }
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Check the invariants a collector relies on.
    pub fn validate(&self) -> Result<(), SiphonError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(SiphonError::InvalidRecord(format!(
                "unsupported schema version {:?}",
                self.schema_version
            )));
        }
        if self.created_at < 0 {
            return Err(SiphonError::InvalidRecord(format!(
                "dateCreated must not be negative, got {}",
                self.created_at
            )));
        }
        if !self.execution_time_ms.is_finite() || self.execution_time_ms < 0.0 {
            return Err(SiphonError::InvalidRecord(format!(
                "executionTime must be a non-negative number, got {}",
                self.execution_time_ms
            )));
        }
        if http::Method::from_bytes(self.request.method.as_bytes()).is_err() {
            return Err(SiphonError::InvalidRecord(format!(
                "invalid request method {:?}",
                self.request.method
            )));
        }
        if !(100..=599).contains(&self.response.status_code) {
            return Err(SiphonError::InvalidRecord(format!(
                "status code {} out of range",
                self.response.status_code
            )));
        }
        Ok(())
    }

    /// Serialise to compact JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, SiphonError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a record.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SiphonError> {
        let record: LogRecord = serde_json::from_slice(bytes)?;
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogRecord {
        let mut request = RequestRecord::new("POST", "http://example.test/not-real");
        request.http_protocol = HttpProtocol::Http2;
        request.headers.append("Content-Type", "text/plain");
        request.body = "this is a request body".into();
        request.ip = "8.8.8.8".into();
        request.resource = "/not-real".into();

        let mut response = ResponseRecord::new(200);
        response.headers.append("Content-Type", "text/plain");
        response.body = "this is a response body".into();

        LogRecord::with_created_at(1666356293610, request, response, 425.0)
    }

    // ── Headers ──────────────────────────────────────────────────

    #[test]
    fn append_folds_case_variants_into_one_entry() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html");
        headers.append("accept", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get("ACCEPT").unwrap(),
            &["text/html".to_string(), "application/json".to_string()]
        );
        // First spelling wins.
        assert_eq!(headers.iter().next().unwrap().0, "Accept");
    }

    #[test]
    fn duplicate_values_are_kept() {
        let headers: Headers = [("x-dup", "a"), ("x-dup", "a")].into_iter().collect();
        assert_eq!(headers.get("x-dup").unwrap().len(), 2);
    }

    #[test]
    fn extend_values_creates_empty_entry() {
        let mut headers = Headers::new();
        headers.extend_values("x-empty", Vec::<String>::new());
        assert!(headers.contains("X-Empty"));
        assert!(headers.get("x-empty").unwrap().is_empty());
    }

    #[test]
    fn deserialize_merges_case_variant_keys() {
        let json = r#"{"Set-Cookie":["a=1"],"set-cookie":["b=2"]}"#;
        let headers: Headers = serde_json::from_str(json).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("set-cookie").unwrap().len(), 2);
    }

    #[test]
    fn from_http_header_map_keeps_multiple_values() {
        let mut map = http::HeaderMap::new();
        map.append("x-forwarded-for", "10.0.0.1".parse().unwrap());
        map.append("x-forwarded-for", "10.0.0.2".parse().unwrap());
        let headers = Headers::from(&map);
        assert_eq!(headers.get("X-Forwarded-For").unwrap().len(), 2);
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut headers: Headers = [("Cookie", "a")].into_iter().collect();
        assert_eq!(headers.remove("cookie"), Some(vec!["a".to_string()]));
        assert!(headers.is_empty());
    }

    // ── Record ───────────────────────────────────────────────────

    #[test]
    fn marshal_unmarshal_yields_same_record_and_bytes() {
        let record = sample();
        let bytes = record.to_json().unwrap();
        let parsed = LogRecord::from_json(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.to_json().unwrap(), bytes);
    }

    #[test]
    fn wire_field_names_follow_schema() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["version"], SCHEMA_VERSION);
        assert_eq!(value["dateCreated"], 1666356293610i64);
        assert_eq!(value["executionTime"], 425.0);
        assert_eq!(value["request"]["httpProtocol"], "HTTP/2");
        assert_eq!(value["request"]["headers"]["Content-Type"][0], "text/plain");
        assert_eq!(value["response"]["statusCode"], 200);
    }

    #[test]
    fn new_stamps_current_time() {
        let before = now_millis();
        let record = LogRecord::new(
            RequestRecord::new("GET", "http://a/"),
            ResponseRecord::new(204),
            1.0,
        );
        assert!(record.created_at() >= before);
    }

    #[test]
    fn now_millis_never_goes_backwards() {
        let mut prev = now_millis();
        for _ in 0..1000 {
            let next = now_millis();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn validate_rejects_bad_status() {
        let mut record = sample();
        record.response.status_code = 42;
        assert!(record.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_method() {
        let mut record = sample();
        record.request.method = "GE T".into();
        assert!(record.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_execution_time() {
        let mut record = sample();
        record.execution_time_ms = -1.0;
        assert!(record.validate().is_err());
        record.execution_time_ms = f64::NAN;
        assert!(record.validate().is_err());
    }

    #[test]
    fn from_json_rejects_unknown_schema_version() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["version"] = "2.0.0".into();
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(LogRecord::from_json(&bytes).is_err());
    }

    #[test]
    fn from_json_rejects_unknown_protocol() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["request"]["httpProtocol"] = "SPDY/3".into();
        let bytes = serde_json::to_vec(&value).unwrap();
        assert!(LogRecord::from_json(&bytes).is_err());
    }
}
