use crate::error::SiphonError;
use crate::mask::MaskTable;
use figment::{Figment, providers::{Env, Format, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiphonConfig {
    #[serde(default)]
    pub shipper: ShipperConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub masking: MaskingConfig,
}

/// Batch assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipperConfig {
    /// Upper bound on the summed size of serialised records in one batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size_bytes: usize,
    /// A batch is flushed once its oldest record is older than this.
    #[serde(default = "default_max_record_age")]
    pub max_record_age_ms: u64,
    #[serde(default)]
    pub queue: QueuePolicy,
}

/// How records wait between producers and the batch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum QueuePolicy {
    /// Bounded; producers wait for free capacity.
    Block {
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
    },
    /// Bounded; when full the incoming record is dropped.
    DropNewest {
        #[serde(default = "default_queue_capacity")]
        capacity: usize,
    },
    /// No bound; producers never wait.
    Unbounded,
}

/// Collector endpoint and delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Empty disables shipping: batches are accepted and discarded.
    #[serde(default)]
    pub url: String,
    /// Empty disables shipping.
    #[serde(default)]
    pub api_key: String,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryStrategy,
    #[serde(default)]
    pub spill: SpillConfig,
}

/// Delivery attempts per batch and the pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Retry straight away.
    Immediate { attempts: u32 },
    /// Wait `delay_ms` between attempts.
    LinearBackoff { attempts: u32, delay_ms: u64 },
    /// Wait `base_ms * 2^(n-1)` after attempt `n`, capped at `max_ms`.
    ExponentialBackoff { attempts: u32, base_ms: u64, max_ms: u64 },
}

/// On-disk fallback for batches whose delivery attempts are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpillConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_spill_path")]
    pub file_path: PathBuf,
    /// 0 = size-based rotation disabled.
    #[serde(default = "default_spill_max_size")]
    pub max_file_size_bytes: u64,
    /// 0 = keep every rotated file.
    #[serde(default = "default_spill_max_rotated")]
    pub max_rotated_files: usize,
}

/// Header and body redaction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskingConfig {
    #[serde(default)]
    pub digest: DigestAlgorithm,
    /// Merge [`MaskTable::sensitive_defaults`] under the request table.
    #[serde(default)]
    pub use_sensitive_defaults: bool,
    #[serde(default)]
    pub request: Option<HeaderMaskConfig>,
    #[serde(default)]
    pub response: Option<HeaderMaskConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderMaskConfig {
    /// Only report headers explicitly listed in `headers`.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub headers: MaskTable,
}

/// Digest used to pseudonymise header names and values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_max_batch_size() -> usize { 512 * 1024 }
fn default_max_record_age() -> u64 { 1000 }
fn default_queue_capacity() -> usize { 1 }
fn default_timeout() -> u64 { 5000 }
fn default_retry_attempts() -> u32 { 3 }
fn default_spill_path() -> PathBuf { PathBuf::from("siphon-spill.ndjson") }
fn default_spill_max_size() -> u64 { 100 * 1024 * 1024 }
fn default_spill_max_rotated() -> usize { 10 }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            max_batch_size_bytes: default_max_batch_size(),
            max_record_age_ms: default_max_record_age(),
            queue: QueuePolicy::default(),
        }
    }
}

impl ShipperConfig {
    pub fn max_record_age(&self) -> Duration {
        Duration::from_millis(self.max_record_age_ms)
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        QueuePolicy::Block {
            capacity: default_queue_capacity(),
        }
    }
}

impl QueuePolicy {
    /// Channel capacity; `None` for unbounded. A zero capacity is raised to 1.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            QueuePolicy::Block { capacity } | QueuePolicy::DropNewest { capacity } => {
                Some((*capacity).max(1))
            }
            QueuePolicy::Unbounded => None,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            timeout_ms: default_timeout(),
            retry: RetryStrategy::default(),
            spill: SpillConfig::default(),
        }
    }
}

impl CollectorConfig {
    /// Shipping is disabled when either the URL or the API key is empty.
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty() && !self.api_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate {
            attempts: default_retry_attempts(),
        }
    }
}

impl RetryStrategy {
    /// Total attempts, never less than one.
    pub fn max_attempts(&self) -> u32 {
        let attempts = match self {
            RetryStrategy::Immediate { attempts }
            | RetryStrategy::LinearBackoff { attempts, .. }
            | RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Pause after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Immediate { .. } => Duration::ZERO,
            RetryStrategy::LinearBackoff { delay_ms, .. } => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff { base_ms, max_ms, .. } => {
                let shift = attempt.saturating_sub(1).min(32);
                let delay = base_ms.saturating_mul(1u64 << shift);
                Duration::from_millis(delay.min(*max_ms))
            }
        }
    }
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file_path: default_spill_path(),
            max_file_size_bytes: default_spill_max_size(),
            max_rotated_files: default_spill_max_rotated(),
        }
    }
}

impl MaskingConfig {
    /// Effective request table, with sensitive defaults merged in when enabled.
    pub fn request_table(&self) -> Option<MaskTable> {
        let explicit = self.request.as_ref().map(|r| r.headers.clone());
        if !self.use_sensitive_defaults {
            return explicit;
        }
        let mut table = explicit.unwrap_or_default();
        table.merge_missing(&MaskTable::sensitive_defaults());
        Some(table)
    }

    pub fn request_strict(&self) -> bool {
        self.request.as_ref().is_some_and(|r| r.strict)
    }

    pub fn response_table(&self) -> Option<MaskTable> {
        self.response.as_ref().map(|r| r.headers.clone())
    }

    pub fn response_strict(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.strict)
    }
}

impl SiphonConfig {
    /// Load configuration from a YAML file + `SIPHON_` env overrides
    /// (nested keys separated by `__`, e.g. `SIPHON_COLLECTOR__URL`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config: SiphonConfig = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("SIPHON_").split("__"))
            .extract()
            .map_err(|e| SiphonError::ConfigError(e.to_string()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::HeaderMaskPolicy;
    use std::io::Write;

    // ── Default values ────────────────────────────────────────────

    #[test]
    fn default_shipper_config_has_expected_values() {
        let cfg = ShipperConfig::default();
        assert_eq!(cfg.max_batch_size_bytes, 512 * 1024);
        assert_eq!(cfg.max_record_age(), Duration::from_secs(1));
        assert_eq!(cfg.queue, QueuePolicy::Block { capacity: 1 });
    }

    #[test]
    fn default_collector_is_disabled() {
        let cfg = CollectorConfig::default();
        assert!(!cfg.is_enabled());
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.retry, RetryStrategy::Immediate { attempts: 3 });
        assert!(!cfg.spill.enabled);
    }

    #[test]
    fn collector_needs_both_url_and_key() {
        let mut cfg = CollectorConfig::default();
        cfg.url = "https://collector.test".into();
        assert!(!cfg.is_enabled());
        cfg.api_key = "key".into();
        assert!(cfg.is_enabled());
    }

    #[test]
    fn default_masking_is_sha1_without_tables() {
        let cfg = MaskingConfig::default();
        assert_eq!(cfg.digest, DigestAlgorithm::Sha1);
        assert!(cfg.request_table().is_none());
        assert!(cfg.response_table().is_none());
        assert!(!cfg.request_strict());
    }

    // ── Queue / retry helpers ─────────────────────────────────────

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(QueuePolicy::Block { capacity: 0 }.capacity(), Some(1));
        assert_eq!(QueuePolicy::DropNewest { capacity: 64 }.capacity(), Some(64));
        assert_eq!(QueuePolicy::Unbounded.capacity(), None);
    }

    #[test]
    fn retry_attempts_never_below_one() {
        assert_eq!(RetryStrategy::Immediate { attempts: 0 }.max_attempts(), 1);
        assert_eq!(
            RetryStrategy::LinearBackoff { attempts: 5, delay_ms: 10 }.max_attempts(),
            5
        );
    }

    #[test]
    fn retry_delays_follow_strategy() {
        assert_eq!(RetryStrategy::default().delay_after(1), Duration::ZERO);
        let linear = RetryStrategy::LinearBackoff { attempts: 3, delay_ms: 20 };
        assert_eq!(linear.delay_after(1), Duration::from_millis(20));
        assert_eq!(linear.delay_after(2), Duration::from_millis(20));
        let exp = RetryStrategy::ExponentialBackoff { attempts: 5, base_ms: 10, max_ms: 50 };
        assert_eq!(exp.delay_after(1), Duration::from_millis(10));
        assert_eq!(exp.delay_after(2), Duration::from_millis(20));
        assert_eq!(exp.delay_after(3), Duration::from_millis(40));
        assert_eq!(exp.delay_after(4), Duration::from_millis(50));
    }

    #[test]
    fn sensitive_defaults_merge_under_explicit_request_table() {
        let cfg = MaskingConfig {
            use_sensitive_defaults: true,
            request: Some(HeaderMaskConfig {
                strict: true,
                headers: MaskTable::new().with("authorization", HeaderMaskPolicy::RedactBearerSignature),
            }),
            ..Default::default()
        };
        let table = cfg.request_table().unwrap();
        assert_eq!(
            table.policy_for("Authorization"),
            HeaderMaskPolicy::RedactBearerSignature
        );
        assert_eq!(table.policy_for("cookie"), HeaderMaskPolicy::HashValues);
        assert!(cfg.request_strict());
    }

    // ── Serde ─────────────────────────────────────────────────────

    #[test]
    fn queue_policy_is_internally_tagged() {
        let json = serde_json::to_string(&QueuePolicy::DropNewest { capacity: 8 }).unwrap();
        assert_eq!(json, r#"{"policy":"drop_newest","capacity":8}"#);
        let parsed: QueuePolicy = serde_json::from_str(r#"{"policy":"unbounded"}"#).unwrap();
        assert_eq!(parsed, QueuePolicy::Unbounded);
        let parsed: QueuePolicy = serde_json::from_str(r#"{"policy":"block"}"#).unwrap();
        assert_eq!(parsed, QueuePolicy::Block { capacity: 1 });
    }

    #[test]
    fn retry_strategy_roundtrip() {
        for strategy in [
            RetryStrategy::Immediate { attempts: 3 },
            RetryStrategy::LinearBackoff { attempts: 4, delay_ms: 100 },
            RetryStrategy::ExponentialBackoff { attempts: 5, base_ms: 50, max_ms: 2000 },
        ] {
            let json = serde_json::to_string(&strategy).unwrap();
            let back: RetryStrategy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, strategy);
        }
    }

    // ── SiphonConfig::load() ──────────────────────────────────────

    #[test]
    fn load_from_valid_yaml_overrides_defaults() {
        let yaml = r#"
shipper:
  max_batch_size_bytes: 4096
  queue:
    policy: drop_newest
    capacity: 256
collector:
  url: "https://collector.test/logs/bulk"
  api_key: "secret"
  retry:
    strategy: linear_backoff
    attempts: 5
    delay_ms: 250
masking:
  digest: sha256
  request:
    strict: true
    headers:
      Authorization: redact_bearer_signature
      x-request-id: preserve
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "{yaml}").unwrap();
        let cfg = SiphonConfig::load(tmpfile.path()).unwrap();

        assert_eq!(cfg.shipper.max_batch_size_bytes, 4096);
        // Defaults still apply for unspecified fields
        assert_eq!(cfg.shipper.max_record_age_ms, 1000);
        assert_eq!(cfg.shipper.queue, QueuePolicy::DropNewest { capacity: 256 });
        assert!(cfg.collector.is_enabled());
        assert_eq!(
            cfg.collector.retry,
            RetryStrategy::LinearBackoff { attempts: 5, delay_ms: 250 }
        );
        assert_eq!(cfg.masking.digest, DigestAlgorithm::Sha256);
        assert!(cfg.masking.request_strict());
        let table = cfg.masking.request_table().unwrap();
        assert_eq!(
            table.policy_for("authorization"),
            HeaderMaskPolicy::RedactBearerSignature
        );
        assert!(cfg.masking.response_table().is_none());
    }

    #[test]
    fn load_yaml_with_spill() {
        let yaml = r#"
collector:
  spill:
    enabled: true
    file_path: "/tmp/siphon/spill.ndjson"
    max_rotated_files: 3
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "{yaml}").unwrap();
        let cfg = SiphonConfig::load(tmpfile.path()).unwrap();
        assert!(cfg.collector.spill.enabled);
        assert_eq!(
            cfg.collector.spill.file_path,
            PathBuf::from("/tmp/siphon/spill.ndjson")
        );
        assert_eq!(cfg.collector.spill.max_rotated_files, 3);
        assert_eq!(cfg.collector.spill.max_file_size_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "siphon.yaml",
                r#"
collector:
  url: "https://from-file.test"
  timeout_ms: 900
"#,
            )?;
            jail.set_env("SIPHON_COLLECTOR__URL", "https://from-env.test");
            jail.set_env("SIPHON_COLLECTOR__API_KEY", "env-key");
            jail.set_env("SIPHON_SHIPPER__MAX_RECORD_AGE_MS", "250");

            let cfg = SiphonConfig::load(Path::new("siphon.yaml")).map_err(|e| e.to_string())?;
            assert_eq!(cfg.collector.url, "https://from-env.test");
            assert_eq!(cfg.collector.api_key, "env-key");
            assert_eq!(cfg.collector.timeout_ms, 900);
            assert_eq!(cfg.shipper.max_record_age_ms, 250);
            Ok(())
        });
    }

    #[test]
    fn load_rejects_unknown_mask_policy() {
        let yaml = r#"
masking:
  response:
    headers:
      set-cookie: shred
"#;
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();
        write!(tmpfile, "{yaml}").unwrap();
        assert!(SiphonConfig::load(tmpfile.path()).is_err());
    }
}
