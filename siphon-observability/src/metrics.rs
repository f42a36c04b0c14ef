use crate::prometheus_exporter::render_metrics;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Why a record never reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TooLarge,
    Serialization,
    QueueFull,
    DeliveryFailed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::TooLarge => "too_large",
            DropReason::Serialization => "serialization",
            DropReason::QueueFull => "queue_full",
            DropReason::DeliveryFailed => "delivery_failed",
        }
    }
}

/// What happened to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Sealed,
    Delivered,
    Failed,
    Spilled,
}

impl BatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchOutcome::Sealed => "sealed",
            BatchOutcome::Delivered => "delivered",
            BatchOutcome::Failed => "failed",
            BatchOutcome::Spilled => "spilled",
        }
    }
}

struct Collectors {
    registry: Registry,
    records_enqueued: IntCounter,
    records_dropped: IntCounterVec,
    batches: IntCounterVec,
    batch_size: Histogram,
}

/// Shipper counters, one registry per shipper instance.
///
/// A disabled instance allocates nothing and every `record_*` call is a no-op.
pub struct ShipperMetrics {
    inner: Option<Collectors>,
}

impl ShipperMetrics {
    pub fn new(enabled: bool) -> anyhow::Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }

        let registry = Registry::new();

        let records_enqueued = IntCounter::with_opts(Opts::new(
            "siphon_records_enqueued_total",
            "Records accepted by the shipper queue",
        ))?;

        let records_dropped = IntCounterVec::new(
            Opts::new(
                "siphon_records_dropped_total",
                "Records that will never reach the collector",
            ),
            &["reason"],
        )?;

        let batches = IntCounterVec::new(
            Opts::new("siphon_batches_total", "Batches by outcome"),
            &["outcome"],
        )?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("siphon_batch_size_bytes", "Serialised size of sealed batches")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 8)?),
        )?;

        registry.register(Box::new(records_enqueued.clone()))?;
        registry.register(Box::new(records_dropped.clone()))?;
        registry.register(Box::new(batches.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;

        Ok(Self {
            inner: Some(Collectors {
                registry,
                records_enqueued,
                records_dropped,
                batches,
                batch_size,
            }),
        })
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    #[inline]
    pub fn record_enqueued(&self) {
        if let Some(c) = &self.inner {
            c.records_enqueued.inc();
        }
    }

    #[inline]
    pub fn record_dropped(&self, reason: DropReason, count: u64) {
        if let Some(c) = &self.inner {
            c.records_dropped
                .with_label_values(&[reason.as_str()])
                .inc_by(count);
        }
    }

    #[inline]
    pub fn record_batch(&self, outcome: BatchOutcome) {
        if let Some(c) = &self.inner {
            c.batches.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    #[inline]
    pub fn observe_batch_size(&self, bytes: usize) {
        if let Some(c) = &self.inner {
            c.batch_size.observe(bytes as f64);
        }
    }

    pub fn enqueued(&self) -> u64 {
        self.inner.as_ref().map_or(0, |c| c.records_enqueued.get())
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.inner.as_ref().map_or(0, |c| {
            c.records_dropped.with_label_values(&[reason.as_str()]).get()
        })
    }

    pub fn batches(&self, outcome: BatchOutcome) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |c| c.batches.with_label_values(&[outcome.as_str()]).get())
    }

    /// Prometheus text exposition; empty when disabled.
    pub fn render(&self) -> String {
        self.inner
            .as_ref()
            .map(|c| render_metrics(&c.registry))
            .unwrap_or_default()
    }
}

impl Default for ShipperMetrics {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for ShipperMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShipperMetrics")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
