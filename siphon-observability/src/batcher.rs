//! Batch assembly.
//!
//! A [`Shipper`] is the producer-side handle; a single worker task owns the
//! open batch. The worker serialises each record, appends it while the batch
//! stays within `max_batch_size_bytes`, and seals the batch when the next
//! record would not fit or when its oldest record is older than
//! `max_record_age`. Sealed batches are delivered on their own tasks, so a slow
//! collector never stalls assembly.
//!
//! Records are batched in the order the worker receives them. Each record that
//! passes the size check ends up in exactly one batch.

use crate::batch::Batch;
use crate::delivery::{Delivery, DeliveryOutcome};
use crate::metrics::{BatchOutcome, DropReason, ShipperMetrics};
use chrono::Utc;
use siphon_core::config::{QueuePolicy, ShipperConfig};
use siphon_core::error::SiphonError;
use siphon_core::record::LogRecord;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub max_batch_size_bytes: usize,
    pub max_record_age: Duration,
    pub queue: QueuePolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        (&ShipperConfig::default()).into()
    }
}

impl From<&ShipperConfig> for BatchConfig {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            max_batch_size_bytes: config.max_batch_size_bytes,
            max_record_age: config.max_record_age(),
            queue: config.queue,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShipperError {
    #[error("shipper queue is full, record dropped")]
    QueueFull,

    #[error("shipper is shut down")]
    Closed,
}

enum QueueSender {
    Block(mpsc::Sender<LogRecord>),
    DropNewest(mpsc::Sender<LogRecord>),
    Unbounded(mpsc::UnboundedSender<LogRecord>),
}

enum QueueReceiver {
    Bounded(mpsc::Receiver<LogRecord>),
    Unbounded(mpsc::UnboundedReceiver<LogRecord>),
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<LogRecord> {
        match self {
            QueueReceiver::Bounded(rx) => rx.recv().await,
            QueueReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn close(&mut self) {
        match self {
            QueueReceiver::Bounded(rx) => rx.close(),
            QueueReceiver::Unbounded(rx) => rx.close(),
        }
    }
}

fn queue(policy: QueuePolicy) -> (QueueSender, QueueReceiver) {
    match policy {
        QueuePolicy::Block { .. } | QueuePolicy::DropNewest { .. } => {
            let capacity = policy.capacity().unwrap_or(1);
            let (tx, rx) = mpsc::channel(capacity);
            let tx = match policy {
                QueuePolicy::DropNewest { .. } => QueueSender::DropNewest(tx),
                _ => QueueSender::Block(tx),
            };
            (tx, QueueReceiver::Bounded(rx))
        }
        QueuePolicy::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    }
}

struct Shared {
    sender: QueueSender,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<ShipperMetrics>,
}

/// Handle for enqueueing records. Cheap to clone; the worker stops once
/// [`Shipper::shutdown`] is called or every handle is dropped.
#[derive(Clone)]
pub struct Shipper {
    shared: Arc<Shared>,
}

impl Shipper {
    /// Start a worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn(config: BatchConfig, delivery: Delivery, metrics: Arc<ShipperMetrics>) -> Self {
        let (sender, receiver) = queue(config.queue);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = BatchWorker {
            max_batch_size_bytes: config.max_batch_size_bytes,
            max_record_age: config.max_record_age,
            rx: receiver,
            shutdown: shutdown_rx,
            delivery: Arc::new(delivery),
            metrics: metrics.clone(),
            batch: Batch::new(),
            inflight: JoinSet::new(),
        };
        let handle = tokio::spawn(worker.run());

        Self {
            shared: Arc::new(Shared {
                sender,
                shutdown,
                worker: Mutex::new(Some(handle)),
                metrics,
            }),
        }
    }

    /// Hand a sanitised record to the worker.
    ///
    /// Under [`QueuePolicy::Block`] this waits for queue capacity. Under
    /// [`QueuePolicy::DropNewest`] a full queue drops the record and returns
    /// [`ShipperError::QueueFull`].
    pub async fn enqueue(&self, record: LogRecord) -> Result<(), ShipperError> {
        if *self.shared.shutdown.borrow() {
            return Err(ShipperError::Closed);
        }

        match &self.shared.sender {
            QueueSender::Block(tx) => {
                tx.send(record).await.map_err(|_| ShipperError::Closed)?;
            }
            QueueSender::DropNewest(tx) => match tx.try_send(record) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.shared.metrics.record_dropped(DropReason::QueueFull, 1);
                    warn!("Shipper queue full, dropping record");
                    return Err(ShipperError::QueueFull);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(ShipperError::Closed),
            },
            QueueSender::Unbounded(tx) => {
                tx.send(record).map_err(|_| ShipperError::Closed)?;
            }
        }

        self.shared.metrics.record_enqueued();
        Ok(())
    }

    /// Stop accepting records, flush what has been received and wait for
    /// every in-flight delivery to finish.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);

        let handle = match self.shared.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Shipper worker panicked");
            }
        }
    }

    pub fn metrics(&self) -> &Arc<ShipperMetrics> {
        &self.shared.metrics
    }
}

impl std::fmt::Debug for Shipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shipper")
            .field("closed", &*self.shared.shutdown.borrow())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────

enum Event {
    Record(LogRecord),
    AgeReached,
    Delivered(Result<(usize, DeliveryOutcome), JoinError>),
    Stop,
}

/// Owns the open batch. Only the worker task touches it.
struct BatchWorker {
    max_batch_size_bytes: usize,
    max_record_age: Duration,
    rx: QueueReceiver,
    shutdown: watch::Receiver<bool>,
    delivery: Arc<Delivery>,
    metrics: Arc<ShipperMetrics>,
    batch: Batch,
    inflight: JoinSet<(usize, DeliveryOutcome)>,
}

impl BatchWorker {
    async fn run(mut self) {
        loop {
            let deadline = self.age_deadline();

            let event = tokio::select! {
                biased;
                _ = sleep_until(deadline), if deadline.is_some() => Event::AgeReached,
                Some(done) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    Event::Delivered(done)
                }
                _ = self.shutdown.changed() => Event::Stop,
                record = self.rx.recv() => match record {
                    Some(record) => Event::Record(record),
                    None => Event::Stop,
                },
            };

            match event {
                Event::Record(record) => self.accept(record),
                Event::AgeReached => {}
                Event::Delivered(done) => self.finish(done),
                Event::Stop => break,
            }

            if self.is_expired() {
                self.seal();
            }
        }

        self.drain().await;
    }

    /// Instant at which the open batch's oldest record passes the max age.
    fn age_deadline(&self) -> Option<Instant> {
        let age_ms = self.oldest_age_ms()?;
        // Age must strictly exceed the maximum, hence the extra millisecond.
        let remaining = self.max_age_ms().saturating_add(1).saturating_sub(age_ms);
        let remaining = u64::try_from(remaining).unwrap_or(0);
        Instant::now().checked_add(Duration::from_millis(remaining))
    }

    fn is_expired(&self) -> bool {
        self.oldest_age_ms()
            .is_some_and(|age_ms| age_ms > self.max_age_ms())
    }

    fn oldest_age_ms(&self) -> Option<i64> {
        let oldest = self.batch.oldest_created_at()?;
        Some(Utc::now().timestamp_millis().saturating_sub(oldest).max(0))
    }

    /// Saturates so an effectively infinite max age never flushes by age.
    fn max_age_ms(&self) -> i64 {
        i64::try_from(self.max_record_age.as_millis()).unwrap_or(i64::MAX)
    }

    fn accept(&mut self, record: LogRecord) {
        let created_at = record.created_at();

        let entry = match record.to_json() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to serialise log record, dropping");
                self.metrics.record_dropped(DropReason::Serialization, 1);
                return;
            }
        };

        if entry.len() > self.max_batch_size_bytes {
            let e = SiphonError::RecordTooLarge {
                size: entry.len(),
                max: self.max_batch_size_bytes,
            };
            warn!(error = %e, "Dropping log record");
            self.metrics.record_dropped(DropReason::TooLarge, 1);
            return;
        }

        if !self.batch.fits(entry.len(), self.max_batch_size_bytes) {
            self.seal();
        }
        self.batch.push(entry, created_at);
    }

    /// Hand the open batch to a delivery task and start a new one.
    fn seal(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        let records = batch.len();

        debug!(records, bytes = batch.size_bytes(), "Sealed batch");
        self.metrics.record_batch(BatchOutcome::Sealed);
        self.metrics.observe_batch_size(batch.size_bytes());

        let delivery = self.delivery.clone();
        self.inflight
            .spawn(async move { (records, delivery.deliver(batch).await) });
    }

    fn finish(&self, done: Result<(usize, DeliveryOutcome), JoinError>) {
        match done {
            Ok((_, DeliveryOutcome::Delivered { .. })) => {
                self.metrics.record_batch(BatchOutcome::Delivered);
            }
            Ok((_, DeliveryOutcome::Spilled)) => {
                self.metrics.record_batch(BatchOutcome::Failed);
                self.metrics.record_batch(BatchOutcome::Spilled);
            }
            Ok((records, DeliveryOutcome::Dropped)) => {
                self.metrics.record_batch(BatchOutcome::Failed);
                self.metrics
                    .record_dropped(DropReason::DeliveryFailed, records as u64);
            }
            Err(e) => {
                error!(error = %e, "Delivery task failed");
                self.metrics.record_batch(BatchOutcome::Failed);
            }
        }
    }

    /// Take whatever is still queued, ship the last batch, then wait for all
    /// deliveries.
    async fn drain(mut self) {
        self.rx.close();
        while let Some(record) = self.rx.recv().await {
            self.accept(record);
        }
        self.seal();

        while let Some(done) = self.inflight.join_next().await {
            self.finish(done);
        }
        debug!("Shipper worker stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
