//! Retrying delivery of sealed batches.

use crate::batch::Batch;
use crate::dispatch::{DispatchError, Dispatcher};
use crate::spill::SpillWriter;
use siphon_core::config::RetryStrategy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Final state of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the collector on attempt `attempts`.
    Delivered { attempts: u32 },
    /// Every attempt failed; the batch was written to the spill file.
    Spilled,
    /// Every attempt failed; the batch is gone.
    Dropped,
}

/// Runs a [`Dispatcher`] under a retry strategy and a per-attempt timeout.
pub struct Delivery {
    dispatcher: Arc<dyn Dispatcher>,
    retry: RetryStrategy,
    attempt_timeout: Duration,
    spill: Option<Arc<SpillWriter>>,
}

impl Delivery {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            retry: RetryStrategy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            spill: None,
        }
    }

    /// HTTP delivery to the configured collector, with the configured retry,
    /// timeout and spill file.
    #[cfg(feature = "http")]
    pub fn from_config(config: &siphon_core::config::CollectorConfig) -> anyhow::Result<Self> {
        let dispatcher = crate::dispatch::HttpDispatcher::from_config(config)?;
        let mut delivery = Self::new(Arc::new(dispatcher))
            .with_retry(config.retry)
            .with_attempt_timeout(config.timeout());
        if config.spill.enabled {
            delivery = delivery.with_spill(Arc::new(SpillWriter::open(config.spill.clone())?));
        }
        Ok(delivery)
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_spill(mut self, spill: Arc<SpillWriter>) -> Self {
        self.spill = Some(spill);
        self
    }

    pub fn retry(&self) -> RetryStrategy {
        self.retry
    }

    pub async fn deliver(&self, batch: Batch) -> DeliveryOutcome {
        let max_attempts = self.retry.max_attempts();

        for attempt in 1..=max_attempts {
            match self.attempt(&batch).await {
                Ok(()) => {
                    debug!(attempt, records = batch.len(), "Batch delivered");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        records = batch.len(),
                        error = %e,
                        "Batch delivery attempt failed"
                    );
                    if attempt < max_attempts {
                        let delay = self.retry.delay_after(attempt);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        self.exhausted(batch).await
    }

    async fn attempt(&self, batch: &Batch) -> Result<(), DispatchError> {
        match tokio::time::timeout(self.attempt_timeout, self.dispatcher.dispatch(batch)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.attempt_timeout)),
        }
    }

    async fn exhausted(&self, batch: Batch) -> DeliveryOutcome {
        let records = batch.len();

        let Some(spill) = self.spill.clone() else {
            error!(records, "Batch delivery exhausted, dropping batch");
            return DeliveryOutcome::Dropped;
        };

        match tokio::task::spawn_blocking(move || spill.write_batch(&batch)).await {
            Ok(Ok(())) => {
                warn!(records, "Batch delivery exhausted, batch spilled to disk");
                DeliveryOutcome::Spilled
            }
            Ok(Err(e)) => {
                error!(records, error = %e, "Batch delivery exhausted and spill failed");
                DeliveryOutcome::Dropped
            }
            Err(e) => {
                error!(records, error = %e, "Spill task failed");
                DeliveryOutcome::Dropped
            }
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("spill", &self.spill.as_ref().map(|s| s.path().to_path_buf()))
            .finish()
    }
}
