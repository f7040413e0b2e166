pub mod dead_letter;
pub mod transport;

use crate::buffer::{Batch, BufferError, Completion, EventBuffer};
use crate::config::types::RetryConfig;
use crate::retry::Backoff;
use crate::storage::{CheckpointError, CheckpointStore};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Linger used once inputs have ended, so partial lanes flush promptly
const DRAIN_LINGER: Duration = Duration::from_millis(50);

pub use dead_letter::{DeadLetterEntry, DeadLetterError, DeadLetterFile};
pub use transport::{HttpTransport, ShipError, Transport};

/// Failures that stop delivery altogether.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("dead-letter write failed: {0}")]
    DeadLetter(#[from] DeadLetterError),

    #[error("checkpoint commit failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipOutcome {
    Acked,
    /// Retries exhausted; the batch goes back to the buffer
    Requeued { attempts: u32 },
    /// Rejected for good and written to the dead-letter file
    Quarantined { reason: String },
}

#[derive(Debug, Default)]
pub struct ShipperCounters {
    acked_batches: AtomicU64,
    acked_events: AtomicU64,
    requeued_batches: AtomicU64,
    quarantined_batches: AtomicU64,
    quarantined_events: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShipperStats {
    pub acked_batches: u64,
    pub acked_events: u64,
    pub requeued_batches: u64,
    pub quarantined_batches: u64,
    pub quarantined_events: u64,
}

impl ShipperCounters {
    fn record(&self, outcome: &ShipOutcome, events: usize) {
        let events = events as u64;
        match outcome {
            ShipOutcome::Acked => {
                self.acked_batches.fetch_add(1, Ordering::Relaxed);
                self.acked_events.fetch_add(events, Ordering::Relaxed);
            }
            ShipOutcome::Requeued { .. } => {
                self.requeued_batches.fetch_add(1, Ordering::Relaxed);
            }
            ShipOutcome::Quarantined { .. } => {
                self.quarantined_batches.fetch_add(1, Ordering::Relaxed);
                self.quarantined_events.fetch_add(events, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> ShipperStats {
        ShipperStats {
            acked_batches: self.acked_batches.load(Ordering::Relaxed),
            acked_events: self.acked_events.load(Ordering::Relaxed),
            requeued_batches: self.requeued_batches.load(Ordering::Relaxed),
            quarantined_batches: self.quarantined_batches.load(Ordering::Relaxed),
            quarantined_events: self.quarantined_events.load(Ordering::Relaxed),
        }
    }
}

/// Delivers batches with retry, and quarantines permanent rejections.
pub struct Shipper {
    transport: Arc<dyn Transport>,
    dead_letter: Arc<DeadLetterFile>,
    retry: RetryConfig,
    counters: ShipperCounters,
}

impl Shipper {
    pub fn new(
        transport: Arc<dyn Transport>,
        dead_letter: Arc<DeadLetterFile>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            dead_letter,
            retry,
            counters: ShipperCounters::default(),
        }
    }

    pub fn stats(&self) -> ShipperStats {
        self.counters.snapshot()
    }

    /// Try to deliver a batch, retrying transient failures with jittered
    /// backoff. Only a failed dead-letter write is an error.
    pub async fn ship(&self, batch: &Batch) -> Result<ShipOutcome, DeadLetterError> {
        let mut backoff = Backoff::new(&self.retry).with_jitter();

        let outcome = loop {
            match self.transport.send(batch).await {
                Ok(()) => {
                    tracing::debug!(
                        batch_id = %batch.batch_id,
                        source_id = %batch.source_id,
                        events = batch.len(),
                        "Batch acknowledged"
                    );
                    break ShipOutcome::Acked;
                }
                Err(ShipError::Permanent(reason)) => {
                    let content = serde_json::to_string(batch)?;
                    tracing::error!(
                        batch_id = %batch.batch_id,
                        source_id = %batch.source_id,
                        events = batch.len(),
                        reason = %reason,
                        content = %content,
                        "Batch permanently rejected, quarantining"
                    );
                    self.dead_letter.quarantine(batch, &reason)?;
                    break ShipOutcome::Quarantined { reason };
                }
                Err(ShipError::Transient(reason)) => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            batch_id = %batch.batch_id,
                            source_id = %batch.source_id,
                            attempt = backoff.attempts(),
                            backoff_ms = delay.as_millis() as u64,
                            error = %reason,
                            "Delivery failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(
                            batch_id = %batch.batch_id,
                            source_id = %batch.source_id,
                            attempts = backoff.attempts(),
                            error = %reason,
                            "Retries exhausted, requeueing batch"
                        );
                        break ShipOutcome::Requeued {
                            attempts: backoff.attempts(),
                        };
                    }
                },
            }
        };

        self.counters.record(&outcome, batch.len());
        Ok(outcome)
    }
}

/// One member of the shipper pool.
///
/// Leases batches from the buffer, ships them, commits checkpoints for
/// acknowledged and quarantined batches, and requeues the rest. Exits once
/// `inputs_done` is cancelled and the buffer has nothing left.
pub async fn run_worker(
    worker: usize,
    buffer: Arc<EventBuffer>,
    shipper: Arc<Shipper>,
    checkpoints: Arc<CheckpointStore>,
    flush_interval: Duration,
    inputs_done: CancellationToken,
) -> Result<(), DeliveryError> {
    tracing::debug!(worker, "Shipper worker started");

    loop {
        let draining = inputs_done.is_cancelled();
        let linger = if draining {
            flush_interval.min(DRAIN_LINGER)
        } else {
            flush_interval
        };

        let next = tokio::select! {
            next = buffer.next_batch(linger) => next?,
            _ = inputs_done.cancelled(), if !draining => continue,
        };
        let Some(batch) = next else {
            if draining && buffer.is_drained() {
                break;
            }
            continue;
        };

        match shipper.ship(&batch).await? {
            ShipOutcome::Acked | ShipOutcome::Quarantined { .. } => {
                if let Some(position) = batch.commit_position() {
                    checkpoints.commit(&batch.source_id, position)?;
                }
                buffer.complete(&batch.source_id, Completion::Done)?;
            }
            ShipOutcome::Requeued { .. } => {
                buffer.complete(&batch.source_id, Completion::Requeue(batch.events))?;
            }
        }
    }

    tracing::debug!(worker, "Shipper worker finished");
    Ok(())
}
