//! Fanout Dispatcher
//!
//! Delivers every rendered event to every registered sink. Each sink gets a
//! private unbounded FIFO queue drained by its own worker task, so a slow or
//! rate-limited sink only ever delays itself.
//!
//! Worker loop per task: wait on the sink's [`RateLimiter`], call
//! [`Sink::deliver`], retry transient failures with bounded backoff, drop
//! the message on a permanent failure, and stop the worker when the sink
//! reports it is closed.

pub mod rate_limit;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use rate_limit::{RateLimiter, TokenBucket};

use crate::application::ports::{Sink, SinkError, SinkId};
use crate::domain::events::{ClassifiedEvent, format};
use crate::infrastructure::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::metrics;

/// One rendered event waiting for one sink.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    /// Text to deliver.
    pub text: Arc<str>,
    /// Destination.
    pub sink_id: SinkId,
    /// When the task was queued.
    pub enqueued_at: Instant,
}

/// What a worker did over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Messages delivered.
    pub delivered: u64,
    /// Messages given up on.
    pub dropped: u64,
}

/// Totals returned by [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Messages delivered across all sinks.
    pub delivered: u64,
    /// Messages dropped after failures.
    pub dropped: u64,
    /// Messages still queued or in flight when the grace period ran out.
    pub undelivered: u64,
}

struct SinkHandle {
    id: SinkId,
    name: &'static str,
    tx: mpsc::UnboundedSender<DeliveryTask>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<WorkerReport>,
}

/// Fanout dispatcher.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<SinkHandle>,
}

impl Dispatcher {
    /// Dispatcher with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink and spawn its worker.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn register(
        &mut self,
        sink: Arc<dyn Sink>,
        limiter: RateLimiter,
        retry: BackoffConfig,
    ) -> SinkId {
        let id = SinkId(self.sinks.len());
        let name = sink.name();
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(
            Worker {
                id,
                sink,
                limiter,
                retry,
                pending: pending.clone(),
            }
            .run(rx),
        );

        tracing::info!(sink = name, %id, "Sink registered");
        self.sinks.push(SinkHandle {
            id,
            name,
            tx,
            pending,
            worker,
        });
        id
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Messages queued or in flight for `id`.
    #[must_use]
    pub fn pending(&self, id: SinkId) -> Option<usize> {
        self.sinks
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.pending.load(Ordering::Acquire))
    }

    /// Render `event` and queue it on every sink. Never blocks.
    pub fn dispatch(&self, event: &ClassifiedEvent) {
        let text: Arc<str> = Arc::from(format(event));
        let enqueued_at = Instant::now();

        for sink in &self.sinks {
            let task = DeliveryTask {
                text: Arc::clone(&text),
                sink_id: sink.id,
                enqueued_at,
            };
            let depth = sink.pending.fetch_add(1, Ordering::AcqRel) + 1;
            if sink.tx.send(task).is_err() {
                sink.pending.fetch_sub(1, Ordering::AcqRel);
                metrics::record_deliveries_dropped(sink.name, 1);
                tracing::debug!(sink = sink.name, "Sink stopped, message dropped");
                continue;
            }
            metrics::set_queue_depth(sink.name, depth);
        }
    }

    /// Close every queue and let workers drain for at most `grace`.
    /// Workers still running afterwards are aborted.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;
        let mut report = ShutdownReport::default();

        let handles: Vec<_> = self
            .sinks
            .into_iter()
            .map(|sink| {
                drop(sink.tx);
                (sink.name, sink.pending, sink.worker)
            })
            .collect();

        for (name, pending, mut worker) in handles {
            match tokio::time::timeout_at(deadline, &mut worker).await {
                Ok(Ok(worker_report)) => {
                    report.delivered += worker_report.delivered;
                    report.dropped += worker_report.dropped;
                }
                Ok(Err(e)) => {
                    tracing::error!(sink = name, error = %e, "Sink worker failed");
                    report.undelivered += pending.load(Ordering::Acquire) as u64;
                }
                Err(_) => {
                    worker.abort();
                    let left = pending.load(Ordering::Acquire) as u64;
                    tracing::warn!(sink = name, undelivered = left, "Sink did not drain in time");
                    report.undelivered += left;
                }
            }
        }

        if report.undelivered > 0 {
            tracing::warn!(undelivered = report.undelivered, "Shutdown left messages undelivered");
        }
        report
    }
}

// =============================================================================
// Worker
// =============================================================================

enum Outcome {
    Delivered,
    Dropped,
    Closed,
}

struct Worker {
    id: SinkId,
    sink: Arc<dyn Sink>,
    limiter: RateLimiter,
    retry: BackoffConfig,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<DeliveryTask>) -> WorkerReport {
        let name = self.sink.name();
        let mut report = WorkerReport::default();

        while let Some(task) = rx.recv().await {
            let outcome = self.deliver(&task).await;
            let depth = self.done();

            match outcome {
                Outcome::Delivered => {
                    report.delivered += 1;
                    metrics::record_delivery(name, task.enqueued_at.elapsed());
                }
                Outcome::Dropped => {
                    report.dropped += 1;
                    metrics::record_deliveries_dropped(name, 1);
                }
                Outcome::Closed => {
                    report.dropped += 1;
                    rx.close();
                    let mut abandoned = 0u64;
                    while rx.try_recv().is_ok() {
                        self.done();
                        abandoned += 1;
                    }
                    report.dropped += abandoned;
                    metrics::record_deliveries_dropped(name, abandoned + 1);
                    tracing::error!(
                        sink = name,
                        id = %self.id,
                        abandoned,
                        "Sink closed, worker stopping"
                    );
                    metrics::set_queue_depth(name, 0);
                    return report;
                }
            }
            metrics::set_queue_depth(name, depth);
        }

        tracing::debug!(sink = name, delivered = report.delivered, "Sink worker drained");
        report
    }

    fn done(&self) -> usize {
        self.pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    async fn deliver(&mut self, task: &DeliveryTask) -> Outcome {
        let name = self.sink.name();
        let mut policy = BackoffPolicy::new(self.retry);

        loop {
            self.limiter.acquire().await;

            let error = match self.sink.deliver(&task.text).await {
                Ok(()) => return Outcome::Delivered,
                Err(e) => e,
            };

            match error {
                SinkError::Transient(_) | SinkError::RateLimited(_) => {
                    let Some(backoff) = policy.next_delay() else {
                        tracing::error!(
                            sink = name,
                            error = %error,
                            attempts = policy.attempt_count() + 1,
                            "Delivery failed after retries, dropping message"
                        );
                        return Outcome::Dropped;
                    };
                    let delay = error.retry_after().map_or(backoff, |after| after.max(backoff));
                    metrics::record_delivery_retry(name);
                    tracing::warn!(
                        sink = name,
                        error = %error,
                        attempt = policy.attempt_count(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                SinkError::Permanent(_) => {
                    tracing::warn!(sink = name, error = %error, "Delivery rejected, dropping message");
                    return Outcome::Dropped;
                }
                SinkError::Closed(_) => {
                    tracing::error!(sink = name, error = %error, "Sink closed");
                    return Outcome::Closed;
                }
            }
        }
    }
}
