//! One-shot producer/worker orchestration with aggregate stats.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use super::{Processor, WorkerCallback};
use crate::error::Result;

/// Byte accounting for worker results, feeding the run summary.
pub trait Measured {
    fn bytes(&self) -> u64;
}

/// Aggregate outcome of one streaming run.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSummary {
    pub items: usize,
    pub total_bytes: u64,
    pub duration_secs: f64,
    pub throughput_bytes_per_sec: f64,
}

impl TransferSummary {
    /// Derive a summary; a zero-length run yields zero throughput rather
    /// than dividing by zero.
    pub fn compute(items: usize, total_bytes: u64, duration: Duration) -> Self {
        let duration_secs = duration.as_secs_f64();
        let throughput_bytes_per_sec = if duration_secs > 0.0 {
            total_bytes as f64 / duration_secs
        } else {
            0.0
        };
        Self {
            items,
            total_bytes,
            duration_secs,
            throughput_bytes_per_sec,
        }
    }
}

/// Completed run: per-item results plus the derived summary.
#[derive(Debug)]
pub struct StreamingOutcome<R> {
    pub results: Vec<R>,
    pub summary: TransferSummary,
}

/// Runs one producer callback against N worker callbacks atop a
/// [`Processor`], pipelined: the producer feeds items as it discovers
/// them and workers start processing immediately.
pub struct StreamingExecutor {
    name: String,
    workers: usize,
    queue_capacity: Option<usize>,
}

impl StreamingExecutor {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
            queue_capacity: None,
        }
    }

    /// Cap the work queue, blocking the producer when it is full.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Run the producer to completion, drain the pool, and summarize.
    ///
    /// A producer error takes precedence over worker errors, but the pool
    /// is always drained and shut down before returning.
    pub async fn run<T, R, P, Fut>(
        &self,
        producer: P,
        worker: WorkerCallback<T, R>,
    ) -> Result<StreamingOutcome<R>>
    where
        T: Send + 'static,
        R: Measured + Send + 'static,
        P: FnOnce(Arc<Processor<T, R>>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let processor = match self.queue_capacity {
            Some(capacity) => {
                Processor::bounded(self.name.clone(), worker, self.workers, capacity)
            }
            None => Processor::new(self.name.clone(), worker, self.workers),
        };

        let produced = producer(Arc::clone(&processor)).await;
        let waited = processor.wait().await;
        produced?;
        let results = waited?;

        let total_bytes = results.iter().map(Measured::bytes).sum();
        let summary = TransferSummary::compute(results.len(), total_bytes, started.elapsed());
        info!(
            "{}: {} item(s), {} bytes in {:.2}s ({:.0} bytes/sec)",
            self.name,
            summary.items,
            summary.total_bytes,
            summary.duration_secs,
            summary.throughput_bytes_per_sec
        );
        Ok(StreamingOutcome { results, summary })
    }
}
