//! Query-to-object transfer operator.
//!
//! Query results arrive through a cursor that is not safe to share, so
//! the pool is sized at one worker and the worker feeds itself: each
//! batch fetch enqueues the next one until the source reports
//! exhaustion. The high-water cursor travels in the work item payload.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{
    ExecutionReport, RunContext, SourceHandle, TransferOperator, TransferStats,
};
use crate::buffer::ChunkedTransferBuffer;
use crate::config::JobConfig;
use crate::error::{HaulError, Result};
use crate::processor::streaming::{Measured, StreamingExecutor};
use crate::processor::{WorkItem, WorkerCallback};
use crate::store::ObjectStore;

const DEFAULT_BATCH_SIZE: usize = 50_000;

/// One fetched batch of serialized records.
#[derive(Debug)]
pub struct RecordBatch {
    /// Newline-terminated serialized records.
    pub data: Bytes,
    /// Record count in `data`.
    pub rows: u64,
    /// Cursor to resume from for the following batch.
    pub next_cursor: u64,
}

/// Cursor-driven record feed, typically backed by a paged query.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Header line to prepend once, if the format has one.
    fn header(&self) -> Option<Bytes> {
        None
    }

    /// Fetch up to `limit` records past `cursor`; `None` when exhausted.
    async fn fetch_batch(&self, cursor: u64, limit: usize) -> Result<Option<RecordBatch>>;
}

#[derive(Debug)]
struct BatchOutcome {
    bytes: u64,
    rows: u64,
}

impl Measured for BatchOutcome {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Streams a record feed into one destination object (or object family,
/// in multi-object split mode).
pub struct QueryTransferOperator {
    batch_size: usize,
}

impl QueryTransferOperator {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self { batch_size }
    }
}

impl Default for QueryTransferOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferOperator for QueryTransferOperator {
    async fn execute(
        &self,
        config: &JobConfig,
        source: SourceHandle,
        destination: Arc<dyn ObjectStore>,
        ctx: &RunContext,
    ) -> Result<ExecutionReport> {
        let records = match source {
            SourceHandle::Records(handle) => handle,
            SourceHandle::Files(_) => {
                return Err(HaulError::Config(
                    "query transfer requires a record source".into(),
                ));
            }
        };
        let key = config.destination.key.clone().ok_or_else(|| {
            HaulError::Config("query transfer requires destination.key".into())
        })?;

        let buffer = Arc::new(Mutex::new(ChunkedTransferBuffer::new(
            destination,
            key.clone(),
            config.destination.buffer.clone(),
        )));
        if let Some(header) = records.header() {
            buffer.lock().await.write(&header).await?;
        }

        info!("run {}: streaming query results to {}", ctx.run_id, key);
        let executor = StreamingExecutor::new(format!("query-transfer[{}]", ctx.run_id), 1);
        let worker = self.worker(Arc::clone(&records), Arc::clone(&buffer));

        let run = executor
            .run(
                |processor| async move {
                    processor.put(WorkItem::new("fetch[0]", 0u64)).await?;
                    Ok(())
                },
                worker,
            )
            .await;

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "transfer failed: operation=query-transfer key={} cause={}",
                    key, e
                );
                if let Err(abort_err) = buffer.lock().await.abort().await {
                    warn!("abort of {} also failed: {}", key, abort_err);
                }
                return Err(e);
            }
        };

        let results = match buffer.lock().await.close().await {
            Ok(results) => results,
            Err(e) => {
                error!(
                    "transfer failed: operation=query-transfer key={} cause={}",
                    key, e
                );
                if let Err(abort_err) = buffer.lock().await.abort().await {
                    warn!("abort of {} also failed: {}", key, abort_err);
                }
                return Err(e);
            }
        };

        let rows_processed: u64 = outcome.results.iter().map(|b| b.rows).sum();
        let observations = results
            .iter()
            .map(|r| format!("{}: part {} ({} bytes)", r.key, r.part_index, r.size))
            .collect();
        let stats = TransferStats {
            files_transferred: results.len(),
            total_bytes: outcome.summary.total_bytes,
            rows_processed,
        };
        info!(
            "run {}: {} row(s) in {} batch(es) written to {}",
            ctx.run_id, rows_processed, outcome.summary.items, key
        );
        Ok(ExecutionReport {
            run_id: ctx.run_id.clone(),
            summary: outcome.summary,
            observations,
            stats,
        })
    }
}

impl QueryTransferOperator {
    fn worker(
        &self,
        records: Arc<dyn RecordSource>,
        buffer: Arc<Mutex<ChunkedTransferBuffer>>,
    ) -> WorkerCallback<u64, BatchOutcome> {
        let batch_size = self.batch_size;
        Arc::new(move |proc, item, _index| {
            let records = Arc::clone(&records);
            let buffer = Arc::clone(&buffer);
            Box::pin(async move {
                let cursor = item.payload;
                match records.fetch_batch(cursor, batch_size).await? {
                    Some(batch) => {
                        buffer.lock().await.write(&batch.data).await?;
                        proc.put(WorkItem::new(
                            format!("fetch[{}]", batch.next_cursor),
                            batch.next_cursor,
                        ))
                        .await?;
                        Ok(Some(BatchOutcome {
                            bytes: batch.data.len() as u64,
                            rows: batch.rows,
                        }))
                    }
                    None => Ok(None),
                }
            })
        })
    }
}
