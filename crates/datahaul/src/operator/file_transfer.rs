//! File-to-object transfer operator.
//!
//! The scan feeds discovered items straight into the worker pool, so
//! transfers begin while discovery is still walking the namespace. Each
//! worker streams one item through its own chunked buffer.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::{
    ExecutionReport, RunContext, SourceHandle, TransferOperator, TransferStats,
};
use crate::buffer::ChunkedTransferBuffer;
use crate::config::{DestinationSpec, JobConfig};
use crate::error::{HaulError, Result};
use crate::processor::streaming::{Measured, StreamingExecutor};
use crate::processor::{Processor, WorkItem, WorkerCallback};
use crate::scan::{ItemInfo, ScanControl, ScanOptions, ScanVisitor, SourceStore};
use crate::store::ObjectStore;

/// Per-item transfer outcome.
#[derive(Debug)]
struct FileOutcome {
    key: String,
    bytes: u64,
    parts: usize,
}

impl Measured for FileOutcome {
    fn bytes(&self) -> u64 {
        self.bytes
    }
}

struct EnqueueVisitor {
    processor: Arc<Processor<ItemInfo, FileOutcome>>,
}

#[async_trait]
impl ScanVisitor for EnqueueVisitor {
    async fn visit(&mut self, item: ItemInfo, _ordinal: usize) -> Result<ScanControl> {
        self.processor
            .put(WorkItem::new(item.name.clone(), item))
            .await?;
        Ok(ScanControl::Continue)
    }
}

/// Scans a file source and copies every matching item to the object
/// store, `source.workers` items at a time.
#[derive(Default)]
pub struct FileTransferOperator;

impl FileTransferOperator {
    pub fn new() -> Self {
        Self
    }

    fn worker(
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn ObjectStore>,
        dest_spec: DestinationSpec,
    ) -> WorkerCallback<ItemInfo, FileOutcome> {
        Arc::new(move |_proc, item, _index| {
            let source = Arc::clone(&source);
            let destination = Arc::clone(&destination);
            let dest_spec = dest_spec.clone();
            Box::pin(async move {
                let info = item.payload;
                let key = dest_spec.resolve_key(&info.name);
                let mut options = dest_spec.buffer.clone();
                if options.expected_size.is_none() {
                    options.expected_size = Some(info.size);
                }
                let mut buffer = ChunkedTransferBuffer::new(destination, key.clone(), options);
                match copy_item(source.as_ref(), &info, &mut buffer).await {
                    Ok(parts) => {
                        let bytes = buffer.bytes_written();
                        info!(
                            "transferred {} -> {} ({} bytes, {} part(s))",
                            info.path, key, bytes, parts
                        );
                        Ok(Some(FileOutcome { key, bytes, parts }))
                    }
                    Err(e) => {
                        error!(
                            "transfer failed: operation=file-transfer item={} key={} cause={}",
                            info.path, key, e
                        );
                        if let Err(abort_err) = buffer.abort().await {
                            warn!("abort of {} also failed: {}", key, abort_err);
                        }
                        Err(e)
                    }
                }
            })
        })
    }
}

async fn copy_item(
    source: &dyn SourceStore,
    info: &ItemInfo,
    buffer: &mut ChunkedTransferBuffer,
) -> Result<usize> {
    let mut rx = source.read_object(&info.path).await?;
    while let Some(chunk) = rx.recv().await {
        buffer.write(&chunk?).await?;
    }
    let results = buffer.close().await?;
    Ok(results.len())
}

#[async_trait]
impl TransferOperator for FileTransferOperator {
    async fn execute(
        &self,
        config: &JobConfig,
        source: SourceHandle,
        destination: Arc<dyn ObjectStore>,
        ctx: &RunContext,
    ) -> Result<ExecutionReport> {
        let source = match source {
            SourceHandle::Files(handle) => handle,
            SourceHandle::Records(_) => {
                return Err(HaulError::Config(
                    "file transfer requires a scannable file source".into(),
                ));
            }
        };
        let options = ScanOptions::from_spec(&config.source)?;
        info!(
            "run {}: scanning {} with {} worker(s)",
            ctx.run_id, options.root, config.source.workers
        );

        let executor = StreamingExecutor::new(
            format!("file-transfer[{}]", ctx.run_id),
            config.source.workers,
        );
        let worker = Self::worker(
            Arc::clone(&source),
            destination,
            config.destination.clone(),
        );
        let scan_source = Arc::clone(&source);
        let outcome = executor
            .run(
                move |processor| async move {
                    let mut visitor = EnqueueVisitor { processor };
                    scan_source.scan(&options, &mut visitor).await?;
                    Ok(())
                },
                worker,
            )
            .await?;

        let observations = outcome
            .results
            .iter()
            .map(|r| format!("{}: {} bytes in {} part(s)", r.key, r.bytes, r.parts))
            .collect();
        let stats = TransferStats {
            files_transferred: outcome.summary.items,
            total_bytes: outcome.summary.total_bytes,
            rows_processed: 0,
        };
        Ok(ExecutionReport {
            run_id: ctx.run_id.clone(),
            summary: outcome.summary,
            observations,
            stats,
        })
    }
}
