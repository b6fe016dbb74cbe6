//! # datahaul
//!
//! Concurrent streaming transfer library for moving large datasets from
//! file stores and databases into object stores.
//!
//! The core pieces:
//!
//! - **Processor** — bounded worker pool pulling from one work queue,
//!   with support for self-feeding workers
//! - **StreamingExecutor** — pipelined scan-and-transfer runs with
//!   aggregate throughput stats
//! - **ChunkedTransferBuffer** — turns one sequential byte stream into
//!   parallel multipart uploads, newline-safe in split mode, with
//!   optional per-chunk gzip
//! - **Operators** — file-to-object and query-to-object wiring behind an
//!   explicit registry
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use datahaul::{
//!     JobConfig, LocalSource, MemoryStore, OperatorRegistry, RunContext,
//!     SourceHandle,
//! };
//!
//! #[tokio::main]
//! async fn main() -> datahaul::Result<()> {
//!     let config = JobConfig::from_yaml(
//!         "source:\n  root: /data/incoming\ndestination:\n  prefix: raw\n",
//!     )?;
//!     let registry = OperatorRegistry::with_defaults();
//!     let operator = registry.get("file", "object").unwrap();
//!     let report = operator
//!         .execute(
//!             &config,
//!             SourceHandle::Files(Arc::new(LocalSource::new())),
//!             Arc::new(MemoryStore::new()),
//!             &RunContext::new(),
//!         )
//!         .await?;
//!     println!("moved {} bytes", report.stats.total_bytes);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod operator;
pub mod processor;
pub mod scan;
pub mod store;

// Re-exports for convenient access
pub use buffer::{ChunkedTransferBuffer, Progress, TransferResult};
pub use config::{
    BufferOptions, Compression, DestinationSpec, JobConfig, OversizedRecordPolicy, SourceSpec,
    SplitMode,
};
pub use error::{HaulError, Result};
pub use operator::{
    ExecutionReport, FileTransferOperator, OperatorRegistry, QueryTransferOperator, RecordBatch,
    RecordSource, RunContext, SourceHandle, TransferOperator, TransferStats,
};
pub use processor::streaming::{Measured, StreamingExecutor, StreamingOutcome, TransferSummary};
pub use processor::{Processor, WorkItem, WorkerCallback};
pub use scan::{ItemInfo, LocalSource, ScanControl, ScanOptions, ScanVisitor, SourceStore};
pub use store::{MemoryStore, ObjectStore, PartToken, SessionId};
