//! Top-level transfer operators and their registry.
//!
//! An operator wires a source handle, a destination handle, and a job
//! configuration into one streaming run and reports what moved. The host
//! orchestrator owns scheduling and retries; each operator runs exactly
//! once per invocation.

pub mod file_transfer;
pub mod query_transfer;

pub use file_transfer::FileTransferOperator;
pub use query_transfer::{QueryTransferOperator, RecordBatch, RecordSource};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::Result;
use crate::processor::streaming::TransferSummary;
use crate::scan::SourceStore;
use crate::store::ObjectStore;

/// Counters surfaced to the host orchestrator's generic logging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferStats {
    pub files_transferred: usize,
    pub total_bytes: u64,
    pub rows_processed: u64,
}

/// Outcome of one operator run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: String,
    pub summary: TransferSummary,
    /// Human-readable notes, one per destination written.
    pub observations: Vec<String>,
    pub stats: TransferStats,
}

impl ExecutionReport {
    /// Render the report as JSON for the host orchestrator's logs.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-run context handed in by the host.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Source handle variants an operator may require.
#[derive(Clone)]
pub enum SourceHandle {
    /// A scannable file namespace.
    Files(Arc<dyn SourceStore>),
    /// A cursor-driven record feed (query results).
    Records(Arc<dyn RecordSource>),
}

/// One source-to-destination transfer, run once per trigger.
#[async_trait]
pub trait TransferOperator: Send + Sync {
    async fn execute(
        &self,
        config: &JobConfig,
        source: SourceHandle,
        destination: Arc<dyn ObjectStore>,
        ctx: &RunContext,
    ) -> Result<ExecutionReport>;
}

/// Static map from `(source kind, target kind)` to an operator, built
/// once at startup through direct registration calls.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: HashMap<(String, String), Arc<dyn TransferOperator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in operators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("file", "object", Arc::new(FileTransferOperator::new()));
        registry.register("query", "object", Arc::new(QueryTransferOperator::new()));
        registry
    }

    pub fn register(
        &mut self,
        source_kind: impl Into<String>,
        target_kind: impl Into<String>,
        operator: Arc<dyn TransferOperator>,
    ) {
        self.operators
            .insert((source_kind.into(), target_kind.into()), operator);
    }

    pub fn get(&self, source_kind: &str, target_kind: &str) -> Option<Arc<dyn TransferOperator>> {
        self.operators
            .get(&(source_kind.to_string(), target_kind.to_string()))
            .cloned()
    }
}
