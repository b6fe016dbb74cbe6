//! Configuration type definitions for transfer jobs.

use serde::{Deserialize, Serialize};

/// Default chunk size: 8 MiB, comfortably above the 5 MiB multipart
/// minimum that most object stores enforce.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Minimum part size accepted by S3-compatible stores for all parts
/// except the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default upload concurrency per buffer.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

/// How one logical byte stream maps onto destination objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// One destination object assembled from a multipart session.
    #[default]
    SingleObject,

    /// Many independent destination objects, split on record boundaries.
    MultiObject,
}

/// Per-chunk compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Gzip,
}

impl Compression {
    /// File extension suffix for the codec (including the dot).
    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::Gzip => ".gz",
        }
    }
}

/// What to do when no record terminator is found within 2x the chunk size
/// in multi-object mode.
///
/// Splitting mid-record silently breaks downstream parsers, so the default
/// is a hard error. `ForceSplit` opts back into best-effort splitting at
/// the raw byte boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedRecordPolicy {
    #[default]
    Error,
    ForceSplit,
}

/// Options for one chunked transfer buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferOptions {
    /// Split mode (default: single_object).
    #[serde(default)]
    pub mode: SplitMode,

    /// Target chunk size in bytes (default: 8 MiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Optional per-chunk compression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,

    /// Expected total byte count. Drives progress logging when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,

    /// Concurrent uploads per buffer (default: 4).
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Oversized-record handling in multi-object mode (default: error).
    #[serde(default)]
    pub oversized_record: OversizedRecordPolicy,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            mode: SplitMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: None,
            expected_size: None,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            oversized_record: OversizedRecordPolicy::default(),
        }
    }
}

/// Source-side scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Root path or namespace to scan.
    pub root: String,

    /// Optional regex applied to item names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Recurse into sub-namespaces (default: false).
    #[serde(default)]
    pub recursive: bool,

    /// Skip items modified within the stability window, i.e. possibly
    /// still being written (default: true).
    #[serde(default = "default_true")]
    pub skip_unstable: bool,

    /// Stability window in seconds (default: 60).
    #[serde(default = "default_stability_secs")]
    pub stability_window_secs: u64,

    /// Number of parallel transfer workers (default: 5).
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Destination-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    /// Exact destination key. Takes precedence over `prefix`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Key prefix; the item name is appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Buffer options shared by every item in the job.
    #[serde(default)]
    pub buffer: BufferOptions,
}

impl DestinationSpec {
    /// Resolve the destination key for a named item.
    pub fn resolve_key(&self, item_name: &str) -> String {
        if let Some(key) = &self.key {
            return key.clone();
        }
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), item_name),
            None => item_name.to_string(),
        }
    }
}

/// Root configuration for one transfer job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Source scan configuration.
    pub source: SourceSpec,

    /// Destination configuration.
    pub destination: DestinationSpec,
}

// Default value functions for serde

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_upload_concurrency() -> usize {
    DEFAULT_UPLOAD_CONCURRENCY
}

fn default_workers() -> usize {
    5
}

fn default_stability_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
