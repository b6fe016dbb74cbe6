//! Source discovery contract.
//!
//! Every source adapter implements [`SourceStore`]: filtered, optionally
//! recursive listing with an early-stop visitor, plus a byte-read
//! primitive that streams one item through a channel. Callback-driven
//! scanning is what lets discovery and transfer run pipelined instead of
//! list-everything-then-copy.

pub mod local;

pub use local::LocalSource;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::sync::mpsc;

use crate::config::SourceSpec;
use crate::error::{HaulError, Result};

/// One discovered source item. Stem, extension, and parent are derived
/// from the path on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    /// Base name, without any parent segments.
    pub name: String,
    /// Full path or key within the source namespace.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified timestamp.
    pub modified: DateTime<Utc>,
}

impl ItemInfo {
    /// Name without its final extension.
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[..dot],
            _ => &self.name,
        }
    }

    /// Final extension, without the dot.
    pub fn extension(&self) -> Option<&str> {
        match self.name.rfind('.') {
            Some(dot) if dot > 0 => Some(&self.name[dot + 1..]),
            _ => None,
        }
    }

    /// Parent path, empty for top-level items.
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(slash) => &self.path[..slash],
            None => "",
        }
    }
}

/// Visitor verdict: keep scanning or halt immediately. On `Stop`,
/// untouched items and sub-namespaces are never visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Listing parameters for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Root path or namespace.
    pub root: String,
    /// Optional name filter.
    pub pattern: Option<Regex>,
    /// Recurse into sub-namespaces.
    pub recursive: bool,
    /// Skip items modified within the stability window, i.e. possibly
    /// still being written.
    pub skip_unstable: bool,
    /// Width of the stability window.
    pub stability_window: Duration,
}

impl ScanOptions {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: None,
            recursive: false,
            skip_unstable: true,
            stability_window: Duration::from_secs(60),
        }
    }

    /// Build scan options from a validated source spec.
    pub fn from_spec(spec: &SourceSpec) -> Result<Self> {
        let pattern = spec
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| HaulError::Config(format!("invalid source pattern: {}", e)))?;
        Ok(Self {
            root: spec.root.clone(),
            pattern,
            recursive: spec.recursive,
            skip_unstable: spec.skip_unstable,
            stability_window: Duration::from_secs(spec.stability_window_secs),
        })
    }
}

/// Per-item scan callback.
///
/// `accept` is the caller predicate, applied after the name and stability
/// filters; `visit` receives accepted items with a 1-based ordinal.
#[async_trait]
pub trait ScanVisitor: Send {
    fn accept(&mut self, _item: &ItemInfo) -> bool {
        true
    }

    async fn visit(&mut self, item: ItemInfo, ordinal: usize) -> Result<ScanControl>;
}

/// Visitor that collects every accepted item, for callers that want the
/// full sequence rather than pipelined callbacks.
#[derive(Default)]
pub struct CollectVisitor {
    pub items: Vec<ItemInfo>,
}

#[async_trait]
impl ScanVisitor for CollectVisitor {
    async fn visit(&mut self, item: ItemInfo, _ordinal: usize) -> Result<ScanControl> {
        self.items.push(item);
        Ok(ScanControl::Continue)
    }
}

/// Source adapter surface: discovery plus a streaming byte reader.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Walk the namespace under `options.root`, applying the name
    /// pattern, the stability filter, and the visitor's predicate; invoke
    /// `visit` per accepted item. Returns the number of items visited.
    async fn scan(&self, options: &ScanOptions, visitor: &mut dyn ScanVisitor) -> Result<usize>;

    /// Stream one item's bytes. The receiver yields chunks in order until
    /// the source is exhausted or an error is sent.
    async fn read_object(&self, path: &str) -> Result<mpsc::Receiver<Result<Bytes>>>;

    /// List every matching item under `options.root`.
    async fn scan_collect(&self, options: &ScanOptions) -> Result<Vec<ItemInfo>> {
        let mut collector = CollectVisitor::default();
        self.scan(options, &mut collector).await?;
        Ok(collector.items)
    }
}
