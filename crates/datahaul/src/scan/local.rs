//! Filesystem-backed source adapter.
//!
//! Stands in for a mounted remote share in local runs and tests; network
//! adapters implement the same [`SourceStore`] contract out of tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ItemInfo, ScanControl, ScanOptions, ScanVisitor, SourceStore};
use crate::error::{HaulError, Result};

const READ_CHUNK_SIZE: usize = 64 * 1024;
const READ_CHANNEL_CAPACITY: usize = 16;

/// Source adapter over the local filesystem.
pub struct LocalSource {
    read_chunk_size: usize,
}

impl LocalSource {
    pub fn new() -> Self {
        Self {
            read_chunk_size: READ_CHUNK_SIZE,
        }
    }
}

impl Default for LocalSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceStore for LocalSource {
    async fn scan(&self, options: &ScanOptions, visitor: &mut dyn ScanVisitor) -> Result<usize> {
        let now = Utc::now();
        let mut visited = 0usize;
        // Iterative walk: directories queued depth-first, entries sorted
        // by name so discovery order is deterministic.
        let mut pending_dirs = vec![PathBuf::from(&options.root)];

        while let Some(dir) = pending_dirs.pop() {
            let mut entries = read_sorted_entries(&dir).await?;
            // Subdirectories are pushed in reverse so the stack pops them
            // in name order.
            entries.reverse();
            let mut files = Vec::new();
            for entry in entries {
                if entry.is_dir {
                    if options.recursive {
                        pending_dirs.push(entry.path);
                    }
                } else {
                    files.push(entry);
                }
            }
            files.reverse();

            for entry in files {
                let item = entry.into_item()?;
                if let Some(pattern) = &options.pattern {
                    if !pattern.is_match(&item.name) {
                        continue;
                    }
                }
                if options.skip_unstable {
                    let age = now.signed_duration_since(item.modified);
                    let window = chrono::Duration::from_std(options.stability_window)
                        .unwrap_or(chrono::Duration::MAX);
                    if age < window {
                        debug!(
                            "skipping {}: modified {}s ago, possibly still being written",
                            item.path,
                            age.num_seconds()
                        );
                        continue;
                    }
                }
                if !visitor.accept(&item) {
                    continue;
                }
                visited += 1;
                if visitor.visit(item, visited).await? == ScanControl::Stop {
                    debug!("scan of {} stopped after {} item(s)", options.root, visited);
                    return Ok(visited);
                }
            }
        }
        Ok(visited)
    }

    async fn read_object(&self, path: &str) -> Result<mpsc::Receiver<Result<Bytes>>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| HaulError::scan(path, format!("open failed: {}", e)))?;
        let (tx, rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        let chunk_size = self.read_chunk_size;
        let path = path.to_string();

        tokio::spawn(async move {
            loop {
                let mut buf = vec![0u8; chunk_size];
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.truncate(n);
                        if tx.send(Ok(Bytes::from(buf))).await.is_err() {
                            // Receiver dropped: reader no longer wanted.
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(HaulError::scan(
                                path.clone(),
                                format!("read failed: {}", e),
                            )))
                            .await;
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }
}

struct DirEntryInfo {
    path: PathBuf,
    is_dir: bool,
    size: u64,
    modified: DateTime<Utc>,
}

impl DirEntryInfo {
    fn into_item(self) -> Result<ItemInfo> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                HaulError::scan(self.path.display().to_string(), "entry has no file name")
            })?;
        Ok(ItemInfo {
            name,
            path: self.path.to_string_lossy().into_owned(),
            size: self.size,
            modified: self.modified,
        })
    }
}

async fn read_sorted_entries(dir: &Path) -> Result<Vec<DirEntryInfo>> {
    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| HaulError::scan(dir.display().to_string(), format!("list failed: {}", e)))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| HaulError::scan(dir.display().to_string(), e.to_string()))?
    {
        let meta = entry
            .metadata()
            .await
            .map_err(|e| HaulError::scan(entry.path().display().to_string(), e.to_string()))?;
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        entries.push(DirEntryInfo {
            path: entry.path(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn write_file(dir: &Path, name: &str, contents: &[u8]) {
        tokio::fs::write(dir.join(name), contents).await.unwrap();
    }

    fn relaxed_options(root: &Path) -> ScanOptions {
        let mut options = ScanOptions::new(root.to_string_lossy().into_owned());
        // Fixture files are freshly written; the write-stability filter
        // would hide them all.
        options.skip_unstable = false;
        options
    }

    #[tokio::test]
    async fn test_scan_collects_sorted_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "b.csv", b"2").await;
        write_file(dir.path(), "a.csv", b"1").await;
        write_file(dir.path(), "c.csv", b"3").await;

        let source = LocalSource::new();
        let items = source
            .scan_collect(&relaxed_options(dir.path()))
            .await
            .unwrap();
        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a.csv", "b.csv", "c.csv"]);
        assert_eq!(items[0].size, 1);
    }

    #[tokio::test]
    async fn test_pattern_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "keep.csv", b"x").await;
        write_file(dir.path(), "drop.txt", b"x").await;

        let mut options = relaxed_options(dir.path());
        options.pattern = Some(regex::Regex::new(r".*\.csv$").unwrap());
        let items = LocalSource::new().scan_collect(&options).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "keep.csv");
    }

    #[tokio::test]
    async fn test_recursion_is_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "top.csv", b"x").await;
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        write_file(&dir.path().join("sub"), "nested.csv", b"x").await;

        let source = LocalSource::new();
        let flat = source
            .scan_collect(&relaxed_options(dir.path()))
            .await
            .unwrap();
        assert_eq!(flat.len(), 1);

        let mut options = relaxed_options(dir.path());
        options.recursive = true;
        let deep = source.scan_collect(&options).await.unwrap();
        let names: Vec<_> = deep.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["top.csv", "nested.csv"]);
    }

    #[tokio::test]
    async fn test_stability_window_skips_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "inflight.csv", b"x").await;

        let mut options = ScanOptions::new(dir.path().to_string_lossy().into_owned());
        options.stability_window = Duration::from_secs(3600);
        let items = LocalSource::new().scan_collect(&options).await.unwrap();
        assert!(items.is_empty());

        options.skip_unstable = false;
        let items = LocalSource::new().scan_collect(&options).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_early_stop_halts_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "f1.csv", b"x").await;
        write_file(dir.path(), "f2.csv", b"x").await;
        write_file(dir.path(), "f3.csv", b"x").await;

        struct StopAtTwo {
            seen: Vec<String>,
        }

        #[async_trait]
        impl ScanVisitor for StopAtTwo {
            async fn visit(&mut self, item: ItemInfo, ordinal: usize) -> Result<ScanControl> {
                self.seen.push(item.name);
                Ok(if ordinal >= 2 {
                    ScanControl::Stop
                } else {
                    ScanControl::Continue
                })
            }
        }

        let mut visitor = StopAtTwo { seen: Vec::new() };
        let visited = LocalSource::new()
            .scan(&relaxed_options(dir.path()), &mut visitor)
            .await
            .unwrap();
        assert_eq!(visited, 2);
        assert_eq!(visitor.seen, vec!["f1.csv", "f2.csv"]);
    }

    #[tokio::test]
    async fn test_predicate_filters_before_visit() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "empty.csv", b"").await;
        write_file(dir.path(), "full.csv", b"data").await;

        struct NonEmptyOnly {
            seen: Vec<String>,
        }

        #[async_trait]
        impl ScanVisitor for NonEmptyOnly {
            fn accept(&mut self, item: &ItemInfo) -> bool {
                item.size > 0
            }

            async fn visit(&mut self, item: ItemInfo, _ordinal: usize) -> Result<ScanControl> {
                self.seen.push(item.name);
                Ok(ScanControl::Continue)
            }
        }

        let mut visitor = NonEmptyOnly { seen: Vec::new() };
        let visited = LocalSource::new()
            .scan(&relaxed_options(dir.path()), &mut visitor)
            .await
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(visitor.seen, vec!["full.csv"]);
    }

    #[tokio::test]
    async fn test_read_object_streams_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let contents: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        write_file(dir.path(), "big.bin", &contents).await;

        let path = dir.path().join("big.bin");
        let mut rx = LocalSource::new()
            .read_object(&path.to_string_lossy())
            .await
            .unwrap();
        let mut streamed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streamed.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(streamed, contents);
    }

    #[tokio::test]
    async fn test_read_object_missing_file_errors() {
        let err = LocalSource::new()
            .read_object("/definitely/not/here.csv")
            .await
            .unwrap_err();
        assert!(matches!(err, HaulError::Scan { .. }));
    }
}
