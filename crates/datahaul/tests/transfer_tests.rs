//! End-to-end transfer tests against the in-memory object store.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;

use datahaul::{
    BufferOptions, Compression, DestinationSpec, HaulError, JobConfig, LocalSource, MemoryStore,
    ObjectStore, OperatorRegistry, PartToken, RecordBatch, RecordSource, Result, RunContext,
    SessionId, SourceHandle, SourceSpec, SplitMode,
};

fn job_config(root: &str, destination: DestinationSpec) -> JobConfig {
    JobConfig {
        source: SourceSpec {
            root: root.to_string(),
            pattern: None,
            recursive: false,
            // Fixtures are freshly written; the write-stability filter
            // would hide them.
            skip_unstable: false,
            stability_window_secs: 60,
            workers: 3,
        },
        destination,
    }
}

fn prefix_destination(prefix: &str, buffer: BufferOptions) -> DestinationSpec {
    DestinationSpec {
        key: None,
        prefix: Some(prefix.to_string()),
        buffer,
    }
}

#[tokio::test]
async fn file_transfer_copies_every_file() {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in [("a.csv", "1\n"), ("b.csv", "22\n"), ("c.csv", "333\n")] {
        std::fs::write(dir.path().join(name), body).unwrap();
    }

    let store = Arc::new(MemoryStore::new());
    let config = job_config(
        &dir.path().to_string_lossy(),
        prefix_destination("raw", BufferOptions::default()),
    );

    let operator = OperatorRegistry::with_defaults()
        .get("file", "object")
        .unwrap();
    let report = operator
        .execute(
            &config,
            SourceHandle::Files(Arc::new(LocalSource::new())),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.files_transferred, 3);
    assert_eq!(report.stats.total_bytes, 2 + 3 + 4);
    assert_eq!(report.stats.rows_processed, 0);
    assert_eq!(store.keys(), vec!["raw/a.csv", "raw/b.csv", "raw/c.csv"]);
    assert_eq!(store.get("raw/c.csv").unwrap(), Bytes::from_static(b"333\n"));
    assert_eq!(store.open_session_count(), 0);
}

#[tokio::test]
async fn file_transfer_gzip_split_objects_decode() {
    let dir = tempfile::tempdir().unwrap();
    let mut body = String::from("id,val\n");
    for i in 0..300 {
        body.push_str(&format!("{},{}\n", i, i * 7));
    }
    std::fs::write(dir.path().join("rows.csv"), &body).unwrap();

    let store = Arc::new(MemoryStore::new());
    let config = job_config(
        &dir.path().to_string_lossy(),
        prefix_destination(
            "split",
            BufferOptions {
                mode: SplitMode::MultiObject,
                chunk_size: 512,
                compression: Some(Compression::Gzip),
                ..Default::default()
            },
        ),
    );

    let operator = OperatorRegistry::with_defaults()
        .get("file", "object")
        .unwrap();
    operator
        .execute(
            &config,
            SourceHandle::Files(Arc::new(LocalSource::new())),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap();

    let keys = store.keys();
    assert!(keys.len() > 1);
    let mut reconstructed = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        assert!(key.starts_with("split/rows_part_"));
        assert!(key.ends_with(".csv.gz"));
        let mut decoded = Vec::new();
        GzDecoder::new(&store.get(key).unwrap()[..])
            .read_to_end(&mut decoded)
            .unwrap();
        // Every chunk carries the header and parses on its own.
        assert!(decoded.starts_with(b"id,val\n"));
        if i == 0 {
            reconstructed.extend_from_slice(&decoded);
        } else {
            reconstructed.extend_from_slice(&decoded[b"id,val\n".len()..]);
        }
    }
    assert_eq!(reconstructed, body.as_bytes());
}

#[tokio::test]
async fn file_transfer_multipart_reassembles_large_file() {
    let dir = tempfile::tempdir().unwrap();
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    std::fs::write(dir.path().join("blob.bin"), &body).unwrap();

    let store = Arc::new(MemoryStore::new());
    let config = job_config(
        &dir.path().to_string_lossy(),
        prefix_destination(
            "bin",
            BufferOptions {
                chunk_size: 1024,
                ..Default::default()
            },
        ),
    );

    let operator = OperatorRegistry::with_defaults()
        .get("file", "object")
        .unwrap();
    let report = operator
        .execute(
            &config,
            SourceHandle::Files(Arc::new(LocalSource::new())),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.total_bytes, 10_000);
    assert_eq!(store.get("bin/blob.bin").unwrap(), Bytes::from(body));
}

struct FakeQuery {
    batches: Vec<&'static str>,
}

#[async_trait]
impl RecordSource for FakeQuery {
    fn header(&self) -> Option<Bytes> {
        Some(Bytes::from_static(b"id,name\n"))
    }

    async fn fetch_batch(&self, cursor: u64, _limit: usize) -> Result<Option<RecordBatch>> {
        match self.batches.get(cursor as usize) {
            Some(batch) => Ok(Some(RecordBatch {
                data: Bytes::from_static(batch.as_bytes()),
                rows: batch.lines().count() as u64,
                next_cursor: cursor + 1,
            })),
            None => Ok(None),
        }
    }
}

#[tokio::test]
async fn query_transfer_streams_batches_in_order() {
    let store = Arc::new(MemoryStore::new());
    let config = JobConfig {
        source: SourceSpec {
            root: "select * from sales".into(),
            pattern: None,
            recursive: false,
            skip_unstable: false,
            stability_window_secs: 60,
            workers: 1,
        },
        destination: DestinationSpec {
            key: Some("exports/sales.csv".into()),
            prefix: None,
            buffer: BufferOptions::default(),
        },
    };
    let query = FakeQuery {
        batches: vec!["1,ann\n2,bo\n", "3,cy\n", "4,dee\n5,ed\n"],
    };

    let operator = OperatorRegistry::with_defaults()
        .get("query", "object")
        .unwrap();
    let report = operator
        .execute(
            &config,
            SourceHandle::Records(Arc::new(query)),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.rows_processed, 5);
    assert_eq!(report.summary.items, 3);
    assert_eq!(
        store.get("exports/sales.csv").unwrap(),
        Bytes::from_static(b"id,name\n1,ann\n2,bo\n3,cy\n4,dee\n5,ed\n")
    );
    assert_eq!(store.open_session_count(), 0);
}

#[tokio::test]
async fn query_transfer_empty_feed_commits_header_only_object() {
    let store = Arc::new(MemoryStore::new());
    let config = JobConfig {
        source: SourceSpec {
            root: "select * from empty".into(),
            pattern: None,
            recursive: false,
            skip_unstable: false,
            stability_window_secs: 60,
            workers: 1,
        },
        destination: DestinationSpec {
            key: Some("exports/empty.csv".into()),
            prefix: None,
            buffer: BufferOptions::default(),
        },
    };

    let operator = OperatorRegistry::with_defaults()
        .get("query", "object")
        .unwrap();
    let report = operator
        .execute(
            &config,
            SourceHandle::Records(Arc::new(FakeQuery { batches: vec![] })),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.stats.rows_processed, 0);
    assert_eq!(
        store.get("exports/empty.csv").unwrap(),
        Bytes::from_static(b"id,name\n")
    );
}

/// Delegates to an inner store but fails every part upload.
struct BrokenUploads {
    inner: MemoryStore,
}

#[async_trait]
impl ObjectStore for BrokenUploads {
    async fn put_object(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner.put_object(key, data).await
    }

    async fn begin_multipart(&self, key: &str) -> Result<SessionId> {
        self.inner.begin_multipart(key).await
    }

    async fn upload_part(
        &self,
        session: &SessionId,
        _part_number: usize,
        _data: Bytes,
    ) -> Result<PartToken> {
        Err(HaulError::session(session.0.clone(), "injected upload failure"))
    }

    async fn complete_multipart(
        &self,
        session: &SessionId,
        parts: Vec<(usize, PartToken)>,
    ) -> Result<()> {
        self.inner.complete_multipart(session, parts).await
    }

    async fn abort_multipart(&self, session: &SessionId) -> Result<()> {
        self.inner.abort_multipart(session).await
    }
}

#[tokio::test]
async fn upload_failure_aborts_session_and_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("doomed.csv"), b"x\ny\n").unwrap();

    let store = Arc::new(BrokenUploads {
        inner: MemoryStore::new(),
    });
    let config = job_config(
        &dir.path().to_string_lossy(),
        prefix_destination("out", BufferOptions::default()),
    );

    let operator = OperatorRegistry::with_defaults()
        .get("file", "object")
        .unwrap();
    let err = operator
        .execute(
            &config,
            SourceHandle::Files(Arc::new(LocalSource::new())),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, HaulError::Session { .. }));
    assert_eq!(store.inner.object_count(), 0);
    assert_eq!(store.inner.open_session_count(), 0);
}

#[tokio::test]
async fn mismatched_source_handle_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let config = job_config("/tmp", prefix_destination("x", BufferOptions::default()));

    let file_op = OperatorRegistry::with_defaults()
        .get("file", "object")
        .unwrap();
    let err = file_op
        .execute(
            &config,
            SourceHandle::Records(Arc::new(FakeQuery { batches: vec![] })),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            &RunContext::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HaulError::Config(_)));
}
