//! Chunked write buffer with parallel multipart dispatch.
//!
//! One logical byte stream fans out to many concurrent destination
//! uploads. The writer appends sequentially; whenever the accumulation
//! buffer reaches the target chunk size a chunk is carved and handed to
//! the upload pool, so slow network writes never stall the producer.
//!
//! Two split modes:
//! - single-object: arbitrary byte boundaries assembled back into one
//!   destination object through a multipart session;
//! - multi-object: boundaries fall on line terminators and every chunk
//!   becomes its own independently parseable object, with the first
//!   line of the stream re-prepended as a header.

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{BufferOptions, Compression, OversizedRecordPolicy, SplitMode};
use crate::error::{HaulError, Result};
use crate::store::{ObjectStore, PartToken, SessionId};

/// A contiguous byte range carved from the accumulation buffer.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Monotonic part index, starting at 1.
    pub part_index: usize,
    /// Raw (pre-compression) byte length.
    pub len: usize,
    /// Destination key this chunk lands under.
    pub key: String,
    /// Whether the payload is compressed before upload.
    pub compressed: bool,
}

/// Per-chunk outcome, collected in upload completion order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransferResult {
    /// Destination key the bytes landed under.
    pub key: String,
    /// Uploaded byte count (post-compression when enabled).
    pub size: u64,
    /// Part index the chunk was carved as.
    pub part_index: usize,
    /// Whether the payload was compressed.
    pub compressed: bool,
}

struct ChunkOutcome {
    token: Option<PartToken>,
    result: TransferResult,
}

/// Decile-based progress tracker for streams with a known total size.
///
/// Each 10% threshold is reported exactly once, in increasing order, no
/// matter how the advances are sliced.
pub struct Progress {
    total: Option<u64>,
    written: u64,
    last_decile: u64,
}

impl Progress {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            written: 0,
            last_decile: 0,
        }
    }

    /// Record `bytes` more written; returns the percent thresholds newly
    /// crossed (multiples of 10, ascending), empty when the total is
    /// unknown.
    pub fn advance(&mut self, bytes: u64) -> Vec<u64> {
        self.written = self.written.saturating_add(bytes);
        let total = match self.total {
            Some(t) if t > 0 => t,
            _ => return Vec::new(),
        };
        let decile = (self.written.min(total) * 10 / total).min(10);
        let mut crossed = Vec::new();
        while self.last_decile < decile {
            self.last_decile += 1;
            crossed.push(self.last_decile * 10);
        }
        crossed
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Write sink that carves a sequential stream into parallel chunk uploads.
///
/// Single-threaded on the write side: `write`, `close`, and `abort` all
/// take `&mut self`. The first upload error is captured and re-raised from
/// the next `write` or from `close`; the buffer never aborts its own
/// session — callers invoke [`abort`](Self::abort) in their failure path so
/// a retry remains possible.
pub struct ChunkedTransferBuffer {
    store: Arc<dyn ObjectStore>,
    /// Effective destination key. In single-object mode with compression
    /// the codec suffix is fixed here, at construction, not per chunk.
    key: String,
    /// Key before any codec suffix; multi-object part keys derive from it.
    base_key: String,
    options: BufferOptions,

    buf: BytesMut,
    header: Option<Bytes>,
    next_part: usize,
    session: Option<SessionId>,
    bytes_written: u64,
    progress: Progress,

    semaphore: Arc<Semaphore>,
    tasks: Vec<JoinHandle<()>>,
    outcomes: Arc<Mutex<Vec<ChunkOutcome>>>,
    error: Arc<Mutex<Option<HaulError>>>,

    closed: bool,
    aborted: bool,
    /// Set once any upload has failed; the buffer then refuses to
    /// commit, leaving abort as the only way out.
    failed: bool,
}

impl ChunkedTransferBuffer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key: impl Into<String>,
        options: BufferOptions,
    ) -> Self {
        let base_key = key.into();
        let key = match (options.mode, options.compression) {
            (SplitMode::SingleObject, Some(codec)) => {
                format!("{}{}", base_key, codec.suffix())
            }
            _ => base_key.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(options.upload_concurrency));
        let progress = Progress::new(options.expected_size);
        Self {
            store,
            key,
            base_key,
            options,
            buf: BytesMut::new(),
            header: None,
            next_part: 1,
            session: None,
            bytes_written: 0,
            progress,
            semaphore,
            tasks: Vec::new(),
            outcomes: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(None)),
            closed: false,
            aborted: false,
            failed: false,
        }
    }

    /// Total raw bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append bytes; carves and dispatches chunks once the buffer reaches
    /// the target chunk size. Re-raises the first captured upload error.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed || self.aborted {
            return Err(HaulError::transfer(
                self.key.clone(),
                "write on a closed or aborted buffer",
            ));
        }
        if let Some(err) = self.take_error() {
            self.failed = true;
            return Err(err);
        }

        self.buf.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        for pct in self.progress.advance(data.len() as u64) {
            info!(
                "{}: {}% transferred ({} of {} bytes)",
                self.base_key,
                pct,
                self.progress.written(),
                self.options.expected_size.unwrap_or(0)
            );
        }

        while self.buf.len() >= self.options.chunk_size {
            match self.options.mode {
                SplitMode::SingleObject => {
                    let raw = self.buf.split_to(self.options.chunk_size).freeze();
                    self.dispatch(raw).await?;
                }
                SplitMode::MultiObject => {
                    let window = &self.buf[..self.options.chunk_size];
                    match window.iter().rposition(|&b| b == b'\n') {
                        Some(eol) => self.carve_record_chunk(eol + 1).await?,
                        None if self.buf.len() > 2 * self.options.chunk_size => {
                            match self.options.oversized_record {
                                OversizedRecordPolicy::Error => {
                                    return Err(HaulError::transfer(
                                        self.base_key.clone(),
                                        format!(
                                            "no record terminator within {} bytes; \
                                             refusing to split mid-record",
                                            2 * self.options.chunk_size
                                        ),
                                    ));
                                }
                                OversizedRecordPolicy::ForceSplit => {
                                    warn!(
                                        "{}: no record terminator within {} bytes, \
                                         force-splitting mid-record",
                                        self.base_key,
                                        2 * self.options.chunk_size
                                    );
                                    self.carve_record_chunk(self.options.chunk_size).await?;
                                }
                            }
                        }
                        // Record spans past the window; keep accumulating.
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Flush the remainder, await all uploads, and commit.
    ///
    /// A stream that never produced a chunk still commits exactly one
    /// (possibly zero-byte) destination object, never an abandoned
    /// session. Calling `close` twice is an error, and a buffer with any
    /// failed upload refuses to commit even if the caller ignored the
    /// `write` error that reported it.
    pub async fn close(&mut self) -> Result<Vec<TransferResult>> {
        if self.aborted {
            return Err(HaulError::transfer(
                self.key.clone(),
                "close on an aborted buffer",
            ));
        }
        if self.closed {
            return Err(HaulError::transfer(self.key.clone(), "close called twice"));
        }
        self.closed = true;
        if self.failed {
            return Err(HaulError::transfer(
                self.key.clone(),
                "a chunk upload failed; the buffer must be aborted",
            ));
        }

        if !self.has_error() && (!self.buf.is_empty() || self.next_part == 1) {
            let raw = self.buf.split().freeze();
            let data = self.with_header(raw);
            self.dispatch(data).await?;
        }

        for task in std::mem::take(&mut self.tasks) {
            if task.await.is_err() {
                self.record_error(HaulError::transfer(
                    self.key.clone(),
                    "upload task panicked",
                ));
            }
        }
        if let Some(err) = self.take_error() {
            self.failed = true;
            return Err(err);
        }

        let outcomes = std::mem::take(
            &mut *self.outcomes.lock().expect("outcomes lock poisoned"),
        );

        if let Some(session) = self.session.take() {
            let mut parts: Vec<(usize, PartToken)> = outcomes
                .iter()
                .filter_map(|o| o.token.clone().map(|t| (o.result.part_index, t)))
                .collect();
            // Uploads finish out of order; commit order is by part index.
            parts.sort_by_key(|(n, _)| *n);
            let part_count = parts.len();
            self.store.complete_multipart(&session, parts).await?;
            info!(
                "{}: multipart session {} committed ({} parts, {} bytes)",
                self.key, session, part_count, self.bytes_written
            );
        } else {
            info!(
                "{}: {} object(s) written ({} bytes)",
                self.base_key,
                outcomes.len(),
                self.bytes_written
            );
        }

        Ok(outcomes.into_iter().map(|o| o.result).collect())
    }

    /// Discard the open session and stop all work. In-flight upload tasks
    /// are cancelled without awaiting their outcome; no partial object
    /// persists. Idempotent.
    pub async fn abort(&mut self) -> Result<()> {
        if self.aborted {
            return Ok(());
        }
        self.aborted = true;
        for task in std::mem::take(&mut self.tasks) {
            task.abort();
        }
        self.buf.clear();
        if let Some(session) = self.session.take() {
            warn!("{}: aborting multipart session {}", self.key, session);
            self.store.abort_multipart(&session).await?;
        }
        Ok(())
    }

    async fn carve_record_chunk(&mut self, len: usize) -> Result<()> {
        let raw = self.buf.split_to(len).freeze();
        let data = self.with_header(raw);
        self.dispatch(data).await
    }

    /// Capture the header from the first chunk; re-prepend it to every
    /// later one so each object parses on its own.
    fn with_header(&mut self, raw: Bytes) -> Bytes {
        if self.options.mode != SplitMode::MultiObject {
            return raw;
        }
        if self.next_part == 1 {
            if let Some(eol) = raw.iter().position(|&b| b == b'\n') {
                self.header = Some(raw.slice(..=eol));
            }
            return raw;
        }
        match &self.header {
            Some(header) => {
                let mut out = BytesMut::with_capacity(header.len() + raw.len());
                out.extend_from_slice(header);
                out.extend_from_slice(&raw);
                out.freeze()
            }
            None => raw,
        }
    }

    async fn dispatch(&mut self, raw: Bytes) -> Result<()> {
        let part_index = self.next_part;
        self.next_part += 1;

        let (key, session) = match self.options.mode {
            SplitMode::SingleObject => {
                if self.session.is_none() {
                    let id = self.store.begin_multipart(&self.key).await?;
                    debug!("{}: opened multipart session {}", self.key, id);
                    self.session = Some(id);
                }
                (self.key.clone(), self.session.clone())
            }
            SplitMode::MultiObject => {
                let mut key = part_key(&self.base_key, part_index);
                if let Some(codec) = self.options.compression {
                    key.push_str(codec.suffix());
                }
                (key, None)
            }
        };

        let chunk = Chunk {
            part_index,
            len: raw.len(),
            key,
            compressed: self.options.compression.is_some(),
        };
        debug!(
            "{}: dispatching part {} ({} bytes raw)",
            self.base_key, chunk.part_index, chunk.len
        );

        let store = Arc::clone(&self.store);
        let semaphore = Arc::clone(&self.semaphore);
        let outcomes = Arc::clone(&self.outcomes);
        let error = Arc::clone(&self.error);
        let compression = self.options.compression;

        self.tasks.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // Semaphore closed only during teardown.
                Err(_) => return,
            };
            let payload = match compression {
                Some(Compression::Gzip) => match gzip_chunk(&raw) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        record_first(&error, e);
                        return;
                    }
                },
                None => raw,
            };
            let size = payload.len() as u64;
            let upload = match &session {
                Some(id) => store
                    .upload_part(id, chunk.part_index, payload)
                    .await
                    .map(Some),
                None => store.put_object(&chunk.key, payload).await.map(|_| None),
            };
            match upload {
                Ok(token) => {
                    outcomes.lock().expect("outcomes lock poisoned").push(ChunkOutcome {
                        token,
                        result: TransferResult {
                            key: chunk.key,
                            size,
                            part_index: chunk.part_index,
                            compressed: chunk.compressed,
                        },
                    });
                }
                Err(e) => record_first(&error, e),
            }
        }));
        Ok(())
    }

    fn take_error(&self) -> Option<HaulError> {
        self.error.lock().expect("error lock poisoned").take()
    }

    fn has_error(&self) -> bool {
        self.error.lock().expect("error lock poisoned").is_some()
    }

    fn record_error(&self, err: HaulError) {
        record_first(&self.error, err);
    }
}

fn record_first(slot: &Mutex<Option<HaulError>>, err: HaulError) {
    let mut slot = slot.lock().expect("error lock poisoned");
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Insert `_part_N` before the key's extension: `dir/data.csv` becomes
/// `dir/data_part_3.csv`.
fn part_key(base: &str, part: usize) -> String {
    let name_start = base.rfind('/').map_or(0, |s| s + 1);
    match base[name_start..].rfind('.') {
        Some(rel_dot) if rel_dot > 0 => {
            let dot = name_start + rel_dot;
            format!("{}_part_{}{}", &base[..dot], part, &base[dot..])
        }
        _ => format!("{}_part_{}", base, part),
    }
}

fn gzip_chunk(data: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2 + 64),
        flate2::Compression::default(),
    );
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}
