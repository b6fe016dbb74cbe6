//! Generic producer/consumer task runtime with a bounded worker pool.
//!
//! One queue, N workers. The producer (any caller holding the processor)
//! feeds work items with [`Processor::put`]; workers pull items and run the
//! processing callback. The callback receives the processor handle, so a
//! worker may enqueue its own continuation — the self-feeding pattern used
//! for cursor-driven database reads where no upfront listing exists.

pub mod streaming;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{HaulError, Result};

/// How long a worker blocks on the queue before re-checking shared state.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// A unit of work handed from producer to worker. Immutable once enqueued.
#[derive(Debug)]
pub struct WorkItem<T> {
    /// Display name for logging.
    pub name: String,
    /// Opaque payload.
    pub payload: T,
}

impl<T> WorkItem<T> {
    /// Create a new work item.
    pub fn new(name: impl Into<String>, payload: T) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

enum Message<T> {
    Item(WorkItem<T>),
    Shutdown,
}

/// Worker callback: `(processor, item, index)` where `index` is the
/// per-worker sequence number. Returning `Ok(None)` records no result.
pub type WorkerCallback<T, R> = Arc<
    dyn Fn(Arc<Processor<T, R>>, WorkItem<T>, usize) -> BoxFuture<'static, Result<Option<R>>>
        + Send
        + Sync,
>;

/// Producer/consumer runtime: one queue, a lazily-started pool of workers.
///
/// Failure semantics: the first callback error is recorded and re-raised
/// from [`wait`](Processor::wait). Once an error is set, workers keep
/// draining queued items without invoking the callback, so the queue always
/// empties and `wait()` never hangs.
pub struct Processor<T, R> {
    name: String,
    /// Self-handle for lazily spawning the worker tasks.
    weak: Weak<Self>,
    tx: async_channel::Sender<Message<T>>,
    rx: async_channel::Receiver<Message<T>>,
    callback: WorkerCallback<T, R>,
    pool_size: usize,

    results: Mutex<Vec<R>>,
    error: Mutex<Option<HaulError>>,
    /// Items submitted but not yet fully processed (or drained).
    pending: AtomicUsize,
    /// Total items ever submitted.
    submitted: AtomicUsize,
    drained: Notify,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T, R> Processor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Create a processor with an unbounded queue.
    pub fn new(
        name: impl Into<String>,
        callback: WorkerCallback<T, R>,
        pool_size: usize,
    ) -> Arc<Self> {
        let (tx, rx) = async_channel::unbounded();
        Self::build(name, callback, pool_size, tx, rx)
    }

    /// Create a processor with a bounded queue.
    ///
    /// `put()` awaits while the queue is full, giving backpressure to the
    /// producer in simple single/multi-consumer pipelines. Not suitable
    /// for self-feeding workers: a worker blocked on a full queue is also
    /// the consumer that would drain it.
    pub fn bounded(
        name: impl Into<String>,
        callback: WorkerCallback<T, R>,
        pool_size: usize,
        capacity: usize,
    ) -> Arc<Self> {
        let (tx, rx) = async_channel::bounded(capacity.max(pool_size + 1));
        Self::build(name, callback, pool_size, tx, rx)
    }

    fn build(
        name: impl Into<String>,
        callback: WorkerCallback<T, R>,
        pool_size: usize,
        tx: async_channel::Sender<Message<T>>,
        rx: async_channel::Receiver<Message<T>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            name: name.into(),
            weak: weak.clone(),
            tx,
            rx,
            callback,
            pool_size: pool_size.max(1),
            results: Mutex::new(Vec::new()),
            error: Mutex::new(None),
            pending: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            drained: Notify::new(),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue a work item, lazily starting the worker pool on first call.
    pub async fn put(&self, item: WorkItem<T>) -> Result<()> {
        self.start_workers();
        // Increment before send so a drain-completion check can never
        // observe zero while this item is in flight.
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.submitted.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Message::Item(item)).await.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(HaulError::transfer(
                self.name.clone(),
                "work queue closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Total items submitted so far.
    pub fn item_count(&self) -> usize {
        self.submitted.load(Ordering::Relaxed)
    }

    /// First recorded worker error, if any.
    pub fn has_error(&self) -> bool {
        self.error.lock().expect("error lock poisoned").is_some()
    }

    fn start_workers(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        // Upgrade always succeeds here: a caller is holding the Arc.
        let this = match self.weak.upgrade() {
            Some(this) => this,
            None => return,
        };
        info!(
            "{}: starting {} parallel worker(s)",
            self.name, self.pool_size
        );
        let mut handles = self.workers.lock().expect("workers lock poisoned");
        for worker_id in 0..self.pool_size {
            let proc = Arc::clone(&this);
            handles.push(tokio::spawn(async move {
                proc.worker_loop(worker_id).await;
            }));
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let mut index = 0usize;
        loop {
            let msg = match tokio::time::timeout(DEQUEUE_TIMEOUT, self.rx.recv()).await {
                Ok(Ok(msg)) => msg,
                // Channel closed: processor dropped mid-run.
                Ok(Err(_)) => break,
                // Timed out: keep the error/shutdown state observable.
                Err(_) => continue,
            };

            let item = match msg {
                Message::Shutdown => break,
                Message::Item(item) => item,
            };

            if self.has_error() {
                // Drain without processing once a failure is recorded.
                debug!(
                    "{} worker {}: draining '{}' after prior error",
                    self.name, worker_id, item.name
                );
                self.mark_done();
                continue;
            }

            let item_name = item.name.clone();
            match (self.callback)(Arc::clone(&self), item, index).await {
                Ok(Some(result)) => {
                    self.results
                        .lock()
                        .expect("results lock poisoned")
                        .push(result);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(
                        "{} worker {}: '{}' failed: {}",
                        self.name, worker_id, item_name, e
                    );
                    let mut slot = self.error.lock().expect("error lock poisoned");
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            }
            index += 1;
            // Decremented only after the callback returns, so a
            // continuation enqueued mid-callback keeps the pending count
            // above zero and can never race the shutdown sentinels.
            self.mark_done();
        }
        debug!(
            "{} worker {}: exiting after {} item(s)",
            self.name, worker_id, index
        );
    }

    fn mark_done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Block until all submitted items drain and all workers exit.
    ///
    /// Returns the flattened non-null results, or re-raises the single
    /// first-captured worker error.
    pub async fn wait(&self) -> Result<Vec<R>> {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register for the notification before checking the count, so
            // a decrement landing in between cannot be missed.
            let _ = notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        if self.started.load(Ordering::SeqCst) {
            for _ in 0..self.pool_size {
                // Ignore send failure: a closed channel means workers are gone.
                let _ = self.tx.send(Message::Shutdown).await;
            }
            let handles: Vec<_> = self
                .workers
                .lock()
                .expect("workers lock poisoned")
                .drain(..)
                .collect();
            for handle in handles {
                let _ = handle.await;
            }
        }

        if let Some(err) = self.error.lock().expect("error lock poisoned").take() {
            return Err(err);
        }

        let results = std::mem::take(&mut *self.results.lock().expect("results lock poisoned"));
        Ok(results)
    }
}
