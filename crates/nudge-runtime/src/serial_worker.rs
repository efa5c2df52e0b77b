//! Serialized task execution
//!
//! All state-mutating operations flow through a single-concurrency executor:
//! one dispatcher task owns a FIFO queue and admits one task at a time. The
//! execution slot is released by whichever comes first, the task's
//! idempotent `finish()` signal or a constant timeout, so a stuck task can
//! never wedge the queue permanently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use nudge_core::{EngineError, Result, WorkerConfig};

// ----------------------------------------------------------------------------
// Task Handle
// ----------------------------------------------------------------------------

/// Completion signal handed to every serialized task
///
/// Calling [`finish`](TaskHandle::finish) more than once is a no-op after
/// the first call; a `finish` arriving after the timeout already released
/// the slot is likewise a no-op.
#[derive(Clone)]
pub struct TaskHandle {
    release: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl TaskHandle {
    fn new(release: oneshot::Sender<()>) -> Self {
        Self {
            release: Arc::new(Mutex::new(Some(release))),
        }
    }

    /// Handle for work that already holds the slot; its `finish` does
    /// nothing
    fn inert() -> Self {
        Self {
            release: Arc::new(Mutex::new(None)),
        }
    }

    /// Signal that the task is done and the slot may be released
    pub fn finish(&self) {
        let sender = self.release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// Consume the release channel without signaling, so any later
    /// `finish` becomes a no-op
    fn disarm(&self) {
        if let Ok(mut slot) = self.release.lock() {
            slot.take();
        }
    }
}

type SerialTask = Box<dyn FnOnce(TaskHandle) -> BoxFuture<'static, ()> + Send + 'static>;

// ----------------------------------------------------------------------------
// Worker Statistics
// ----------------------------------------------------------------------------

#[derive(Default)]
struct StatsInner {
    submitted: AtomicU64,
    executed: AtomicU64,
    timed_out: AtomicU64,
}

/// Counters describing the worker's activity so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Tasks accepted via `submit`
    pub submitted: u64,
    /// Tasks whose body was started
    pub executed: u64,
    /// Tasks whose slot was reclaimed by the timeout
    pub timed_out: u64,
}

// ----------------------------------------------------------------------------
// Serial Worker
// ----------------------------------------------------------------------------

/// Single-concurrency task executor with FIFO admission and timeout-based
/// slot recovery
pub struct SerialWorker {
    queue_tx: mpsc::UnboundedSender<SerialTask>,
    stats: Arc<StatsInner>,
    _dispatcher: JoinHandle<()>,
}

impl SerialWorker {
    /// Create a worker and spawn its dispatcher; must be called within a
    /// tokio runtime
    pub fn new(config: WorkerConfig) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<SerialTask>();
        let stats = Arc::new(StatsInner::default());

        let dispatcher_stats = stats.clone();
        let task_timeout = config.task_timeout;
        let dispatcher = tokio::spawn(async move {
            while let Some(task) = queue_rx.recv().await {
                let (release_tx, release_rx) = oneshot::channel();
                let handle = TaskHandle::new(release_tx);
                // The dispatcher keeps its own clone so the release channel
                // stays open even if the task drops its handle without
                // calling finish; the slot is then reclaimed by the timeout.
                let guard = handle.clone();

                dispatcher_stats.executed.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(task(handle));

                match tokio::time::timeout(task_timeout, release_rx).await {
                    Ok(_) => debug!("serialized task finished, slot released"),
                    Err(_) => {
                        dispatcher_stats.timed_out.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            timeout_ms = task_timeout.as_millis() as u64,
                            "serialized task never signaled completion, reclaiming slot"
                        );
                        guard.disarm();
                    }
                }
            }
            debug!("serial worker queue closed, dispatcher stopping");
        });

        Self {
            queue_tx,
            stats,
            _dispatcher: dispatcher,
        }
    }

    /// Submit a task for execution
    ///
    /// With `immediate` set, the task runs right away on the worker's
    /// runtime without acquiring the concurrency slot; this is the
    /// no-acquire path for work submitted from inside a task that already
    /// holds it. Otherwise the task is admitted once the slot is free, in
    /// submission order.
    pub fn submit<F, Fut>(&self, immediate: bool, task: F) -> Result<()>
    where
        F: FnOnce(TaskHandle) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        if immediate {
            tokio::spawn(task(TaskHandle::inert()));
            return Ok(());
        }

        self.queue_tx
            .send(Box::new(move |handle| task(handle).boxed()))
            .map_err(|_| EngineError::ChannelClosed("serial worker queue".to_string()))
    }

    /// Current activity counters
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            submitted: self.stats.submitted.load(Ordering::Relaxed),
            executed: self.stats.executed.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
