//! Roots-changed notifications
//!
//! Hosts are told that the aggregate roots changed through a single signal.
//! Delivery is marshalled through a [`HostExecutor`] (typically the host's
//! main loop) and dropped if the owning workspace has been disposed by the
//! time the task runs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receives the roots-changed signal
pub trait RootsNotifier: Send + Sync {
    fn roots_changed(&self);
}

/// Notifier that ignores the signal
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl RootsNotifier for NoopNotifier {
    fn roots_changed(&self) {}
}

pub type HostTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks on the host's designated thread
pub trait HostExecutor: Send + Sync {
    fn invoke_later(&self, task: HostTask);
}

/// Runs tasks immediately on the calling thread (tests, CLI one-shots)
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl HostExecutor for InlineExecutor {
    fn invoke_later(&self, task: HostTask) {
        task();
    }
}

/// Queues tasks for a host loop that drains a [`HostQueue`]
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<HostTask>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, HostQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, HostQueue { rx })
    }
}

impl HostExecutor for ChannelExecutor {
    fn invoke_later(&self, task: HostTask) {
        if self.tx.send(task).is_err() {
            debug!("Host queue closed, dropping task");
        }
    }
}

/// Receiving side of a [`ChannelExecutor`]
pub struct HostQueue {
    rx: mpsc::UnboundedReceiver<HostTask>,
}

impl HostQueue {
    /// Run queued tasks until every executor is dropped
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            task();
        }
    }

    /// Run whatever is queued right now, returning how many tasks ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

/// Delivers roots-changed signals for one workspace
pub struct NotificationDispatcher {
    notifier: Arc<dyn RootsNotifier>,
    executor: Arc<dyn HostExecutor>,
    disposed: Arc<AtomicBool>,
    modification_count: Arc<AtomicU64>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn RootsNotifier>, executor: Arc<dyn HostExecutor>) -> Self {
        Self {
            notifier,
            executor,
            disposed: Arc::new(AtomicBool::new(false)),
            modification_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a roots-changed signal on the host executor
    pub fn roots_changed(&self) {
        if self.is_disposed() {
            debug!("Workspace disposed, not scheduling roots change");
            return;
        }

        let notifier = Arc::clone(&self.notifier);
        let disposed = Arc::clone(&self.disposed);
        let count = Arc::clone(&self.modification_count);

        self.executor.invoke_later(Box::new(move || {
            // Disposal can race with a queued task
            if disposed.load(Ordering::SeqCst) {
                debug!("Workspace disposed, dropping roots change");
                return;
            }
            count.fetch_add(1, Ordering::SeqCst);
            notifier.roots_changed();
        }));
    }

    /// Number of roots-changed signals delivered so far
    pub fn modification_count(&self) -> u64 {
        self.modification_count.load(Ordering::SeqCst)
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
