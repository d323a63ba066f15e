//! Background resolution queue
//!
//! A fixed pool of worker threads drains a channel of resolution jobs. One
//! worker is the default: resolvers are not assumed to be safe to run in
//! parallel, and a single worker keeps resolutions serialized.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

use super::tracker::{CancellationToken, Sequence};

/// Work executed on a resolution worker
pub type ResolutionTask = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

struct Job {
    sequence: Sequence,
    key: String,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
    task: ResolutionTask,
    // Dropped when the job is done, which wakes every waiting handle
    _done: Sender<()>,
}

/// Handle to a queued resolution
#[derive(Debug, Clone)]
pub struct RequestHandle {
    sequence: Sequence,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
    done: Receiver<()>,
}

impl RequestHandle {
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Request cancellation; the resolver may ignore it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Block until the job has run (or was skipped), up to `timeout`
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_finished() {
            return true;
        }
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// A handle that is not backed by any job and reports itself finished
    #[cfg(test)]
    pub(crate) fn detached(sequence: Sequence, cancel: CancellationToken) -> Self {
        let (_, done) = crossbeam_channel::bounded(0);
        Self {
            sequence,
            cancel,
            finished: Arc::new(AtomicBool::new(true)),
            done,
        }
    }

    /// A handle that is not backed by any job and never finishes
    #[cfg(test)]
    pub(crate) fn in_flight(sequence: Sequence, cancel: CancellationToken) -> Self {
        let (_, done) = crossbeam_channel::bounded(0);
        Self {
            sequence,
            cancel,
            finished: Arc::new(AtomicBool::new(false)),
            done,
        }
    }
}

/// Fixed-size pool of resolution workers
pub struct ResolutionQueue {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ResolutionQueue {
    /// Spawn `workers` resolution threads (at least one)
    pub fn new(workers: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();

        let mut handles = Vec::with_capacity(workers.max(1));
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("scriptdeps-resolver-{}", index))
                .spawn(move || run_worker(receiver))
                .context("Failed to spawn resolution worker")?;
            handles.push(handle);
        }

        debug!("Resolution queue started with {} worker(s)", handles.len());

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
        })
    }

    /// Queue a task; returns immediately
    pub fn submit(&self, sequence: Sequence, key: &str, task: ResolutionTask) -> Result<RequestHandle> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let job = Job {
            sequence,
            key: key.to_string(),
            cancel: cancel.clone(),
            finished: Arc::clone(&finished),
            task,
            _done: done_tx,
        };

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .context("Resolution queue is shut down")?
            .send(job)
            .map_err(|_| anyhow::anyhow!("Resolution workers have exited"))?;

        Ok(RequestHandle {
            sequence,
            cancel,
            finished,
            done: done_rx,
        })
    }

    #[cfg(test)]
    pub(crate) fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting jobs and wait for the workers to drain the queue
    pub fn shutdown(&self) {
        // Closing the channel ends each worker loop once the queue is empty
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handles: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let current = thread::current().id();
        for handle in handles {
            // A worker may drop the last owner of the queue itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Resolution worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ResolutionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        let Job {
            sequence,
            key,
            cancel,
            finished,
            task,
            _done,
        } = job;

        if cancel.is_cancelled() {
            debug!(script = %key, sequence = %sequence, "Skipping cancelled resolution");
        } else {
            debug!(script = %key, sequence = %sequence, "Running resolution");
            if catch_unwind(AssertUnwindSafe(|| task(&cancel))).is_err() {
                error!(script = %key, sequence = %sequence, "Resolution task panicked");
            }
        }

        finished.store(true, Ordering::SeqCst);
    }
}
