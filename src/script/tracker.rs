//! Request tracking for asynchronous resolutions
//!
//! Every asynchronous resolution is tagged with a sequence number drawn from a
//! process-wide monotonic counter. The tracker remembers, per script, the
//! modification stamp a request was issued for and the latest request. Two
//! rules follow from that record:
//!
//! - a request is only sent when the stamp changed or no request for the
//!   current stamp is still in flight
//! - a completed request is applied only if it is still the latest one

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::worker::RequestHandle;

/// Monotonic request number; later requests compare greater
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sequence(u64);

impl Sequence {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Draw the next sequence number
pub fn next_sequence() -> Sequence {
    Sequence(NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Advisory cancellation flag shared between the issuer and the resolver
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The latest request issued for a script
#[derive(Debug, Clone)]
pub struct TrackedRequest {
    pub sequence: Sequence,
    pub handle: RequestHandle,
}

#[derive(Debug)]
struct TrackerEntry {
    stamp: Option<u64>,
    request: Option<TrackedRequest>,
}

/// Per-script request state
#[derive(Debug, Default)]
pub struct RequestTracker {
    entries: HashMap<String, TrackerEntry>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staleness gate: should a new request be issued for `key` at `stamp`?
    ///
    /// Only a request still in flight for the same stamp suppresses another
    /// one. Once it finished, the next trigger retries.
    pub fn should_send(&self, key: &str, stamp: Option<u64>) -> bool {
        match self.entries.get(key) {
            None => true,
            Some(entry) => {
                entry.stamp != stamp
                    || entry
                        .request
                        .as_ref()
                        .map_or(true, |request| request.handle.is_finished())
            }
        }
    }

    /// Record a freshly issued request, returning the one it replaces
    pub fn track(
        &mut self,
        key: &str,
        stamp: Option<u64>,
        request: TrackedRequest,
    ) -> Option<TrackedRequest> {
        self.entries
            .insert(
                key.to_string(),
                TrackerEntry {
                    stamp,
                    request: Some(request),
                },
            )
            .and_then(|previous| previous.request)
    }

    /// Sequence number of the latest request for `key`
    pub fn current_sequence(&self, key: &str) -> Option<Sequence> {
        self.entries
            .get(key)
            .and_then(|entry| entry.request.as_ref())
            .map(|request| request.sequence)
    }

    /// Whether the completion of `sequence` may still be applied
    pub fn is_current(&self, key: &str, sequence: Sequence) -> bool {
        self.current_sequence(key) == Some(sequence)
    }

    /// Forget a script, returning its latest request
    pub fn remove(&mut self, key: &str) -> Option<TrackedRequest> {
        self.entries.remove(key).and_then(|entry| entry.request)
    }

    /// Forget every script, returning all latest requests
    pub fn drain(&mut self) -> Vec<TrackedRequest> {
        self.entries
            .drain()
            .filter_map(|(_, entry)| entry.request)
            .collect()
    }

    /// Handles of requests that have not finished yet
    pub fn pending(&self) -> Vec<RequestHandle> {
        self.entries
            .values()
            .filter_map(|entry| entry.request.as_ref())
            .filter(|request| !request.handle.is_finished())
            .map(|request| request.handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
