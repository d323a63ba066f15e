//! Dependency cache shared by all scripts of a workspace
//!
//! Holds, behind a single reader/writer lock:
//! - the per-script dependency sets (keyed by normalized script path)
//! - four derived views computed lazily from all entries: classpath roots,
//!   classpath scope, source roots, source scope
//! - the request tracker used by asynchronous resolutions
//!
//! Every store mutation that changes an entry discards the derived views in
//! the same critical section, so a view read after a mutation always reflects
//! it. Signalling the change to the outside world (listeners, hosts) is left
//! to the caller, which does it once per net change via [`DependenciesCache::invalidate`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use super::dependencies::{distinct_paths, DependencySet};
use super::roots::{to_roots, RootHandle, SearchScope};
use super::tracker::{RequestTracker, Sequence};
use crate::logging::{operations, status};

/// Callback run whenever the derived views are invalidated
pub type InvalidationListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct DerivedViews {
    classpath_roots: Option<Arc<Vec<RootHandle>>>,
    classpath_scope: Option<Arc<SearchScope>>,
    source_roots: Option<Arc<Vec<RootHandle>>>,
    source_scope: Option<Arc<SearchScope>>,
}

impl DerivedViews {
    fn invalidate_all(&mut self) {
        *self = Self::default();
    }
}

#[derive(Default)]
struct CacheState {
    entries: BTreeMap<String, DependencySet>,
    views: DerivedViews,
    requests: RequestTracker,
    view_computations: u64,
    invalidations: u64,
}

impl CacheState {
    fn flatten(&self, select: fn(&DependencySet) -> &[PathBuf]) -> Vec<PathBuf> {
        distinct_paths(self.entries.values().flat_map(|deps| select(deps).iter().cloned()))
    }

    fn classpath_roots(&mut self) -> Arc<Vec<RootHandle>> {
        if let Some(roots) = &self.views.classpath_roots {
            return Arc::clone(roots);
        }
        let roots = Arc::new(to_roots(&self.flatten(DependencySet::classpath)));
        self.view_computations += 1;
        self.views.classpath_roots = Some(Arc::clone(&roots));
        roots
    }

    fn classpath_scope(&mut self) -> Arc<SearchScope> {
        if let Some(scope) = &self.views.classpath_scope {
            return Arc::clone(scope);
        }
        let scope = Arc::new(SearchScope::new(self.classpath_roots().to_vec()));
        self.view_computations += 1;
        self.views.classpath_scope = Some(Arc::clone(&scope));
        scope
    }

    fn source_roots(&mut self) -> Arc<Vec<RootHandle>> {
        if let Some(roots) = &self.views.source_roots {
            return Arc::clone(roots);
        }
        let roots = Arc::new(to_roots(&self.flatten(DependencySet::sources)));
        self.view_computations += 1;
        self.views.source_roots = Some(Arc::clone(&roots));
        roots
    }

    fn source_scope(&mut self) -> Arc<SearchScope> {
        if let Some(scope) = &self.views.source_scope {
            return Arc::clone(scope);
        }
        let scope = Arc::new(SearchScope::new(self.source_roots().to_vec()));
        self.view_computations += 1;
        self.views.source_scope = Some(Arc::clone(&scope));
        scope
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub tracked_requests: usize,
    pub view_computations: u64,
    pub invalidations: u64,
}

/// Outcome of committing an asynchronous resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// A newer request exists; nothing was written
    Superseded,
    /// The value was written; `true` if it differs from the previous one
    Applied(bool),
}

#[derive(Default)]
pub struct DependenciesCache {
    state: RwLock<CacheState>,
    listeners: Mutex<Vec<InvalidationListener>>,
}

impl DependenciesCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<DependencySet> {
        self.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().entries.keys().cloned().collect()
    }

    /// Store `value` for `key`; returns whether it differs from the previous value
    pub fn upsert(&self, key: &str, value: DependencySet) -> bool {
        self.upsert_with(key, value, |_| {})
    }

    /// Like [`upsert`](Self::upsert), running `on_change` under the lock when the value changed
    ///
    /// Concurrent writers therefore run `on_change` in the order their values
    /// landed in the cache.
    pub fn upsert_with(
        &self,
        key: &str,
        value: DependencySet,
        on_change: impl FnOnce(&DependencySet),
    ) -> bool {
        let mut state = self.write();
        let changed = Self::upsert_locked(&mut state, key, value.clone());
        if changed {
            on_change(&value);
        }
        changed
    }

    fn upsert_locked(state: &mut CacheState, key: &str, value: DependencySet) -> bool {
        let changed = match state.entries.get(key) {
            Some(previous) => !value.matches(previous),
            None => true,
        };

        state.entries.insert(key.to_string(), value);
        if changed {
            state.views.invalidate_all();
        }

        let outcome = if changed {
            status::CHANGED
        } else {
            status::UNCHANGED
        };
        trace!(
            operation = operations::UPSERT,
            status = outcome,
            script = %key,
            "cache upsert"
        );
        changed
    }

    /// Store the result of request `sequence`, unless a newer request was issued
    ///
    /// The sequence check, the write and `on_change` happen under one lock, so
    /// a stale completion can never overwrite the result of a newer request.
    pub fn commit_if_current(
        &self,
        key: &str,
        sequence: Sequence,
        value: DependencySet,
        on_change: impl FnOnce(&DependencySet),
    ) -> Commit {
        let mut state = self.write();
        if !state.requests.is_current(key, sequence) {
            return Commit::Superseded;
        }
        let changed = Self::upsert_locked(&mut state, key, value.clone());
        if changed {
            on_change(&value);
        }
        Commit::Applied(changed)
    }

    /// Remove `key`; returns whether an entry existed
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.write();
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.views.invalidate_all();
            debug!(operation = operations::DELETE, script = %key, "cache entry removed");
        }
        removed
    }

    /// Remove every entry; returns whether anything was removed
    pub fn clear(&self) -> bool {
        let mut state = self.write();
        let removed = !state.entries.is_empty();
        state.entries.clear();
        state.views.invalidate_all();
        removed
    }

    /// Discard all derived views and run the invalidation listeners
    ///
    /// Called once per net change (a batch, a completed request), never per
    /// individual store write.
    pub fn invalidate(&self) {
        {
            let mut state = self.write();
            state.views.invalidate_all();
            state.invalidations += 1;
        }

        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener();
        }
    }

    pub fn add_invalidation_listener(&self, listener: InvalidationListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn view<T>(
        &self,
        cached: impl Fn(&DerivedViews) -> Option<Arc<T>>,
        compute: impl FnOnce(&mut CacheState) -> Arc<T>,
    ) -> Arc<T> {
        if let Some(value) = cached(&self.read().views) {
            return value;
        }
        // Another reader may have computed it in between; compute() reuses it then
        compute(&mut self.write())
    }

    /// Distinct classpath roots of all scripts
    pub fn classpath_roots(&self) -> Arc<Vec<RootHandle>> {
        self.view(|v| v.classpath_roots.clone(), CacheState::classpath_roots)
    }

    pub fn classpath_scope(&self) -> Arc<SearchScope> {
        self.view(|v| v.classpath_scope.clone(), CacheState::classpath_scope)
    }

    /// Distinct source roots of all scripts
    pub fn source_roots(&self) -> Arc<Vec<RootHandle>> {
        self.view(|v| v.source_roots.clone(), CacheState::source_roots)
    }

    pub fn source_scope(&self) -> Arc<SearchScope> {
        self.view(|v| v.source_scope.clone(), CacheState::source_scope)
    }

    /// Read the request tracker under the shared lock
    pub fn with_requests<R>(&self, f: impl FnOnce(&RequestTracker) -> R) -> R {
        f(&self.read().requests)
    }

    /// Update the request tracker under the exclusive lock
    pub fn with_requests_mut<R>(&self, f: impl FnOnce(&mut RequestTracker) -> R) -> R {
        f(&mut self.write().requests)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            entries: state.entries.len(),
            tracked_requests: state.requests.len(),
            view_computations: state.view_computations,
            invalidations: state.invalidations,
        }
    }
}
