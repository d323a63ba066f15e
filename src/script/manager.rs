//! Script dependency manager
//!
//! Coordinates resolution for every script of a workspace:
//!
//! - queries answer from the cache and only resolve on a cold start
//! - refreshes dispatch to the script definition's resolver, inline for
//!   synchronous resolvers and on the background queue for asynchronous ones
//! - changes are committed to the cache, written to the disk hint, and
//!   signalled once per batch (derived-view invalidation + roots changed)
//!
//! # Asynchronous requests
//!
//! A new request is only issued when the script's modification stamp differs
//! from the one the last request was issued for, or when that request has
//! already finished (a failed resolution is retried). Issuing a request cancels
//! the previous one and makes it stale: its result is discarded on completion
//! even if the resolver ignored the cancellation. The last issued request
//! wins regardless of completion order.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::cache::{CacheStats, Commit, DependenciesCache, InvalidationListener};
use super::dependencies::{artifact_key, DependencySet};
use super::files::ScriptFiles;
use super::hint::{DiskHint, NoHints};
use super::notifier::{
    HostExecutor, InlineExecutor, NoopNotifier, NotificationDispatcher, RootsNotifier,
};
use super::resolver::{
    AsyncResolver, DefinitionProvider, LoggingReportSink, ReportSink, ResolutionResult,
    ResolverKind, ScriptDefinition, SyncResolver,
};
use super::roots::{to_roots, RootHandle, SearchScope};
use super::tracker::{next_sequence, CancellationToken, Sequence, TrackedRequest};
use super::worker::{ResolutionQueue, ResolutionTask};
use crate::logging::{operations, status};

/// Builder for [`ScriptDependencyManager`]
pub struct ManagerBuilder {
    files: Arc<dyn ScriptFiles>,
    definitions: Vec<ScriptDefinition>,
    hint: Arc<dyn DiskHint>,
    reports: Arc<dyn ReportSink>,
    notifier: Arc<dyn RootsNotifier>,
    executor: Arc<dyn HostExecutor>,
    workers: usize,
}

impl ManagerBuilder {
    pub fn definitions(mut self, definitions: Vec<ScriptDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    pub fn hint(mut self, hint: Arc<dyn DiskHint>) -> Self {
        self.hint = hint;
        self
    }

    pub fn report_sink(mut self, reports: Arc<dyn ReportSink>) -> Self {
        self.reports = reports;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn RootsNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn HostExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Number of background resolution workers (default 1)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build(self) -> Result<ScriptDependencyManager> {
        let queue = ResolutionQueue::new(self.workers)
            .context("Failed to start resolution queue")?;

        Ok(ScriptDependencyManager {
            inner: Arc::new(Inner {
                cache: DependenciesCache::new(),
                definitions: DefinitionProvider::new(self.definitions),
                files: self.files,
                hint: self.hint,
                reports: self.reports,
                dispatcher: NotificationDispatcher::new(self.notifier, self.executor),
                queue,
            }),
        })
    }
}

/// Dependency cache and resolution orchestrator for one workspace
///
/// Cheap to clone; clones share the same workspace state. The state lives
/// until [`dispose`](Self::dispose) is called or the last clone is dropped.
#[derive(Clone)]
pub struct ScriptDependencyManager {
    inner: Arc<Inner>,
}

struct Inner {
    cache: DependenciesCache,
    definitions: DefinitionProvider,
    files: Arc<dyn ScriptFiles>,
    hint: Arc<dyn DiskHint>,
    reports: Arc<dyn ReportSink>,
    dispatcher: NotificationDispatcher,
    queue: ResolutionQueue,
}

impl ScriptDependencyManager {
    pub fn builder(files: Arc<dyn ScriptFiles>) -> ManagerBuilder {
        ManagerBuilder {
            files,
            definitions: Vec::new(),
            hint: Arc::new(NoHints),
            reports: Arc::new(LoggingReportSink),
            notifier: Arc::new(NoopNotifier),
            executor: Arc::new(InlineExecutor),
            workers: 1,
        }
    }

    /// Dependencies of `script`
    ///
    /// Answers from the cache when possible. On a cold start the disk hint is
    /// loaded (if any) and the script is refreshed inline; synchronous
    /// resolvers are therefore reflected in the answer, asynchronous ones
    /// are only queued.
    pub fn get_dependencies(&self, script: &Path) -> DependencySet {
        let key = artifact_key(script);
        if let Some(cached) = self.inner.cache.get(&key) {
            return cached;
        }

        if let Some(hinted) = self.inner.hint.read(script) {
            debug!(
                operation = operations::LOAD_HINT,
                script = %key,
                "Loaded dependencies from disk hint"
            );
            if self.inner.cache.upsert(&key, hinted) {
                self.inner.on_change();
            }
        }

        self.refresh([script]);

        self.inner.cache.get(&key).unwrap_or_default()
    }

    /// Cached dependencies of `script`, without resolving
    pub fn cached(&self, script: &Path) -> Option<DependencySet> {
        self.inner.cache.get(&artifact_key(script))
    }

    /// Lookup-ready classpath roots of a single script
    pub fn script_classpath(&self, script: &Path) -> Vec<RootHandle> {
        to_roots(self.get_dependencies(script).classpath())
    }

    /// Refresh a batch of scripts; returns whether any cached value changed
    ///
    /// Scripts that no longer exist are dropped from the cache. A change
    /// anywhere in the batch is signalled once for the whole batch.
    pub fn refresh<I, P>(&self, scripts: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let batch = scripts.into_iter().map(|script| {
            let script = script.as_ref().to_path_buf();
            let valid = self.inner.files.is_valid(&script);
            (script, valid)
        });
        self.inner.refresh_batch(batch)
    }

    /// Refresh a batch whose validity is already known (e.g. from change events)
    pub fn refresh_known<I>(&self, scripts: I) -> bool
    where
        I: IntoIterator<Item = (PathBuf, bool)>,
    {
        let files = &self.inner.files;
        let batch = scripts
            .into_iter()
            .map(|(script, valid)| {
                let valid = valid && files.is_valid(&script);
                (script, valid)
            });
        self.inner.refresh_batch(batch)
    }

    /// Refresh one valid script without signalling; returns whether the cache changed now
    ///
    /// Asynchronous resolutions always return `false`: their change, if any,
    /// is applied and signalled when the request completes.
    pub fn refresh_one(&self, script: &Path) -> bool {
        self.inner.refresh_one(script)
    }

    /// Resolve `script` inline regardless of resolver kind and signal the change
    pub fn update_synchronously(&self, script: &Path) -> Result<bool> {
        let definition = self
            .inner
            .definitions
            .find(script)
            .with_context(|| format!("No script definition matches {}", script.display()))?;
        let content = self.inner.files.read(script)?;
        let key = artifact_key(script);

        let dependencies = match definition.resolver() {
            ResolverKind::Sync(resolver) => resolver
                .resolve(&content, definition.environment())
                .with_context(|| format!("Failed to resolve {}", script.display()))?,
            ResolverKind::Async(resolver) => {
                let result =
                    resolver.resolve(&content, definition.environment(), &CancellationToken::new());
                self.inner.reports.attach_reports(script, &result.reports);
                result
                    .dependencies
                    .with_context(|| format!("Failed to resolve {}", script.display()))?
            }
        };

        let changed = self.inner.save(script, &key, dependencies);
        if changed {
            self.inner.on_change();
        }
        Ok(changed)
    }

    /// Replace the script definitions and start over with an empty cache
    pub fn reload_definitions(&self, definitions: Vec<ScriptDefinition>) {
        info!("Reloading {} script definition(s)", definitions.len());
        self.inner.definitions.replace(definitions);
        self.inner.cancel_all();
        self.inner.cache.clear();
        self.inner.on_change();
    }

    pub fn classpath_roots(&self) -> Arc<Vec<RootHandle>> {
        self.inner.cache.classpath_roots()
    }

    pub fn classpath_scope(&self) -> Arc<SearchScope> {
        self.inner.cache.classpath_scope()
    }

    pub fn source_roots(&self) -> Arc<Vec<RootHandle>> {
        self.inner.cache.source_roots()
    }

    pub fn source_scope(&self) -> Arc<SearchScope> {
        self.inner.cache.source_scope()
    }

    /// Run `listener` every time the derived views are invalidated
    pub fn add_invalidation_listener(&self, listener: InvalidationListener) {
        self.inner.cache.add_invalidation_listener(listener);
    }

    /// Number of roots-changed signals delivered to the host
    pub fn modification_count(&self) -> u64 {
        self.inner.dispatcher.modification_count()
    }

    /// Number of asynchronous requests still queued or running
    pub fn pending_requests(&self) -> usize {
        self.inner.cache.with_requests(|requests| requests.pending().len())
    }

    /// Wait until no asynchronous request is pending, up to `timeout`
    pub fn await_pending(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let pending = self.inner.cache.with_requests(|requests| requests.pending());
            if pending.is_empty() {
                return true;
            }
            for handle in pending {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if !handle.wait(remaining) {
                    return false;
                }
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.dispatcher.is_disposed()
    }

    /// Tear the workspace down: cancel requests, clear the cache, stop workers
    ///
    /// Notifications still queued on the host are dropped when they run.
    pub fn dispose(&self) {
        if self.inner.dispatcher.is_disposed() {
            return;
        }
        info!("Disposing script dependency manager");
        self.inner.dispatcher.dispose();
        self.inner.cancel_all();
        self.inner.cache.clear();
        self.inner.queue.shutdown();
    }
}

impl Inner {
    fn on_change(&self) {
        self.cache.invalidate();
        self.dispatcher.roots_changed();
    }

    /// Upsert and write the disk hint on change
    fn save(&self, script: &Path, key: &str, dependencies: DependencySet) -> bool {
        self.cache
            .upsert_with(key, dependencies, |deps| self.hint.write(script, deps))
    }

    fn refresh_batch(self: &Arc<Self>, batch: impl Iterator<Item = (PathBuf, bool)>) -> bool {
        let mut changed = false;
        let mut count = 0usize;

        for (script, valid) in batch {
            count += 1;
            if valid {
                changed |= self.refresh_one(&script);
            } else {
                changed |= self.forget(&script);
            }
        }

        if changed {
            self.on_change();
        }

        debug!(
            operation = operations::REFRESH,
            entry_count = count,
            changed,
            "Refreshed batch"
        );
        changed
    }

    /// Drop a script that no longer exists
    fn forget(&self, script: &Path) -> bool {
        let key = artifact_key(script);
        if let Some(request) = self.cache.with_requests_mut(|requests| requests.remove(&key)) {
            request.handle.cancel();
        }
        self.cache.delete(&key)
    }

    fn refresh_one(self: &Arc<Self>, script: &Path) -> bool {
        let Some(definition) = self.definitions.find(script) else {
            debug!("No script definition for {}", script.display());
            return false;
        };

        match definition.resolver() {
            ResolverKind::Sync(resolver) => self.update_sync(script, &definition, resolver.as_ref()),
            ResolverKind::Async(resolver) => {
                self.update_async(script, &definition, Arc::clone(resolver))
            }
        }
    }

    fn update_sync(
        &self,
        script: &Path,
        definition: &ScriptDefinition,
        resolver: &dyn SyncResolver,
    ) -> bool {
        let content = match self.files.read(script) {
            Ok(content) => content,
            Err(e) => {
                warn!("{:#}", e);
                return false;
            }
        };

        match resolver.resolve(&content, definition.environment()) {
            Ok(dependencies) => self.save(script, &artifact_key(script), dependencies),
            Err(e) => {
                // Keep whatever was cached before
                warn!(
                    operation = operations::RESOLVE,
                    status = status::FAILED,
                    "Failed to resolve {}: {}",
                    script.display(),
                    e
                );
                false
            }
        }
    }

    fn update_async(
        self: &Arc<Self>,
        script: &Path,
        definition: &ScriptDefinition,
        resolver: Arc<dyn AsyncResolver>,
    ) -> bool {
        let key = artifact_key(script);
        let stamp = self.files.modification_stamp(script);

        // Check and issue under one lock so concurrent refreshes cannot both send
        self.cache.with_requests_mut(|requests| {
            if !requests.should_send(&key, stamp) {
                debug!(script = %key, "Request already issued for current stamp");
                return;
            }

            let sequence = next_sequence();
            let task = self.resolution_task(script, &key, sequence, definition, resolver);

            match self.queue.submit(sequence, &key, task) {
                Ok(handle) => {
                    debug!(
                        operation = operations::REQUEST,
                        script = %key,
                        sequence = %sequence,
                        "Queued asynchronous resolution"
                    );
                    if let Some(previous) =
                        requests.track(&key, stamp, TrackedRequest { sequence, handle })
                    {
                        previous.handle.cancel();
                        debug!(
                            script = %key,
                            sequence = %previous.handle.sequence(),
                            "Cancelled superseded request"
                        );
                    }
                }
                Err(e) => warn!("Failed to queue resolution for {}: {:#}", key, e),
            }
        });

        false
    }

    fn resolution_task(
        self: &Arc<Self>,
        script: &Path,
        key: &str,
        sequence: Sequence,
        definition: &ScriptDefinition,
        resolver: Arc<dyn AsyncResolver>,
    ) -> ResolutionTask {
        let inner: Weak<Inner> = Arc::downgrade(self);
        let script = script.to_path_buf();
        let key = key.to_string();
        let environment = definition.environment().clone();

        Box::new(move |cancel: &CancellationToken| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.dispatcher.is_disposed() {
                return;
            }

            let content = match inner.files.read(&script) {
                Ok(content) => content,
                Err(e) => {
                    debug!("Script vanished before resolution: {:#}", e);
                    return;
                }
            };

            let result = resolver.resolve(&content, &environment, cancel);
            inner.complete(&script, &key, sequence, result);
        })
    }

    fn complete(&self, script: &Path, key: &str, sequence: Sequence, result: ResolutionResult) {
        let ResolutionResult {
            dependencies,
            reports,
        } = result;

        let Some(dependencies) = dependencies else {
            if self.cache.with_requests(|requests| requests.is_current(key, sequence)) {
                self.reports.attach_reports(script, &reports);
                warn!(
                    operation = operations::RESOLVE,
                    status = status::FAILED,
                    script = %key,
                    sequence = %sequence,
                    "Asynchronous resolution failed"
                );
            }
            return;
        };

        let committed = self.cache.commit_if_current(key, sequence, dependencies, |deps| {
            self.hint.write(script, deps)
        });
        match committed {
            Commit::Superseded => {
                debug!(
                    status = status::SUPERSEDED,
                    script = %key,
                    sequence = %sequence,
                    "Discarding superseded resolution"
                );
            }
            Commit::Applied(changed) => {
                self.reports.attach_reports(script, &reports);
                if changed {
                    self.on_change();
                }
            }
        }
    }

    fn cancel_all(&self) {
        let requests = self.cache.with_requests_mut(|requests| requests.drain());
        for request in requests {
            request.handle.cancel();
        }
    }
}
