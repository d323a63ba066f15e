//! Change listener
//!
//! Turns batches of file-change events into a single refresh of the affected
//! scripts. Events are filtered to the workspace, metadata directories are
//! ignored, and outside test mode only files under a content root count.
//!
//! [`FsChangeSource`] feeds the listener from a `notify` watcher, grouping
//! events that arrive within a debounce window into one batch.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dependencies::normalize_path;
use super::manager::ScriptDependencyManager;

/// A file was created, modified or removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    /// `false` when the file is gone
    pub is_valid: bool,
}

impl ChangeEvent {
    pub fn changed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_valid: true,
        }
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_valid: false,
        }
    }
}

/// Decides which paths belong to the workspace
#[derive(Debug, Clone)]
pub struct WorkspaceFilter {
    root: PathBuf,
    content_roots: Vec<PathBuf>,
    metadata_dirs: Vec<String>,
    test_mode: bool,
}

impl WorkspaceFilter {
    /// Content roots are resolved against `root`
    pub fn new(
        root: impl AsRef<Path>,
        content_roots: &[PathBuf],
        metadata_dirs: &[String],
        test_mode: bool,
    ) -> Self {
        let root = normalize_path(root.as_ref());
        let content_roots = content_roots
            .iter()
            .map(|dir| normalize_path(&root.join(dir)))
            .collect();

        Self {
            root,
            content_roots,
            metadata_dirs: metadata_dirs.to_vec(),
            test_mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };

        if self.is_metadata(relative) {
            return false;
        }

        self.test_mode || self.content_roots.iter().any(|dir| path.starts_with(dir))
    }

    fn is_metadata(&self, relative: &Path) -> bool {
        if relative.file_name().and_then(|n| n.to_str()) == Some(crate::config::CONFIG_FILE_NAME) {
            return true;
        }
        relative.components().any(|component| match component {
            Component::Normal(name) => self
                .metadata_dirs
                .iter()
                .any(|dir| name.to_str() == Some(dir.as_str())),
            _ => false,
        })
    }
}

/// Callback receiving one batch of events
pub type BatchHandler = Arc<dyn Fn(Vec<ChangeEvent>) + Send + Sync>;

/// Producer of change-event batches
pub trait ChangeSource {
    fn subscribe(&mut self, handler: BatchHandler) -> Result<()>;
}

/// Refreshes the manager for every accepted batch
#[derive(Clone)]
pub struct ChangeListener {
    manager: ScriptDependencyManager,
    filter: WorkspaceFilter,
}

impl ChangeListener {
    pub fn new(manager: ScriptDependencyManager, filter: WorkspaceFilter) -> Self {
        Self { manager, filter }
    }

    /// Handle one batch; returns whether any cached value changed
    pub fn on_batch(&self, events: &[ChangeEvent]) -> bool {
        // One entry per path in order of first appearance; the last event decides validity
        let mut scripts: Vec<(PathBuf, bool)> = Vec::new();
        let mut positions: HashMap<&Path, usize> = HashMap::new();
        for event in events.iter().filter(|event| self.filter.accepts(&event.path)) {
            match positions.get(event.path.as_path()) {
                Some(&index) => scripts[index].1 = event.is_valid,
                None => {
                    positions.insert(event.path.as_path(), scripts.len());
                    scripts.push((event.path.clone(), event.is_valid));
                }
            }
        }

        if scripts.is_empty() {
            return false;
        }

        debug!(
            entry_count = scripts.len(),
            "Refreshing {} of {} changed file(s)",
            scripts.len(),
            events.len()
        );
        self.manager.refresh_known(scripts)
    }

    pub fn attach(&self, source: &mut dyn ChangeSource) -> Result<()> {
        let listener = self.clone();
        source.subscribe(Arc::new(move |events| {
            listener.on_batch(&events);
        }))
    }
}

const MAX_BATCH_AGE_FACTOR: u32 = 10;

/// File-system change source backed by `notify`
///
/// Must be subscribed from within a tokio runtime.
pub struct FsChangeSource {
    root: PathBuf,
    debounce: Duration,
    max_batch_age: Duration,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl FsChangeSource {
    /// Batches flush after `debounce` without events, or once the oldest event
    /// is ten debounce periods old under a steady stream
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            debounce,
            max_batch_age: debounce.saturating_mul(MAX_BATCH_AGE_FACTOR),
            watcher: None,
            task: None,
        }
    }

    /// Stop watching; batches already being handled still complete
    pub fn close(&mut self) {
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl ChangeSource for FsChangeSource {
    fn subscribe(&mut self, handler: BatchHandler) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("File watching requires a tokio runtime")?;

        let (tx, mut rx) = mpsc::unbounded_channel::<ChangeEvent>();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    for change in to_change_events(event) {
                        let _ = tx.send(change);
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        })
        .context("Failed to create file watcher")?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", self.root.display()))?;

        info!("Watching {} for script changes", self.root.display());

        let debounce = self.debounce;
        let max_batch_age = self.max_batch_age;
        let task = runtime.spawn(async move {
            while let Some(batch) = next_batch(&mut rx, debounce, max_batch_age).await {
                let handler = Arc::clone(&handler);
                if let Err(e) = tokio::task::spawn_blocking(move || handler(batch)).await {
                    error!("Change handler failed: {}", e);
                }
            }
        });

        self.watcher = Some(watcher);
        self.task = Some(task);
        Ok(())
    }
}

impl Drop for FsChangeSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Wait for an event, then group everything arriving within the debounce window
///
/// Returns `None` once the channel is closed and drained.
async fn next_batch(
    rx: &mut mpsc::UnboundedReceiver<ChangeEvent>,
    debounce: Duration,
    max_age: Duration,
) -> Option<Vec<ChangeEvent>> {
    let first = rx.recv().await?;
    let deadline = tokio::time::Instant::now() + max_age;
    let mut batch = vec![first];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            debug!(entry_count = batch.len(), "Flushing batch at maximum age");
            break;
        }
        match tokio::time::timeout(debounce.min(remaining), rx.recv()).await {
            Ok(Some(event)) => batch.push(event),
            Ok(None) | Err(_) => break,
        }
    }

    Some(batch)
}

fn to_change_events(event: Event) -> Vec<ChangeEvent> {
    let is_valid = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => true,
        EventKind::Remove(_) => false,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| {
            // Renames report both sides as modifications
            let is_valid = is_valid && path.exists();
            ChangeEvent { path, is_valid }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::dependencies::DependencySet;
    use crate::script::files::MemoryFiles;
    use crate::script::resolver::{
        Environment, ResolutionError, ResolverKind, ScriptContent, ScriptDefinition, SyncResolver,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn filter(test_mode: bool) -> WorkspaceFilter {
        WorkspaceFilter::new(
            "/ws",
            &[PathBuf::from("scripts")],
            &[".git".to_string(), ".scriptdeps".to_string()],
            test_mode,
        )
    }

    #[test]
    fn test_filter_requires_content_root_outside_test_mode() {
        let filter = filter(false);
        assert!(filter.accepts(Path::new("/ws/scripts/a.kts")));
        assert!(!filter.accepts(Path::new("/ws/other/a.kts")));
        assert!(!filter.accepts(Path::new("/elsewhere/a.kts")));
    }

    #[test]
    fn test_filter_test_mode_accepts_whole_workspace() {
        let filter = filter(true);
        assert!(filter.accepts(Path::new("/ws/other/a.kts")));
        assert!(!filter.accepts(Path::new("/elsewhere/a.kts")));
    }

    #[test]
    fn test_filter_rejects_metadata() {
        let filter = filter(true);
        assert!(!filter.accepts(Path::new("/ws/.git/HEAD")));
        assert!(!filter.accepts(Path::new("/ws/scripts/.scriptdeps/hints/x.json")));
        assert!(!filter.accepts(Path::new("/ws/scriptdeps.toml")));
    }

    /// Resolves every script to a jar named after its text; counts calls
    #[derive(Default)]
    struct TextResolver(AtomicUsize);

    impl SyncResolver for TextResolver {
        fn resolve(
            &self,
            script: &ScriptContent,
            _environment: &Environment,
        ) -> Result<DependencySet, ResolutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(DependencySet::new(
                [PathBuf::from(format!("/libs/{}.jar", script.text))],
                Vec::<PathBuf>::new(),
            ))
        }
    }

    fn listener() -> (Arc<MemoryFiles>, Arc<TextResolver>, ScriptDependencyManager, ChangeListener) {
        let files = Arc::new(MemoryFiles::new());
        let resolver = Arc::new(TextResolver::default());
        let manager = ScriptDependencyManager::builder(files.clone())
            .definitions(vec![ScriptDefinition::new(
                "kts",
                "*.kts",
                ResolverKind::Sync(resolver.clone()),
            )
            .unwrap()])
            .build()
            .unwrap();
        let listener = ChangeListener::new(manager.clone(), filter(false));
        (files, resolver, manager, listener)
    }

    #[test]
    fn test_batch_refreshes_once_per_script() {
        let (files, resolver, manager, listener) = listener();
        files.write("/ws/scripts/a.kts", "a");
        files.write("/ws/scripts/b.kts", "b");

        let events = vec![
            ChangeEvent::changed("/ws/scripts/a.kts"),
            ChangeEvent::changed("/ws/scripts/a.kts"),
            ChangeEvent::changed("/ws/scripts/b.kts"),
            ChangeEvent::changed("/ws/other/c.kts"),
            ChangeEvent::changed("/ws/.git/index"),
        ];

        assert!(listener.on_batch(&events));
        assert_eq!(resolver.0.load(Ordering::SeqCst), 2);
        assert_eq!(manager.modification_count(), 1);
        assert_eq!(manager.stats().entries, 2);
    }

    /// Records the order scripts are resolved in
    #[derive(Default)]
    struct OrderResolver(Mutex<Vec<PathBuf>>);

    impl SyncResolver for OrderResolver {
        fn resolve(
            &self,
            script: &ScriptContent,
            _environment: &Environment,
        ) -> Result<DependencySet, ResolutionError> {
            self.0.lock().unwrap().push(script.path.clone());
            Ok(DependencySet::EMPTY)
        }
    }

    #[test]
    fn test_batch_keeps_event_order() {
        let files = Arc::new(MemoryFiles::new());
        let resolver = Arc::new(OrderResolver::default());
        let manager = ScriptDependencyManager::builder(files.clone())
            .definitions(vec![ScriptDefinition::new(
                "kts",
                "*.kts",
                ResolverKind::Sync(resolver.clone()),
            )
            .unwrap()])
            .build()
            .unwrap();
        let listener = ChangeListener::new(manager, filter(false));
        for name in ["z", "a", "m", "b"] {
            files.write(format!("/ws/scripts/{}.kts", name), name);
        }

        listener.on_batch(&[
            ChangeEvent::changed("/ws/scripts/z.kts"),
            ChangeEvent::changed("/ws/scripts/a.kts"),
            ChangeEvent::changed("/ws/scripts/b.kts"),
            ChangeEvent::changed("/ws/scripts/m.kts"),
            ChangeEvent::changed("/ws/scripts/a.kts"),
            ChangeEvent::removed("/ws/scripts/b.kts"),
        ]);

        // b's last event is a removal, so it is not resolved
        assert_eq!(
            *resolver.0.lock().unwrap(),
            vec![
                PathBuf::from("/ws/scripts/z.kts"),
                PathBuf::from("/ws/scripts/a.kts"),
                PathBuf::from("/ws/scripts/m.kts"),
            ]
        );
    }

    #[test]
    fn test_removal_event_drops_entry() {
        let (files, _resolver, manager, listener) = listener();
        files.write("/ws/scripts/a.kts", "a");
        listener.on_batch(&[ChangeEvent::changed("/ws/scripts/a.kts")]);

        files.remove(Path::new("/ws/scripts/a.kts"));
        assert!(listener.on_batch(&[ChangeEvent::removed("/ws/scripts/a.kts")]));
        assert!(manager.cached(Path::new("/ws/scripts/a.kts")).is_none());
    }

    #[test]
    fn test_irrelevant_batch_does_nothing() {
        let (_files, resolver, manager, listener) = listener();

        assert!(!listener.on_batch(&[ChangeEvent::changed("/ws/.git/HEAD")]));
        assert_eq!(resolver.0.load(Ordering::SeqCst), 0);
        assert_eq!(manager.modification_count(), 0);
    }

    /// Source that hands the handler back to the test
    #[derive(Default)]
    struct ManualSource(Option<BatchHandler>);

    impl ChangeSource for ManualSource {
        fn subscribe(&mut self, handler: BatchHandler) -> Result<()> {
            self.0 = Some(handler);
            Ok(())
        }
    }

    #[test]
    fn test_attach_routes_batches_to_listener() {
        let (files, _resolver, manager, listener) = listener();
        let mut source = ManualSource::default();
        listener.attach(&mut source).unwrap();

        files.write("/ws/scripts/a.kts", "a");
        (source.0.unwrap())(vec![ChangeEvent::changed("/ws/scripts/a.kts")]);

        assert_eq!(
            manager.cached(Path::new("/ws/scripts/a.kts")),
            Some(DependencySet::new(
                [PathBuf::from("/libs/a.jar")],
                Vec::<PathBuf>::new()
            ))
        );
    }

    #[test]
    fn test_subscribe_outside_runtime_fails() {
        let temp = TempDir::new().unwrap();
        let mut source = FsChangeSource::new(temp.path(), Duration::from_millis(50));
        assert!(source.subscribe(Arc::new(|_| {})).is_err());
    }

    #[tokio::test]
    async fn test_quiet_period_closes_batch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ChangeEvent::changed("/ws/a.kts")).unwrap();
        tx.send(ChangeEvent::changed("/ws/b.kts")).unwrap();

        let batch = next_batch(&mut rx, Duration::from_millis(20), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);

        drop(tx);
        assert!(next_batch(&mut rx, Duration::from_millis(20), Duration::from_secs(5))
            .await
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_steady_stream_flushes_at_max_age() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let producer = tokio::spawn(async move {
            // Never quiet for a whole debounce period
            for i in 0..500 {
                if tx.send(ChangeEvent::changed(format!("/ws/{}.kts", i))).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let start = std::time::Instant::now();
        let batch = next_batch(&mut rx, Duration::from_millis(100), Duration::from_millis(300))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!batch.is_empty());
        assert!(batch.len() < 500);
        producer.abort();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fs_source_delivers_batches() {
        let temp = TempDir::new().unwrap();
        let root = normalize_path(temp.path());
        let received = Arc::new(Mutex::new(Vec::<ChangeEvent>::new()));

        let mut source = FsChangeSource::new(&root, Duration::from_millis(100));
        let sink = Arc::clone(&received);
        source
            .subscribe(Arc::new(move |batch| {
                sink.lock().unwrap().extend(batch);
            }))
            .unwrap();

        let script = root.join("build.kts");
        std::fs::write(&script, "x").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let seen = received
                .lock()
                .unwrap()
                .iter()
                .any(|event| normalize_path(&event.path) == script);
            if seen || std::time::Instant::now() > deadline {
                assert!(seen, "no change event for {}", script.display());
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        source.close();
    }
}
