/// `scriptdeps watch` command implementation
///
/// Resolves every script under the watched directory, then keeps the cache
/// current from file-system events until interrupted.
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::Workspace;
use crate::cli::{CommonConfigArgs, WatchArgs};
use crate::cli_utils::scriptdeps_prefix;
use crate::script::dependencies::normalize_path;
use crate::script::{
    ChangeListener, ChannelExecutor, FsChangeSource, HostExecutor, InlineExecutor, RootsNotifier,
    ScriptDependencyManager,
};

/// Logs every roots change delivered on the host loop
#[derive(Default)]
struct LoggingNotifier {
    changes: AtomicU64,
}

impl RootsNotifier for LoggingNotifier {
    fn roots_changed(&self) {
        let n = self.changes.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{} Script roots changed (#{})", scriptdeps_prefix(), n);
    }
}

pub async fn run(common: &CommonConfigArgs, args: &WatchArgs) -> Result<()> {
    let workspace = Workspace::load(common)?;
    let dir = normalize_path(args.dir.as_deref().unwrap_or(&workspace.root));
    let debounce = workspace.config.watch_debounce()?;

    let notifier = Arc::new(LoggingNotifier::default());
    let mut host_queue = None;
    let executor: Arc<dyn HostExecutor> = if workspace.config.workspace.test_mode {
        Arc::new(InlineExecutor)
    } else {
        let (executor, queue) = ChannelExecutor::new();
        host_queue = Some(queue);
        Arc::new(executor)
    };

    let manager = workspace.manager_with(notifier.clone(), executor)?;
    let host = host_queue.map(|queue| tokio::spawn(queue.run()));

    let scripts = workspace.collect_scripts(std::slice::from_ref(&dir))?;
    info!(
        "{} Resolving {} script(s) under {}",
        scriptdeps_prefix(),
        scripts.len(),
        dir.display()
    );
    let initial = manager.clone();
    tokio::task::spawn_blocking(move || initial.refresh(scripts))
        .await
        .context("Initial refresh failed")?;

    let listener = ChangeListener::new(manager.clone(), workspace.filter());
    let mut source = FsChangeSource::new(&dir, debounce);
    listener.attach(&mut source)?;

    info!("{} Watching for changes (Ctrl-C to stop)", scriptdeps_prefix());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("{} Stopping", scriptdeps_prefix());
    source.close();
    drop(listener);
    shutdown(manager).await?;

    // Notifications still queued are dropped by the disposed manager anyway
    if let Some(host) = host {
        host.abort();
    }

    let stats = notifier.changes.load(Ordering::SeqCst);
    info!("{} {} roots change(s) delivered", scriptdeps_prefix(), stats);
    Ok(())
}

async fn shutdown(manager: ScriptDependencyManager) -> Result<()> {
    // Joining resolution workers blocks
    tokio::task::spawn_blocking(move || {
        manager.dispose();
        drop(manager);
    })
    .await
    .context("Shutdown failed")
}
