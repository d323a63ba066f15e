/// Script dependency resolution
///
/// Caches the classpath and sources each script depends on, refreshes them
/// through synchronous or asynchronous resolvers, and keeps aggregate root
/// views that are invalidated whenever any script's dependencies change.
pub mod annotations;
pub mod cache;
pub mod command;
pub mod dependencies;
pub mod files;
pub mod hint;
pub mod listener;
pub mod manager;
pub mod notifier;
pub mod resolver;
pub mod roots;
pub mod tracker;
pub mod worker;

pub use annotations::AnnotationResolver;
pub use command::CommandResolver;
pub use dependencies::DependencySet;
pub use files::{LocalFiles, MemoryFiles, ScriptFiles};
pub use hint::{DiskHint, FileHints, NoHints};
pub use listener::{ChangeEvent, ChangeListener, ChangeSource, FsChangeSource, WorkspaceFilter};
pub use manager::ScriptDependencyManager;
pub use notifier::{ChannelExecutor, HostExecutor, InlineExecutor, RootsNotifier};
pub use resolver::{
    AsyncResolver, Diagnostic, ResolutionError, ResolutionResult, ResolverKind, ScriptDefinition,
    SyncResolver,
};
pub use roots::{RootHandle, SearchScope};
