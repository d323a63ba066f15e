pub mod config;
pub mod hints;
pub mod resolve;
pub mod roots;
pub mod watch;
mod workspace;

pub use workspace::Workspace;
