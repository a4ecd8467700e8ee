pub mod handshake;
pub mod launcher;
pub mod process;

pub use handshake::{HandshakeLine, NetworkAddress, Protocol};
pub use launcher::ProcessLauncher;
pub use process::{ChildProcess, PluginProcess, ProcessHandle};

use crate::error::Result;
use crate::plugin::ConfigPlugin;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// A spawned plugin that has passed the handshake and has a connected client.
///
/// Nothing has been called on `client` yet; API version verification is the
/// caller's job.
pub struct LaunchedPlugin {
    pub process: ProcessHandle,
    pub client: Arc<dyn ConfigPlugin>,
}

/// Turns a plugin binary into a running, connected plugin.
///
/// Implementations must not leave a process running when they return an error.
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    async fn launch(&self, name: &str, binary: &Path) -> Result<LaunchedPlugin>;
}
