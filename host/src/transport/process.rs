use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// An OS process backing a loaded plugin.
#[async_trait]
pub trait PluginProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Terminate the process and reap it. Must succeed if it already exited.
    async fn kill(&mut self) -> Result<()>;

    fn has_exited(&mut self) -> bool;
}

/// A spawned plugin child. Lives in its own process group so anything it
/// forks dies with it.
pub struct ChildProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    /// Process group id, cleared once the group has been signalled.
    group: Option<u32>,
}

impl ChildProcess {
    pub fn new(name: impl Into<String>, child: Child) -> Self {
        let pid = child.id();
        Self {
            name: name.into(),
            child,
            pid,
            group: pid,
        }
    }

    /// SIGKILLs the whole process group, once.
    #[cfg(unix)]
    fn kill_group(&mut self) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.group.take() {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!("Failed to signal process group of plugin {}: {}", self.name, e),
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&mut self) {}
}

#[async_trait]
impl PluginProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn kill(&mut self) -> Result<()> {
        // The leader may be gone while its forks are still running.
        self.kill_group();
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Plugin {} already exited with {}", self.name, status);
            return Ok(());
        }

        match self.child.kill().await {
            Ok(()) => {}
            // Reaped between try_wait and kill
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e.into()),
        }
        info!("Plugin {} process {:?} terminated", self.name, self.pid);
        Ok(())
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }
}

/// Shared, idempotently killable reference to a plugin process.
///
/// The manager's handle and the plugin's lifecycle hold clones of the same
/// `ProcessHandle`; whichever kills first wins and later kills are no-ops.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    inner: Arc<Mutex<Box<dyn PluginProcess>>>,
    killed: Arc<AtomicBool>,
}

impl ProcessHandle {
    pub fn new(process: Box<dyn PluginProcess>) -> Self {
        Self {
            pid: process.pid(),
            inner: Arc::new(Mutex::new(process)),
            killed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn kill(&self) -> Result<()> {
        let mut process = self.inner.lock().await;
        if self.killed.load(Ordering::SeqCst) {
            return Ok(());
        }
        process.kill().await?;
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub async fn is_alive(&self) -> bool {
        if self.is_killed() {
            return false;
        }
        !self.inner.lock().await.has_exited()
    }

    pub fn same_process(&self, other: &ProcessHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("killed", &self.is_killed())
            .finish()
    }
}
