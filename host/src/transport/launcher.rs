use crate::config::HandshakeConfig;
use crate::error::{PluginError, Result};
use crate::rpc::GrpcConfigPlugin;
use crate::transport::handshake::{child_env, HandshakeLine, NetworkAddress};
use crate::transport::process::{ChildProcess, ProcessHandle};
use crate::transport::{LaunchedPlugin, PluginLauncher};
use crate::util::Backoff;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tokio::time::{timeout_at, Instant};
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

const CONNECT_BASE_DELAY: Duration = Duration::from_millis(50);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(1);

/// Enough connect attempts for the backoff delays to span `startup_timeout`;
/// the deadline still cuts it short.
fn connect_backoff(startup_timeout: Duration, deadline: Instant) -> Backoff {
    let mut backoff = Backoff::new(1, CONNECT_BASE_DELAY, CONNECT_MAX_DELAY);
    let mut covered = Duration::ZERO;
    while covered < startup_timeout {
        covered += backoff.delay_for(backoff.attempts - 1);
        backoff.attempts += 1;
    }
    backoff.until(deadline)
}

/// Launches plugin binaries as child processes and connects to them over gRPC.
pub struct ProcessLauncher {
    handshake: HandshakeConfig,
    startup_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(handshake: HandshakeConfig, startup_timeout: Duration) -> Self {
        Self {
            handshake,
            startup_timeout,
        }
    }

    fn command(&self, binary: &Path) -> Command {
        let mut cmd = Command::new(binary);
        let _ = cmd
            .envs(child_env(&self.handshake))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        let _ = cmd.process_group(0);
        cmd
    }

    async fn read_handshake(
        &self,
        name: &str,
        lines: &mut Lines<BufReader<ChildStdout>>,
        deadline: Instant,
    ) -> Result<HandshakeLine> {
        let line = match timeout_at(deadline, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(handshake_error(name, "plugin exited before completing the handshake"))
            }
            Ok(Err(e)) => {
                return Err(handshake_error(
                    name,
                    format!("failed to read handshake: {}", e),
                ))
            }
            Err(_) => {
                return Err(handshake_error(
                    name,
                    format!("no handshake within {:?}", self.startup_timeout),
                ))
            }
        };

        debug!("Plugin {} handshake: {}", name, line.trim());
        let handshake = HandshakeLine::parse(&line).map_err(|reason| handshake_error(name, reason))?;
        handshake
            .verify(&self.handshake)
            .map_err(|reason| handshake_error(name, reason))?;
        Ok(handshake)
    }

    async fn connect(
        &self,
        name: &str,
        address: &NetworkAddress,
        deadline: Instant,
    ) -> Result<Channel> {
        let backoff = connect_backoff(self.startup_timeout, deadline);
        let what = format!("connect to plugin {}", name);

        let connecting =
            backoff.retry(&what, || connect_once(address.clone(), self.startup_timeout));

        match timeout_at(deadline, connecting).await {
            Ok(result) => result.map_err(|source| PluginError::Transport {
                name: name.to_string(),
                source,
            }),
            Err(_) => Err(handshake_error(
                name,
                format!("could not connect to {} within {:?}", address, self.startup_timeout),
            )),
        }
    }

    async fn start(
        &self,
        name: &str,
        process: &ProcessHandle,
        stdout: ChildStdout,
    ) -> Result<Arc<GrpcConfigPlugin>> {
        let deadline = Instant::now() + self.startup_timeout;
        let mut lines = BufReader::new(stdout).lines();

        let handshake = self.read_handshake(name, &mut lines, deadline).await?;
        forward_lines(name.to_string(), "stdout", lines);

        let channel = self.connect(name, &handshake.address, deadline).await?;
        info!(
            "Connected to plugin {} (pid {:?}) at {}",
            name,
            process.pid(),
            handshake.address
        );
        Ok(Arc::new(GrpcConfigPlugin::new(name, channel)))
    }
}

#[async_trait]
impl PluginLauncher for ProcessLauncher {
    async fn launch(&self, name: &str, binary: &Path) -> Result<LaunchedPlugin> {
        info!("Starting plugin {} from {}", name, binary.display());
        let mut child = self.command(binary).spawn().map_err(|e| {
            handshake_error(name, format!("failed to spawn {}: {}", binary.display(), e))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = ProcessHandle::new(Box::new(ChildProcess::new(name, child)));

        if let Some(stderr) = stderr {
            forward_lines(name.to_string(), "stderr", BufReader::new(stderr).lines());
        }

        let started = match stdout {
            Some(stdout) => self.start(name, &process, stdout).await,
            None => Err(handshake_error(name, "plugin stdout was not captured")),
        };

        match started {
            Ok(client) => Ok(LaunchedPlugin { process, client }),
            Err(e) => {
                warn!("Plugin {} failed to start: {}", name, e);
                if let Err(kill_err) = process.kill().await {
                    warn!("Failed to kill plugin {} after failed start: {}", name, kill_err);
                }
                Err(e)
            }
        }
    }
}

async fn connect_once(
    address: NetworkAddress,
    connect_timeout: Duration,
) -> std::result::Result<Channel, tonic::transport::Error> {
    match address {
        NetworkAddress::Tcp(addr) => {
            Endpoint::from_shared(format!("http://{}", addr))?
                .connect_timeout(connect_timeout)
                .connect()
                .await
        }
        NetworkAddress::Unix(path) => connect_unix(path, connect_timeout).await,
    }
}

#[cfg(unix)]
async fn connect_unix(
    path: PathBuf,
    connect_timeout: Duration,
) -> std::result::Result<Channel, tonic::transport::Error> {
    use tokio::net::UnixStream;
    use tonic::transport::Uri;

    // The URI is ignored; every connection goes to the socket.
    Endpoint::from_static("http://[::]:50051")
        .connect_timeout(connect_timeout)
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            UnixStream::connect(path.clone())
        }))
        .await
}

#[cfg(not(unix))]
async fn connect_unix(
    path: PathBuf,
    connect_timeout: Duration,
) -> std::result::Result<Channel, tonic::transport::Error> {
    // No unix sockets here; the bogus URI makes the connect fail as a transport error.
    Endpoint::from_shared(format!("http://{}", path.display()))?
        .connect_timeout(connect_timeout)
        .connect()
        .await
}

/// Copies a plugin's output stream into the host log until it closes.
fn forward_lines<R>(name: String, stream: &'static str, mut lines: Lines<BufReader<R>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(plugin = %name, stream, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(plugin = %name, stream, "stopped reading: {}", e);
                    break;
                }
            }
        }
    });
}

fn handshake_error(name: &str, reason: impl Into<String>) -> PluginError {
    PluginError::Handshake {
        name: name.to_string(),
        reason: reason.into(),
    }
}
