//! Server process supervisor - spawning, handshaking with and killing the worker

use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use attendance_common::{Error, Result, ServerConfig, SupervisorCommand, WorkerEvent};

use crate::channel::{capture_channel, CaptureReceiver, CaptureSink};

/// Name of the binary the supervisor spawns
pub const WORKER_BINARY: &str = "attendance-mock-backend";

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lifecycle of a [`MockServer`]. There is no way back from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Created => write!(f, "created"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Handle to a running worker process
struct Worker {
    child: Child,
    /// Owns the worker's stdin; the worker exits once this task ends.
    reader: JoinHandle<()>,
    log_forwarder: JoinHandle<()>,
}

/// Mock backend owned by one test scenario.
///
/// ```no_run
/// # async fn scenario() -> attendance_mock_backend::Result<()> {
/// use attendance_mock_backend::{MockServer, ServerConfig};
///
/// let mut server = MockServer::new(ServerConfig::default().with_port(0));
/// server.start().await?;
/// // ... drive the browser against server.base_url() ...
/// let submitted = server.poll_no_wait()?;
/// server.stop().await?;
/// # let _ = submitted;
/// # Ok(())
/// # }
/// ```
pub struct MockServer {
    config: ServerConfig,
    startup_timeout: Duration,
    worker_binary: Option<PathBuf>,
    state: ServerState,
    port: Option<u16>,
    worker: Option<Worker>,
    sink: Option<CaptureSink>,
    captures: CaptureReceiver,
}

impl MockServer {
    pub fn new(config: ServerConfig) -> Self {
        let (sink, captures) = capture_channel();
        Self {
            config,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            worker_binary: None,
            state: ServerState::Created,
            port: None,
            worker: None,
            sink: Some(sink),
            captures,
        }
    }

    /// How long `start` waits for the worker to report its bind outcome
    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    /// Explicit path to the worker executable
    pub fn with_worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(path.into());
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Port actually bound; differs from the configured one when that was 0
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn base_url(&self) -> Option<String> {
        self.port
            .map(|port| format!("http://{}:{}", self.config.host, port))
    }

    /// Spawn the worker and wait until it has bound its port.
    ///
    /// A failed start leaves the server `Stopped`; create a new instance to retry.
    pub async fn start(&mut self) -> Result<u16> {
        self.expect_state(ServerState::Created, "start")?;
        self.state = ServerState::Stopped;

        let binary = self.resolve_worker_binary()?;
        info!(
            binary = %binary.display(),
            address = %self.config.bind_address(),
            force_action = %self.config.force_action,
            "spawning mock backend worker"
        );

        let mut child = Command::new(&binary)
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::WorkerSpawn {
                path: binary.clone(),
                source,
            })?;

        let mut stdin = take_pipe(child.stdin.take(), "stdin")?;
        let stdout = take_pipe(child.stdout.take(), "stdout")?;
        let stderr = take_pipe(child.stderr.take(), "stderr")?;

        let log_forwarder = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "attendance_mock_backend::worker", "{}", line);
            }
        });

        let mut config_line = serde_json::to_string(&self.config)?;
        config_line.push('\n');
        stdin.write_all(config_line.as_bytes()).await?;
        stdin.flush().await?;

        let mut events = BufReader::new(stdout).lines();
        let port = match self.await_bind_outcome(&mut events).await {
            Ok(port) => port,
            Err(e) => {
                let _ = child.kill().await;
                log_forwarder.abort();
                return Err(e);
            }
        };

        let sink = self
            .sink
            .take()
            .ok_or_else(|| Error::Protocol("capture sink already handed out".to_string()))?;
        let reader = tokio::spawn(forward_captures(events, stdin, sink));

        self.worker = Some(Worker {
            child,
            reader,
            log_forwarder,
        });
        self.port = Some(port);
        self.state = ServerState::Running;

        info!(port, "mock backend ready");
        Ok(port)
    }

    async fn await_bind_outcome(&self, events: &mut Lines<BufReader<ChildStdout>>) -> Result<u16> {
        let line = match timeout(self.startup_timeout, events.next_line()).await {
            Err(_) => return Err(Error::StartupTimeout(self.startup_timeout)),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(None)) => return Err(Error::WorkerExited),
            Ok(Ok(Some(line))) => line,
        };

        match WorkerEvent::decode(&line)? {
            WorkerEvent::Ready { port } => Ok(port),
            WorkerEvent::BindFailed { port, message } => Err(Error::Bind {
                host: self.config.host.clone(),
                port,
                message,
            }),
            WorkerEvent::Captured { .. } => Err(Error::Protocol(
                "worker reported a capture before it was ready".to_string(),
            )),
        }
    }

    /// Kill the worker and release its port.
    ///
    /// In-flight requests are dropped. Bodies the worker had already reported
    /// stay queued for polling.
    pub async fn stop(&mut self) -> Result<()> {
        self.expect_state(ServerState::Running, "stop")?;
        self.state = ServerState::Stopped;

        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        info!(pid = ?worker.child.id(), "stopping mock backend worker");

        worker.child.kill().await?;
        // stdout reaches EOF once the process is gone; let the reader finish
        if timeout(READER_DRAIN_TIMEOUT, &mut worker.reader).await.is_err() {
            warn!("capture reader did not finish after worker exit");
            worker.reader.abort();
        }
        worker.log_forwarder.abort();
        Ok(())
    }

    /// Oldest captured POST body, without waiting.
    ///
    /// Fails with [`Error::EmptyQueue`] when nothing has been captured yet.
    pub fn poll_no_wait(&mut self) -> Result<Value> {
        self.captures.poll_no_wait()
    }

    /// Alias of [`MockServer::poll_no_wait`]
    pub fn last_request_data(&mut self) -> Result<Value> {
        self.poll_no_wait()
    }

    /// Poll until a captured body arrives or `timeout` elapses
    pub async fn wait_for_request(&mut self, timeout: Duration) -> Result<Value> {
        self.captures.wait_for(timeout).await
    }

    /// Every captured body queued right now, oldest first
    pub fn drain_requests(&mut self) -> Vec<Value> {
        self.captures.drain()
    }

    fn expect_state(&self, expected: ServerState, operation: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                state: self.state.to_string(),
                operation: operation.to_string(),
            })
        }
    }

    fn resolve_worker_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.worker_binary {
            return Ok(path.clone());
        }
        default_worker_binary()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            let _ = worker.child.start_kill();
            worker.reader.abort();
            worker.log_forwarder.abort();
        }
    }
}

/// Locate the worker next to the running executable.
///
/// Test binaries live in `target/<profile>/deps`, one level below the
/// binaries Cargo builds, so the parent directory is checked as well.
pub fn default_worker_binary() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let file_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);

    let mut dir = exe.parent();
    while let Some(candidate_dir) = dir {
        let candidate = candidate_dir.join(&file_name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if candidate_dir.file_name().map(|n| n != "deps").unwrap_or(true) {
            break;
        }
        dir = candidate_dir.parent();
    }

    Err(Error::Config(format!(
        "could not find {} next to {}; set it with MockServer::with_worker_binary",
        file_name,
        exe.display()
    )))
}

/// Decode worker events and queue captured bodies until stdout closes.
///
/// Each body is acknowledged only after it is queued, so the worker's 200
/// never overtakes the capture.
async fn forward_captures(
    mut events: Lines<BufReader<ChildStdout>>,
    mut stdin: ChildStdin,
    sink: CaptureSink,
) {
    loop {
        match events.next_line().await {
            Ok(Some(line)) => match WorkerEvent::decode(&line) {
                Ok(WorkerEvent::Captured { id, body }) => {
                    if sink.push(body).is_err() {
                        return;
                    }
                    if let Err(e) = acknowledge(&mut stdin, id).await {
                        warn!(id, error = %e, "failed to acknowledge capture");
                        return;
                    }
                }
                Ok(other) => warn!(event = ?other, "unexpected worker event"),
                Err(e) => warn!(error = %e, "skipping worker output"),
            },
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "worker stdout failed");
                return;
            }
        }
    }
}

async fn acknowledge(stdin: &mut ChildStdin, id: u64) -> Result<()> {
    let mut line = SupervisorCommand::Ack { id }.encode()?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

fn take_pipe<T>(pipe: Option<T>, name: &str) -> Result<T> {
    pipe.ok_or_else(|| Error::Protocol(format!("worker {} was not captured", name)))
}
