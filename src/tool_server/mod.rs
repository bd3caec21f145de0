//! Ephemeral per-task tool server.
//!
//! A [`ToolServer`] is bound to exactly one [`SandboxTarget`] and one leased
//! port. It exposes a single tool, [`EXECUTE_TOOL_NAME`], which runs a bash
//! command in that sandbox through a [`CommandExecutor`].
//!
//! Lifecycle:
//!
//! ```text
//! Created --start()--> Starting --wait_until_ready()--> Ready --settle--> Serving
//!     \                    \                                                 |
//!      \                    +-----------------shutdown()---------------------+
//!       +--shutdown()--> Stopped <-- ShuttingDown <--------------------------+
//! ```
//!
//! The server runs on its own tokio task. `shutdown()` signals it and joins
//! with a bounded timeout; if the join times out the task is aborted and the
//! server is still reported `Stopped`. Dropping a running server signals and
//! aborts it, so every exit path of the owning task releases the port.

mod client;
pub mod protocol;
mod server;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;

pub use client::{ToolInvoker, ToolServerClient};
pub use protocol::{CallToolResult, ContentItem, ToolDescriptor, EXECUTE_TOOL_NAME};
pub use server::{router, ToolService};

use crate::config::ToolServerSettings;
use crate::error::ToolServerError;
use crate::sandbox::{CommandExecutor, CommandResult, PortLease, SandboxTarget};

/// Lifecycle state; only the owning [`ToolServer`] changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolServerState {
    Created,
    Starting,
    Ready,
    Serving,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ToolServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Serving => "serving",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Network and timing options for one server.
#[derive(Debug, Clone)]
pub struct ToolServerOptions {
    pub bind_host: String,
    pub public_host: String,
    pub working_dir: String,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub settle_delay: Duration,
    pub join_timeout: Duration,
}

impl Default for ToolServerOptions {
    fn default() -> Self {
        Self::from(&ToolServerSettings::default())
    }
}

impl From<&ToolServerSettings> for ToolServerOptions {
    fn from(settings: &ToolServerSettings) -> Self {
        Self {
            bind_host: settings.bind_host.clone(),
            public_host: settings.public_host.clone(),
            working_dir: settings.working_dir.clone(),
            probe_timeout: settings.probe_timeout(),
            poll_interval: settings.ready_poll_interval(),
            max_attempts: settings.ready_max_attempts,
            settle_delay: settings.settle_delay(),
            join_timeout: settings.join_timeout(),
        }
    }
}

type Worker = JoinHandle<Result<(), ToolServerError>>;

pub struct ToolServer {
    lease: PortLease,
    service: ToolService,
    options: ToolServerOptions,
    state: ToolServerState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    bound_rx: Option<oneshot::Receiver<()>>,
    bound: bool,
    worker: Option<Worker>,
}

impl ToolServer {
    pub fn new(
        lease: PortLease,
        sandbox: SandboxTarget,
        executor: Arc<dyn CommandExecutor>,
        options: ToolServerOptions,
    ) -> Self {
        let service = ToolService::new(executor, sandbox, options.working_dir.clone());
        Self {
            lease,
            service,
            options,
            state: ToolServerState::Created,
            shutdown_tx: None,
            bound_rx: None,
            bound: false,
            worker: None,
        }
    }

    pub fn state(&self) -> ToolServerState {
        self.state
    }

    pub fn port(&self) -> u16 {
        self.lease.port
    }

    pub fn lease(&self) -> &PortLease {
        &self.lease
    }

    pub fn sandbox(&self) -> &SandboxTarget {
        self.service.sandbox()
    }

    /// Base URL handed to the solver.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.options.public_host, self.lease.port)
    }

    /// The tool operation, callable in-process without going over HTTP.
    pub async fn execute_command(&self, command: &str) -> CommandResult {
        self.service.execute_command(command).await
    }

    /// Launches the serving task. Binding happens on that task, so callers
    /// must wait for readiness before handing out the URL.
    pub fn start(&mut self) {
        if self.state != ToolServerState::Created {
            tracing::warn!(port = self.lease.port, state = %self.state, "start() ignored");
            return;
        }

        let addr = format!("{}:{}", self.options.bind_host, self.lease.port);
        let app = router(self.service.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (bound_tx, bound_rx) = oneshot::channel::<()>();
        let sandbox = self.service.sandbox().clone();

        let worker = tokio::spawn(async move {
            let listener = TcpListener::bind(&addr)
                .await
                .map_err(|e| ToolServerError::Bind {
                    addr: addr.clone(),
                    message: e.to_string(),
                })?;
            tracing::info!(addr = %addr, container = %sandbox, "Tool server listening");
            let _ = bound_tx.send(());

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| ToolServerError::Transport(e.to_string()))?;

            tracing::debug!(addr = %addr, "Tool server run-loop exited");
            Ok(())
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.bound_rx = Some(bound_rx);
        self.worker = Some(worker);
        self.state = ToolServerState::Starting;
    }

    /// One TCP-connect probe against the leased port.
    pub async fn is_ready(&self) -> bool {
        if matches!(
            self.state,
            ToolServerState::Created | ToolServerState::ShuttingDown | ToolServerState::Stopped
        ) {
            return false;
        }
        let host = probe_host(&self.options.bind_host);
        matches!(
            tokio::time::timeout(
                self.options.probe_timeout,
                TcpStream::connect((host, self.lease.port)),
            )
            .await,
            Ok(Ok(_))
        )
    }

    /// Polls [`Self::is_ready`] up to `max_attempts` times, then waits the
    /// settle delay so the protocol endpoint is mounted before use. Probes
    /// only count once this server's own run-loop has bound the port, so a
    /// foreign listener on the leased port is never mistaken for readiness.
    ///
    /// # Errors
    ///
    /// The bind error if the run-loop died, otherwise `StartupFailed`.
    pub async fn wait_until_ready(&mut self) -> Result<(), ToolServerError> {
        if matches!(self.state, ToolServerState::Ready | ToolServerState::Serving) {
            return Ok(());
        }

        for attempt in 1..=self.options.max_attempts {
            if self.run_loop_bound().await? && self.is_ready().await {
                self.state = ToolServerState::Ready;
                tracing::debug!(port = self.lease.port, attempt, "Tool server accepting connections");
                tokio::time::sleep(self.options.settle_delay).await;
                self.state = ToolServerState::Serving;
                return Ok(());
            }

            tokio::time::sleep(self.options.poll_interval).await;
        }

        Err(ToolServerError::StartupFailed {
            port: self.lease.port,
            attempts: self.options.max_attempts,
        })
    }

    /// Whether the run-loop reported a successful bind. A dropped signal
    /// means the run-loop exited first, so its error is returned.
    async fn run_loop_bound(&mut self) -> Result<bool, ToolServerError> {
        if self.bound {
            return Ok(true);
        }
        let Some(bound_rx) = self.bound_rx.as_mut() else {
            return Ok(false);
        };
        match bound_rx.try_recv() {
            Ok(()) => {
                self.bound = true;
                self.bound_rx = None;
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Closed) => {
                self.bound_rx = None;
                Err(self.worker_failure().await)
            }
        }
    }

    async fn worker_failure(&mut self) -> ToolServerError {
        let Some(worker) = self.worker.take() else {
            return ToolServerError::Transport("tool server was not started".to_string());
        };
        match tokio::time::timeout(self.options.join_timeout, worker).await {
            Ok(Ok(Err(error))) => error,
            Ok(Ok(Ok(()))) => {
                ToolServerError::Transport("tool server exited before becoming ready".to_string())
            }
            Ok(Err(join_error)) => ToolServerError::Transport(join_error.to_string()),
            Err(_) => ToolServerError::Transport("tool server run-loop did not report".to_string()),
        }
    }

    /// Signals the run-loop and joins it with a bounded timeout. Best-effort:
    /// always ends in `Stopped`.
    pub async fn shutdown(&mut self) {
        if self.state == ToolServerState::Stopped {
            return;
        }
        self.state = ToolServerState::ShuttingDown;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut worker) = self.worker.take() {
            match tokio::time::timeout(self.options.join_timeout, &mut worker).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(error))) => {
                    tracing::warn!(port = self.lease.port, error = %error, "Tool server exited with error");
                }
                Ok(Err(join_error)) => {
                    tracing::warn!(port = self.lease.port, error = %join_error, "Tool server task failed");
                }
                Err(_) => {
                    tracing::warn!(
                        port = self.lease.port,
                        timeout_ms = self.options.join_timeout.as_millis() as u64,
                        "Tool server did not stop in time, aborting"
                    );
                    worker.abort();
                }
            }
        }

        self.state = ToolServerState::Stopped;
        tracing::info!(port = self.lease.port, task_id = %self.lease.held_by, "Tool server stopped");
    }
}

impl Drop for ToolServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

fn probe_host(bind_host: &str) -> &str {
    match bind_host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{LocalExecutor, PortAllocator};

    fn fast_options() -> ToolServerOptions {
        ToolServerOptions {
            bind_host: "127.0.0.1".to_string(),
            public_host: "127.0.0.1".to_string(),
            working_dir: "/app".to_string(),
            probe_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            max_attempts: 3,
            settle_delay: Duration::from_millis(10),
            join_timeout: Duration::from_secs(2),
        }
    }

    fn server(port: u16) -> ToolServer {
        ToolServer::new(
            PortAllocator::new(port).lease("unit"),
            SandboxTarget::new("/tmp"),
            Arc::new(LocalExecutor::new(Duration::from_secs(5))),
            fast_options(),
        )
    }

    #[test]
    fn test_probe_host_maps_wildcards() {
        assert_eq!(probe_host("0.0.0.0"), "127.0.0.1");
        assert_eq!(probe_host("::"), "::1");
        assert_eq!(probe_host("10.0.0.2"), "10.0.0.2");
    }

    #[tokio::test]
    async fn test_created_server_is_not_ready() {
        let server = server(1);
        assert_eq!(server.state(), ToolServerState::Created);
        assert!(!server.is_ready().await);
        assert_eq!(server.url(), "http://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_shutdown_from_created_stops() {
        let mut server = server(1);
        server.shutdown().await;
        assert_eq!(server.state(), ToolServerState::Stopped);
        assert!(!server.is_ready().await);
    }

    #[tokio::test]
    async fn test_foreign_listener_is_not_ready() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = blocker.local_addr().expect("addr").port();

        let mut server = ToolServer::new(
            PortAllocator::new(port).lease("unit"),
            SandboxTarget::new("/tmp"),
            Arc::new(LocalExecutor::new(Duration::from_secs(5))),
            ToolServerOptions {
                max_attempts: 40,
                ..fast_options()
            },
        );
        server.start();
        assert_eq!(server.state(), ToolServerState::Starting);

        let outcome = server.wait_until_ready().await;
        assert!(matches!(outcome, Err(ToolServerError::Bind { .. })), "{:?}", outcome);
        assert_ne!(server.state(), ToolServerState::Serving);

        server.shutdown().await;
        assert_eq!(server.state(), ToolServerState::Stopped);
        drop(blocker);
    }

    #[tokio::test]
    async fn test_wait_until_ready_after_bind() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("bind")
            .local_addr()
            .expect("addr")
            .port();
        let mut server = ToolServer::new(
            PortAllocator::new(port).lease("unit"),
            SandboxTarget::new("/tmp"),
            Arc::new(LocalExecutor::new(Duration::from_secs(5))),
            ToolServerOptions {
                max_attempts: 40,
                ..fast_options()
            },
        );
        server.start();
        server.wait_until_ready().await.expect("ready");
        assert_eq!(server.state(), ToolServerState::Serving);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_execute_command_in_process() {
        let dir = tempfile::tempdir().expect("tempdir");
        let server = ToolServer::new(
            PortAllocator::new(1).lease("unit"),
            SandboxTarget::new(dir.path().to_string_lossy().to_string()),
            Arc::new(LocalExecutor::new(Duration::from_secs(5))),
            fast_options(),
        );
        let result = server.execute_command("echo hi").await;
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 0);
    }
}
