//! Loopback HTTP listener that rejects and records every request.
//!
//! # Lifecycle
//!
//! ```text
//! InterceptionServer::new(config, recorder, gate)
//!       |
//!       v
//! InterceptionServer::start() --> GuardHandle
//!       |                              |
//!       v                              v
//! serve on background task     GuardHandle::wait_ready()
//!       |                              |
//!       |                              v
//!       |                      GuardHandle::stop()
//!       v                              |
//! graceful shutdown <------------------+
//! ```
//!
//! Dispatch is a single catch-all handler: the handshake verb opens the
//! [`ReadinessGate`] and gets `200`; every other method is recorded and gets
//! `501`. Requests hyper cannot parse never reach the handler.

use crate::{GuardError, ReadinessGate, RequestRecorder, Result};
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the interception server.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Listener address.
    /// Default: `127.0.0.1:9999`
    pub bind_addr: SocketAddr,

    /// Non-standard method used for the readiness handshake.
    /// Default: `READY`
    pub handshake_method: String,

    /// Delay between handshake attempts while waiting for readiness.
    /// Default: 100 milliseconds
    pub poll_interval: Duration,

    /// Upper bound on the readiness wait; `None` waits indefinitely.
    /// Default: 30 seconds
    pub ready_timeout: Option<Duration>,

    /// Grace period for in-flight connections on stop.
    /// Default: 5 seconds
    pub shutdown_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9999),
            handshake_method: "READY".to_string(),
            poll_interval: Duration::from_millis(100),
            ready_timeout: Some(Duration::from_secs(30)),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl GuardConfig {
    /// Default config listening on the given loopback port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            ..Default::default()
        }
    }

    /// Parse and validate the handshake method.
    ///
    /// # Errors
    /// * `GuardError::InvalidHandshakeMethod` - Not an HTTP token, or one of
    ///   the standard methods application traffic uses.
    pub fn handshake(&self) -> Result<Method> {
        let invalid = || GuardError::InvalidHandshakeMethod {
            method: self.handshake_method.clone(),
        };
        let method = Method::from_bytes(self.handshake_method.as_bytes()).map_err(|_| invalid())?;
        if is_standard_method(&method) {
            return Err(invalid());
        }
        Ok(method)
    }
}

/// State shared by every connection handler.
#[derive(Clone)]
struct GuardState {
    recorder: Arc<RequestRecorder>,
    gate: ReadinessGate,
    handshake: Method,
}

/// Handle for controlling a running interception server.
pub struct GuardHandle {
    /// Shutdown signal sender.
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Join handle for the serving task.
    join_handle: Option<JoinHandle<Result<()>>>,

    /// Actual bound address (resolves port 0).
    local_addr: SocketAddr,

    handshake: Method,
    poll_interval: Duration,
    ready_timeout: Option<Duration>,
    shutdown_timeout: Duration,

    recorder: Arc<RequestRecorder>,
    gate: ReadinessGate,
}

impl GuardHandle {
    /// Check if the serving task is still running.
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL clients should use to reach the guard.
    pub fn url(&self) -> String {
        format!("http://{}", connect_addr(self.local_addr))
    }

    /// Recorder fed by this server.
    pub fn recorder(&self) -> &Arc<RequestRecorder> {
        &self.recorder
    }

    /// Gate opened by this server's handshake handler.
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Block until the server has answered a handshake.
    ///
    /// A background probe sends the handshake verb every `poll_interval`
    /// until the gate opens; this call waits on the gate itself, so it
    /// returns as soon as the server-side handler fires.
    ///
    /// # Errors
    /// * `GuardError::NotReady` - The gate stayed closed for `ready_timeout`.
    /// * `GuardError::Internal` - The probe client could not be built.
    pub async fn wait_ready(&self) -> Result<()> {
        if self.gate.is_ready() {
            return Ok(());
        }

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| GuardError::Internal(format!("Failed to build handshake client: {e}")))?;
        let probe = tokio::spawn(probe_until_ready(
            client,
            format!("{}/", self.url()),
            self.handshake.clone(),
            self.gate.clone(),
            self.poll_interval,
        ));

        let waited = match self.ready_timeout {
            Some(limit) => self.gate.wait_timeout(limit).await,
            None => self.gate.wait().await,
        };
        probe.abort();
        waited
    }

    /// Stop the server and wait for the serving task to exit.
    ///
    /// Signals graceful shutdown so in-flight requests complete. If the task
    /// does not finish within `shutdown_timeout` it is aborted, and the abort
    /// is still awaited so the port is released when this returns. Requests
    /// on connections left open at that point never reach the recorder, so
    /// the expired drain is reported as an error.
    /// Calling `stop` on an already stopped handle is a no-op.
    ///
    /// # Errors
    /// * `GuardError::Internal` - The serve loop itself failed.
    /// * `GuardError::Shutdown` - Connections were still open after the grace
    ///   period, or the serving task panicked.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut handle) = self.join_handle.take() else {
            return Ok(());
        };

        let signal_sent = self
            .shutdown_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false);

        let joined = if signal_sent {
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout = ?self.shutdown_timeout,
                        "Guard did not drain in time; abandoning open connections"
                    );
                    handle.abort();
                    let _ = handle.await;
                    info!(addr = %self.local_addr, "Guard stopped");
                    return Err(GuardError::Shutdown(format!(
                        "connections still open after {:?} grace period",
                        self.shutdown_timeout
                    )));
                }
            }
        } else {
            // Receiver gone: the task already exited or is exiting.
            handle.abort();
            handle.await
        };

        info!(addr = %self.local_addr, "Guard stopped");
        match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(GuardError::Shutdown(format!("serving task panicked: {e}"))),
        }
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.abort();
        }
    }
}

/// The interception server.
pub struct InterceptionServer {
    /// Server configuration.
    config: GuardConfig,

    /// Validated handshake method.
    handshake: Method,

    recorder: Arc<RequestRecorder>,
    gate: ReadinessGate,
}

impl InterceptionServer {
    /// Create a new interception server.
    ///
    /// # Errors
    /// * `GuardError::InvalidHandshakeMethod` - See [`GuardConfig::handshake`].
    pub fn new(
        config: GuardConfig,
        recorder: Arc<RequestRecorder>,
        gate: ReadinessGate,
    ) -> Result<Self> {
        let handshake = config.handshake()?;
        Ok(Self {
            config,
            handshake,
            recorder,
            gate,
        })
    }

    /// Bind the listener and start serving on a background task.
    ///
    /// The socket is bound before this returns, so connection attempts made
    /// afterwards queue instead of being refused.
    ///
    /// # Errors
    /// * `GuardError::Bind` - The address is unavailable.
    pub async fn start(self) -> Result<GuardHandle> {
        let addr = self.config.bind_addr;
        let listener = bind_listener(addr).map_err(|source| GuardError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| GuardError::Bind { addr, source })?;

        let state = GuardState {
            recorder: Arc::clone(&self.recorder),
            gate: self.gate.clone(),
            handshake: self.handshake.clone(),
        };
        let app = Router::new().fallback(intercept).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| GuardError::Internal(format!("Serve loop failed: {e}")))
        });
        info!(addr = %local_addr, "Guard listening");

        Ok(GuardHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
            local_addr,
            handshake: self.handshake,
            poll_interval: self.config.poll_interval,
            ready_timeout: self.config.ready_timeout,
            shutdown_timeout: self.config.shutdown_timeout,
            recorder: self.recorder,
            gate: self.gate,
        })
    }
}

/// Bind with `SO_REUSEADDR` so back-to-back runs don't trip over a socket
/// still in `TIME_WAIT` from the previous run.
fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Methods that can never serve as the handshake verb.
fn is_standard_method(method: &Method) -> bool {
    [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
        Method::CONNECT,
        Method::TRACE,
    ]
    .contains(method)
}

/// Wildcard binds are reached through loopback.
fn connect_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

async fn probe_until_ready(
    client: reqwest::Client,
    url: String,
    method: Method,
    gate: ReadinessGate,
    interval: Duration,
) {
    while !gate.is_ready() {
        match client.request(method.clone(), &url).send().await {
            Ok(response) => debug!(status = %response.status(), "Handshake answered"),
            Err(e) => debug!(error = %e, "Handshake attempt failed"),
        }
        if gate.is_ready() {
            break;
        }
        tokio::time::sleep(interval).await;
    }
}

async fn intercept(State(state): State<GuardState>, method: Method, uri: Uri) -> Response {
    if method == state.handshake {
        // Open the gate before the response goes out.
        if state.gate.mark_ready() {
            info!("Guard ready");
        }
        return StatusCode::OK.into_response();
    }

    let target = uri.to_string();
    debug!(method = %method, target = %target, "Unmocked request intercepted");
    state.recorder.record(target.as_str());
    (
        StatusCode::NOT_IMPLEMENTED,
        format!("Unmocked HTTP request detected: {method} {target}\n"),
    )
        .into_response()
}
