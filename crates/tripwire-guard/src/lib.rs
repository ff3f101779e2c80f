//! Network guard for test suites.
//!
//! `tripwire-guard` runs a loopback HTTP listener for the lifetime of a test
//! command. The test framework points its HTTP client at that listener, so any
//! request that was not intercepted by a mock lands here, gets recorded and
//! rejected, and turns the whole run into a failure.
//!
//! # Architecture
//!
//! ```text
//! TestRun::run()
//!       |
//!       +-- InterceptionServer (127.0.0.1:9999, background task)
//!       |      |
//!       |      +-- handshake verb? --> ReadinessGate::mark_ready, 200
//!       |      +-- anything else?  --> RequestRecorder::record, 501
//!       |
//!       +-- ReadinessGate::wait()
//!       |
//!       +-- spawn test command (pass-through args), wait
//!       |
//!       +-- GuardHandle::stop()
//!       |
//!       v
//! RunReport (child exit code reconciled with recorded requests)
//! ```
//!
//! # Components
//!
//! - [`RequestRecorder`]: Order-preserving, thread-safe tally of request targets
//! - [`ReadinessGate`]: One-shot signal set by the server's handshake handler
//! - [`InterceptionServer`]: The loopback listener and its [`GuardHandle`]
//! - [`TestRun`]: Orchestrates a guarded test command and produces a [`RunReport`]
//!
//! # Usage
//!
//! ```ignore
//! use tripwire_guard::{GuardConfig, TestRun};
//!
//! let report = TestRun::new(GuardConfig::default(), "npm")
//!     .with_args(["test", "--", "--watch=false"])
//!     .run()
//!     .await?;
//! if !report.is_clean() {
//!     print!("{}", report.render_warning());
//! }
//! std::process::exit(report.exit_code());
//! ```

mod gate;
mod orchestrator;
mod recorder;
mod server;

pub use gate::ReadinessGate;
pub use orchestrator::{RunReport, TestCommandResult, TestRun, UNMOCKED_EXIT_CODE};
pub use recorder::{RequestRecorder, UnmockedRequest};
pub use server::{GuardConfig, GuardHandle, InterceptionServer};

use std::net::SocketAddr;
use std::time::Duration;

/// Result type for guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors that can occur while guarding a test run.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Failed to bind the interception listener.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The handshake method is not a valid HTTP token.
    #[error("Invalid handshake method {method:?}")]
    InvalidHandshakeMethod { method: String },

    /// The server never answered the readiness handshake.
    #[error("Guard did not become ready within {waited:?}")]
    NotReady { waited: Duration },

    /// The test command could not be started.
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the test command failed.
    #[error("Failed to wait for test command: {0}")]
    Wait(#[source] std::io::Error),

    /// Server shutdown error.
    #[error("Server shutdown error: {0}")]
    Shutdown(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}
