//! Layered TOML configuration for the tripwire network guard.
//!
//! Provides structured configuration types for the guard and the test runner,
//! loading from:
//! - Global config: `~/.config/tripwire/tripwire.toml`
//! - Project config: `<workspace>/.tripwire/tripwire.toml`
//!
//! Project values take precedence for scalar fields; list fields are merged.
//!
//! # Example
//!
//! ```no_run
//! use tripwire_settings::ConfigLoader;
//!
//! let config = ConfigLoader::load(std::path::Path::new("."));
//! println!("guard port: {}", config.guard.port());
//! ```

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Port the collaborating test setup points its HTTP client at.
///
/// Must stay in sync with the base URL configured in the test framework's
/// setup file; it is an external contract, not negotiated at runtime.
pub const DEFAULT_PORT: u16 = 9999;

/// Non-standard HTTP method reserved for the readiness handshake.
pub const DEFAULT_HANDSHAKE_METHOD: &str = "READY";

/// Test runner launched when no `[runner]` section or `--runner` is given.
pub const DEFAULT_RUNNER_PROGRAM: &str = "./node_modules/.bin/vue-cli-service";

/// Errors from settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// TOML deserialization failed.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// TOML serialization failed.
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading or writing a config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// TOML `[guard]` section.
///
/// Every field is optional so that merging can tell "unset" apart from
/// "explicitly set to the default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Loopback port to listen on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Interface to bind. Defaults to `127.0.0.1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<IpAddr>,

    /// HTTP method used for the readiness handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handshake_method: Option<String>,

    /// Interval between handshake attempts, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    /// Upper bound on the readiness wait, in seconds. `0` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_timeout_secs: Option<u64>,

    /// Grace period for in-flight connections when stopping, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_secs: Option<u64>,
}

impl GuardSettings {
    /// Effective port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Effective bind address (interface + port).
    pub fn bind_addr(&self) -> SocketAddr {
        let ip = self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(ip, self.port())
    }

    /// Effective handshake method name.
    pub fn handshake_method(&self) -> &str {
        self.handshake_method
            .as_deref()
            .unwrap_or(DEFAULT_HANDSHAKE_METHOD)
    }

    /// Effective handshake poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(100))
    }

    /// Effective readiness bound; `None` means wait indefinitely.
    pub fn ready_timeout(&self) -> Option<Duration> {
        match self.ready_timeout_secs.unwrap_or(30) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Effective shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs.unwrap_or(5))
    }
}

/// TOML `[runner]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Test runner executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,

    /// Arguments placed before the pass-through arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    /// Extra environment variables for the runner (`KEY=VALUE`).
    #[serde(default)]
    pub env: Vec<String>,
}

impl RunnerSettings {
    /// Effective runner program.
    pub fn program(&self) -> &str {
        self.program.as_deref().unwrap_or(DEFAULT_RUNNER_PROGRAM)
    }

    /// Effective base arguments.
    ///
    /// The built-in default only applies when the program is also the
    /// built-in default; a custom program starts with no base arguments.
    pub fn args(&self) -> Vec<String> {
        match (&self.args, &self.program) {
            (Some(args), _) => args.clone(),
            (None, None) => vec!["test:unit".to_string()],
            (None, Some(_)) => Vec::new(),
        }
    }
}

/// Top-level tripwire configuration, corresponding to `tripwire.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripwireConfig {
    /// Interception server configuration.
    #[serde(default)]
    pub guard: GuardSettings,

    /// Test runner configuration.
    #[serde(default)]
    pub runner: RunnerSettings,
}

impl TripwireConfig {
    /// Parse a `TripwireConfig` from a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::ParseError` if the TOML is malformed or
    /// contains values of the wrong type for this schema.
    pub fn parse(toml: &str) -> Result<Self, SettingsError> {
        toml::from_str(toml).map_err(SettingsError::ParseError)
    }

    /// Load a `TripwireConfig` from a file on disk.
    ///
    /// # Errors
    /// Returns `SettingsError::Io` on read failure, or
    /// `SettingsError::ParseError` if the file content is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Starter config with every default spelled out, for `config init`.
    pub fn starter() -> Self {
        Self {
            guard: GuardSettings {
                port: Some(DEFAULT_PORT),
                bind: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                handshake_method: Some(DEFAULT_HANDSHAKE_METHOD.to_string()),
                poll_interval_ms: Some(100),
                ready_timeout_secs: Some(30),
                shutdown_timeout_secs: Some(5),
            },
            runner: RunnerSettings {
                program: Some(DEFAULT_RUNNER_PROGRAM.to_string()),
                args: Some(vec!["test:unit".to_string()]),
                env: Vec::new(),
            },
        }
    }

    /// Serialize this config to a TOML string.
    ///
    /// # Errors
    /// Returns `SettingsError::SerializeError` if serialization fails.
    pub fn to_toml(&self) -> Result<String, SettingsError> {
        toml::to_string_pretty(self).map_err(SettingsError::SerializeError)
    }

    /// Save this config to a file, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns `SettingsError::Io` on write failure, or
    /// `SettingsError::SerializeError` if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = self.to_toml()?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Merge `other` (project-level) on top of `self` (global-level).
    ///
    /// - Scalar fields: `other` wins when explicitly set (`Some`).
    /// - List fields (`runner.env`): extended with `other`'s values so both
    ///   global and project entries contribute.
    /// - `runner.args` is treated as a scalar: a project that names its own
    ///   runner arguments replaces the global ones wholesale.
    #[must_use]
    pub fn merge(mut self, other: TripwireConfig) -> TripwireConfig {
        let guard = other.guard;
        if guard.port.is_some() {
            self.guard.port = guard.port;
        }
        if guard.bind.is_some() {
            self.guard.bind = guard.bind;
        }
        if guard.handshake_method.is_some() {
            self.guard.handshake_method = guard.handshake_method;
        }
        if guard.poll_interval_ms.is_some() {
            self.guard.poll_interval_ms = guard.poll_interval_ms;
        }
        if guard.ready_timeout_secs.is_some() {
            self.guard.ready_timeout_secs = guard.ready_timeout_secs;
        }
        if guard.shutdown_timeout_secs.is_some() {
            self.guard.shutdown_timeout_secs = guard.shutdown_timeout_secs;
        }

        let runner = other.runner;
        if runner.program.is_some() {
            self.runner.program = runner.program;
        }
        if runner.args.is_some() {
            self.runner.args = runner.args;
        }
        self.runner.env.extend(runner.env);
        dedup_preserve_order(&mut self.runner.env);
        self
    }
}

/// Remove duplicates from a `Vec<String>` while preserving insertion order.
fn dedup_preserve_order(v: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    v.retain(|x| seen.insert(x.clone()));
}
