//! Guarded test-command execution.
//!
//! [`TestRun`] owns one full cycle: start the guard, wait for readiness, run
//! the test command to completion, stop the guard, then reconcile the
//! command's exit code with whatever the guard recorded.

use crate::{
    GuardConfig, GuardError, GuardHandle, InterceptionServer, ReadinessGate, RequestRecorder,
    Result, UnmockedRequest,
};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{info, warn};

/// Exit code reported whenever unmocked requests were observed.
pub const UNMOCKED_EXIT_CODE: i32 = 1;

/// Outcome of the external test command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestCommandResult {
    /// Exit code, if the command exited normally.
    pub exit_code: Option<i32>,

    /// Terminating signal, if the command was killed (Unix only).
    pub signal: Option<i32>,
}

impl TestCommandResult {
    /// A command that exited normally with `code`.
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            signal: None,
        }
    }

    /// Capture the relevant parts of a process exit status.
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            exit_code: status.code(),
            signal,
        }
    }

    /// Exit code to propagate, using the shell convention `128 + signal`
    /// for signal deaths.
    pub fn code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

/// Result of a guarded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// What the test command itself returned.
    pub command: TestCommandResult,

    /// Requests that reached the guard, in first-seen order.
    pub unmocked: Vec<UnmockedRequest>,

    /// Set when the guard did not shut down cleanly. Requests still in
    /// flight at that point are missing from `unmocked`.
    pub shutdown_error: Option<String>,
}

impl RunReport {
    /// True when no request reached the guard and the guard shut down
    /// cleanly.
    pub fn is_clean(&self) -> bool {
        self.unmocked.is_empty() && self.shutdown_error.is_none()
    }

    /// The harness's own exit code.
    ///
    /// The command's code passes through untouched on a clean run, so genuine
    /// test failures are never masked. Any unmocked request turns the run
    /// into [`UNMOCKED_EXIT_CODE`], even when the suite itself passed. So
    /// does an incomplete shutdown, since the tally may be short.
    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            self.command.code()
        } else {
            UNMOCKED_EXIT_CODE
        }
    }

    /// Console report listing each unmocked target and its hit count,
    /// followed by a note when the guard shutdown was incomplete.
    ///
    /// Empty on a clean run.
    pub fn render_warning(&self) -> String {
        let mut out = String::new();
        if !self.unmocked.is_empty() {
            out.push_str(
                "\nWARNING: Unmocked HTTP requests were sent to the following urls (<url>, <count>):\n",
            );
            for request in &self.unmocked {
                let _ = writeln!(out, "{}, {}", request.path, request.count);
            }
        }
        if let Some(error) = &self.shutdown_error {
            let _ = writeln!(
                out,
                "\nWARNING: The guard did not shut down cleanly ({error}); \
                 requests still in flight were not counted."
            );
        }
        out
    }
}

/// A test command to run behind the guard.
#[derive(Debug, Clone)]
pub struct TestRun {
    config: GuardConfig,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl TestRun {
    /// Prepare a run of `program` guarded by a server built from `config`.
    pub fn new(config: GuardConfig, program: impl Into<String>) -> Self {
        Self {
            config,
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
        }
    }

    /// Append arguments, passed to the command verbatim.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an extra environment variable for the command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the command in `cwd` instead of the current directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Execute the guarded run.
    ///
    /// The guard is stopped on every path once it has started, including
    /// readiness and spawn failures, before the error is returned. A failed
    /// stop after the command finished does not discard the tally; it is
    /// carried in [`RunReport::shutdown_error`] and fails the run.
    ///
    /// # Errors
    /// * `GuardError::InvalidHandshakeMethod` - Bad handshake configuration.
    /// * `GuardError::Bind` - The guard port is unavailable; the command is
    ///   never spawned.
    /// * `GuardError::NotReady` - The guard never answered its handshake.
    /// * `GuardError::Spawn` / `GuardError::Wait` - The command could not be
    ///   started or waited on.
    pub async fn run(self) -> Result<RunReport> {
        let recorder = Arc::new(RequestRecorder::new());
        let server = InterceptionServer::new(
            self.config.clone(),
            Arc::clone(&recorder),
            ReadinessGate::new(),
        )?;
        let mut handle = server.start().await?;

        let outcome = self.execute(&handle).await;
        let stopped = handle.stop().await;

        let command = match outcome {
            Ok(command) => command,
            Err(err) => {
                if let Err(stop_err) = stopped {
                    warn!(error = %stop_err, "Guard shutdown failed after run error");
                }
                return Err(err);
            }
        };
        let shutdown_error = stopped.err().map(|stop_err| {
            warn!(error = %stop_err, "Guard shutdown incomplete; failing the run");
            stop_err.to_string()
        });

        let unmocked = recorder.snapshot();
        if unmocked.is_empty() {
            info!(exit_code = command.code(), "Test command finished; no unmocked requests");
        } else {
            warn!(
                distinct = unmocked.len(),
                total = recorder.total(),
                "Unmocked HTTP requests detected"
            );
        }
        Ok(RunReport {
            command,
            unmocked,
            shutdown_error,
        })
    }

    async fn execute(&self, handle: &GuardHandle) -> Result<TestCommandResult> {
        handle.wait_ready().await?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .env("TRIPWIRE_URL", handle.url())
            .env("TRIPWIRE_PORT", handle.local_addr().port().to_string());
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        info!(program = %self.program, args = ?self.args, "Launching test command");
        let mut child = command.spawn().map_err(|source| GuardError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let status = child.wait().await.map_err(GuardError::Wait)?;
        Ok(TestCommandResult::from_status(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(code: i32, unmocked: &[(&str, u64)]) -> RunReport {
        RunReport {
            command: TestCommandResult::exited(code),
            unmocked: unmocked
                .iter()
                .map(|(path, count)| UnmockedRequest {
                    path: path.to_string(),
                    count: *count,
                })
                .collect(),
            shutdown_error: None,
        }
    }

    // ========================================================================
    // Reconciliation Tests
    // ========================================================================

    #[test]
    fn test_clean_run_passes_child_code_through() {
        assert_eq!(report(0, &[]).exit_code(), 0);
        assert_eq!(report(2, &[]).exit_code(), 2);
    }

    #[test]
    fn test_unmocked_requests_override_child_success() {
        assert_eq!(report(0, &[("/api/users", 3)]).exit_code(), UNMOCKED_EXIT_CODE);
    }

    #[test]
    fn test_signal_death_maps_to_shell_convention() {
        let command = TestCommandResult {
            exit_code: None,
            signal: Some(15),
        };
        assert_eq!(command.code(), 143);
    }

    #[test]
    fn test_render_warning_lists_paths_in_order() {
        let rendered = report(0, &[("/api/users", 3), ("/api/courses/", 1)]).render_warning();
        assert_eq!(
            rendered,
            "\nWARNING: Unmocked HTTP requests were sent to the following urls (<url>, <count>):\n\
             /api/users, 3\n\
             /api/courses/, 1\n"
        );
    }

    #[test]
    fn test_render_warning_empty_when_clean() {
        assert!(report(1, &[]).render_warning().is_empty());
    }

    #[test]
    fn test_incomplete_shutdown_fails_an_otherwise_clean_run() {
        let mut report = report(0, &[]);
        report.shutdown_error = Some("connections still open".to_string());
        assert!(!report.is_clean());
        assert_eq!(report.exit_code(), UNMOCKED_EXIT_CODE);
        let rendered = report.render_warning();
        assert!(rendered.contains("did not shut down cleanly (connections still open)"));
        assert!(!rendered.contains("Unmocked HTTP requests were sent"));
    }

    #[test]
    fn test_incomplete_shutdown_keeps_recorded_requests_in_warning() {
        let mut report = report(0, &[("/api/users", 2)]);
        report.shutdown_error = Some("connections still open".to_string());
        let rendered = report.render_warning();
        assert!(rendered.contains("/api/users, 2"));
        assert!(rendered.contains("did not shut down cleanly"));
    }

    proptest! {
        #[test]
        fn prop_no_traffic_passes_code_through(code in any::<i32>()) {
            prop_assert_eq!(report(code, &[]).exit_code(), code);
        }

        #[test]
        fn prop_any_traffic_fails_with_fixed_code(code in any::<i32>(), hits in 1u64..100) {
            prop_assert_eq!(report(code, &[("/x", hits)]).exit_code(), UNMOCKED_EXIT_CODE);
        }
    }

    // ========================================================================
    // End-to-end Tests
    // ========================================================================

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::time::Duration;

        fn can_bind_localhost() -> bool {
            match std::net::TcpListener::bind("127.0.0.1:0") {
                Ok(listener) => {
                    drop(listener);
                    true
                }
                Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
                Err(err) => panic!("Failed to bind TCP localhost for test: {err}"),
            }
        }

        macro_rules! skip_if_no_bind {
            () => {
                if !can_bind_localhost() {
                    return;
                }
            };
        }

        fn free_port() -> u16 {
            std::net::TcpListener::bind("127.0.0.1:0")
                .unwrap()
                .local_addr()
                .unwrap()
                .port()
        }

        fn sh(script: &str) -> TestRun {
            TestRun::new(GuardConfig::with_port(0), "sh").with_args(["-c", script])
        }

        #[tokio::test]
        async fn test_run_child_exit_code_passes_through() {
            skip_if_no_bind!();
            let report = sh("exit 2").run().await.unwrap();
            assert!(report.is_clean());
            assert_eq!(report.command, TestCommandResult::exited(2));
            assert_eq!(report.exit_code(), 2);
        }

        #[tokio::test]
        async fn test_run_successful_child_without_traffic() {
            skip_if_no_bind!();
            let report = sh("exit 0").run().await.unwrap();
            assert_eq!(report.exit_code(), 0);
        }

        #[tokio::test]
        async fn test_run_passes_args_verbatim() {
            skip_if_no_bind!();
            let report = sh(r#"[ "$1" = "--grep" ] && [ "$2" = "two words" ]"#)
                .with_args(["sh", "--grep", "two words"])
                .run()
                .await
                .unwrap();
            assert_eq!(report.exit_code(), 0);
        }

        #[tokio::test]
        async fn test_run_exposes_guard_url_to_child() {
            skip_if_no_bind!();
            let report = sh(r#"case "$TRIPWIRE_URL" in http://127.0.0.1:"$TRIPWIRE_PORT") exit 0;; *) exit 7;; esac"#)
                .run()
                .await
                .unwrap();
            assert_eq!(report.exit_code(), 0);
        }

        #[tokio::test]
        async fn test_run_applies_extra_env_and_cwd() {
            skip_if_no_bind!();
            let dir = std::env::temp_dir();
            let report = sh(r#"[ "$SUITE" = "unit" ] && [ "$(pwd -P)" = "$(cd "$EXPECTED" && pwd -P)" ]"#)
                .with_env("SUITE", "unit")
                .with_env("EXPECTED", dir.to_string_lossy())
                .with_cwd(&dir)
                .run()
                .await
                .unwrap();
            assert_eq!(report.exit_code(), 0);
        }

        #[tokio::test]
        async fn test_run_spawn_failure_stops_guard() {
            skip_if_no_bind!();
            let port = free_port();
            let err = TestRun::new(GuardConfig::with_port(port), "/definitely/not/a/test-runner")
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, GuardError::Spawn { .. }));

            // The guard was torn down before the error surfaced.
            let probe = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
            assert!(probe.is_err(), "guard still accepting connections on {port}");
        }

        #[tokio::test]
        async fn test_run_bind_failure_never_spawns_child() {
            skip_if_no_bind!();
            let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = blocker.local_addr().unwrap().port();
            let marker = std::env::temp_dir().join(format!("tripwire-spawned-{port}"));
            let _ = std::fs::remove_file(&marker);

            let err = TestRun::new(GuardConfig::with_port(port), "touch")
                .with_args([marker.to_string_lossy().into_owned()])
                .run()
                .await
                .unwrap_err();
            assert!(matches!(err, GuardError::Bind { .. }));
            assert!(!marker.exists());
        }

        #[tokio::test]
        async fn test_run_records_traffic_during_child_and_fails() {
            skip_if_no_bind!();
            let port = free_port();
            let base = format!("http://127.0.0.1:{port}");

            let traffic = tokio::spawn(async move {
                let client = reqwest::Client::builder().no_proxy().build().unwrap();
                let ready = reqwest::Method::from_bytes(b"READY").unwrap();
                // Wait until the guard answers, then behave like a leaky test.
                loop {
                    if let Ok(r) = client.request(ready.clone(), format!("{base}/")).send().await {
                        if r.status().is_success() {
                            break;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                let url = format!("{base}/api/users");
                client.get(&url).send().await.unwrap();
                client.post(&url).send().await.unwrap();
                client.post(&url).send().await.unwrap();
            });

            let report = TestRun::new(GuardConfig::with_port(port), "sleep")
                .with_args(["2"])
                .run()
                .await
                .unwrap();
            traffic.await.unwrap();

            assert_eq!(report.command, TestCommandResult::exited(0));
            assert_eq!(
                report.unmocked,
                vec![UnmockedRequest {
                    path: "/api/users".to_string(),
                    count: 3
                }]
            );
            assert_eq!(report.exit_code(), UNMOCKED_EXIT_CODE);
            assert!(report.render_warning().contains("/api/users, 3"));
        }

        #[tokio::test]
        async fn test_run_with_request_stuck_past_grace_period_is_not_clean() {
            skip_if_no_bind!();
            use tokio::io::AsyncWriteExt;

            let port = free_port();
            let config = GuardConfig {
                shutdown_timeout: Duration::from_millis(200),
                ..GuardConfig::with_port(port)
            };

            let stuck = tokio::spawn(async move {
                let client = reqwest::Client::builder().no_proxy().build().unwrap();
                let ready = reqwest::Method::from_bytes(b"READY").unwrap();
                let url = format!("http://127.0.0.1:{port}/");
                loop {
                    if let Ok(r) = client.request(ready.clone(), &url).send().await {
                        if r.status().is_success() {
                            break;
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                drop(client);

                // Half-sent request held open well past the end of the run.
                let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
                    .await
                    .unwrap();
                stream.write_all(b"GET /slow HTTP/1.1\r\n").await.unwrap();
                tokio::time::sleep(Duration::from_secs(3)).await;
                let _ = stream.write_all(b"Host: x\r\n\r\n").await;
            });

            let report = TestRun::new(config, "sleep")
                .with_args(["1"])
                .run()
                .await
                .unwrap();
            stuck.await.unwrap();

            assert_eq!(report.command, TestCommandResult::exited(0));
            assert!(report.shutdown_error.is_some());
            assert!(!report.is_clean());
            assert_eq!(report.exit_code(), UNMOCKED_EXIT_CODE);
            assert!(report.render_warning().contains("did not shut down cleanly"));
        }
    }
}
