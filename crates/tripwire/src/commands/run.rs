#[cfg(unix)]
extern crate libc;

use std::io::Write;
use std::path::PathBuf;

use tripwire_guard::{RunReport, TestRun};

use super::{build_guard_config, load_config};
use crate::cli::RunArgs;
use crate::error::CliError;

pub async fn run(args: RunArgs, cwd: PathBuf) -> Result<(), CliError> {
    // 1. Load and merge config, then CLI overrides.
    let mut config = load_config(&args.source, &cwd)?;
    if let Some(port) = args.port {
        config.guard.port = Some(port);
    }

    // 2. Resolve the test command. --runner replaces the configured program
    // together with its base args; pass-through args always go last.
    let (program, base_args) = match args.runner {
        Some(runner) => (runner, Vec::new()),
        None => (
            config.runner.program().to_string(),
            config.runner.args(),
        ),
    };

    let mut test_run = TestRun::new(build_guard_config(&config.guard), program)
        .with_args(base_args)
        .with_args(args.test_args)
        .with_cwd(cwd);
    for entry in config.runner.env.iter().chain(&args.env) {
        let (key, value) = parse_env_entry(entry)?;
        test_run = test_run.with_env(key, value);
    }

    // 3. Run behind the guard and report.
    let report = test_run.run().await?;
    finish(&report)
}

/// Print the verdict and exit with the reconciled code.
fn finish(report: &RunReport) -> Result<(), CliError> {
    if !report.is_clean() {
        let mut stdout = std::io::stdout();
        stdout.write_all(report.render_warning().as_bytes())?;
        stdout.flush()?;
        std::process::exit(report.exit_code());
    }

    // If the test runner was killed by a signal, re-raise that signal so the
    // parent shell / CI system sees the correct termination reason.
    #[cfg(unix)]
    if let Some(signal) = report.command.signal {
        // SAFETY: raise() sends the signal to the calling process.
        // We are on the main thread, past all cleanup, about to exit.
        unsafe { libc::raise(signal) };
    }

    std::process::exit(report.exit_code());
}

fn parse_env_entry(entry: &str) -> Result<(String, String), CliError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(CliError::Other(format!(
            "Invalid environment entry {entry:?}: expected KEY=VALUE"
        ))),
    }
}
