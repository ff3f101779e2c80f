use std::path::PathBuf;
use std::sync::Arc;

use tripwire_guard::{InterceptionServer, ReadinessGate, RequestRecorder};
use tripwire_settings::ConfigLoader;

use super::{build_guard_config, load_config};
use crate::cli::CheckArgs;
use crate::error::CliError;

pub async fn check(args: CheckArgs, cwd: PathBuf) -> Result<(), CliError> {
    let mut all_ok = true;

    let mut config = load_config(&args.source, &cwd)?;
    if let Some(port) = args.port {
        config.guard.port = Some(port);
    }
    let guard_config = build_guard_config(&config.guard);

    // 1. Guard smoke-test: bind, handshake, stop.
    print!("Guard ({}): ", guard_config.bind_addr);
    let recorder = Arc::new(RequestRecorder::new());
    match InterceptionServer::new(guard_config, Arc::clone(&recorder), ReadinessGate::new()) {
        Ok(server) => match server.start().await {
            Ok(mut handle) => {
                let ready = handle.wait_ready().await;
                let stopped = handle.stop().await;
                match (ready, stopped) {
                    (Ok(()), Ok(())) => println!("OK"),
                    (Err(e), _) | (_, Err(e)) => {
                        println!("FAIL ({e})");
                        all_ok = false;
                    }
                }
            }
            Err(e) => {
                println!("FAIL (start: {e})");
                all_ok = false;
            }
        },
        Err(e) => {
            println!("FAIL (init: {e})");
            all_ok = false;
        }
    }
    if !recorder.is_empty() {
        // Something else on this machine hit the port during the check.
        println!("Stray requests during check: {}", recorder.total());
    }

    // 2. Runner
    let runner_args = config.runner.args();
    if runner_args.is_empty() {
        println!("Test runner: {}", config.runner.program());
    } else {
        println!(
            "Test runner: {} {}",
            config.runner.program(),
            runner_args.join(" ")
        );
    }

    // 3. Config files
    let global_path = ConfigLoader::global_config_path();
    let project_path = ConfigLoader::project_config_path(&cwd);

    println!("\nConfig files:");
    if let Some(ref path) = global_path {
        let status = if path.exists() { "found" } else { "not found" };
        println!("  {} ({})", path.display(), status);
    } else {
        println!("  global: n/a (config directory not available)");
    }
    let status = if project_path.exists() { "found" } else { "not found" };
    println!("  {} ({})", project_path.display(), status);

    if !all_ok {
        return Err(CliError::Other("One or more checks failed".to_string()));
    }

    Ok(())
}
