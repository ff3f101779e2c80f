pub mod check;
pub mod config;
pub mod run;

use std::path::Path;

use tripwire_guard::GuardConfig;
use tripwire_settings::{ConfigLoader, GuardSettings, TripwireConfig};

use crate::cli::ConfigSource;
use crate::error::CliError;

/// Resolve the effective config: global + project files (unless
/// `--no-config`), then `--config <extra>` on top.
fn load_config(source: &ConfigSource, cwd: &Path) -> Result<TripwireConfig, CliError> {
    let mut config = if source.no_config {
        TripwireConfig::default()
    } else {
        ConfigLoader::load(cwd)
    };
    if let Some(ref extra) = source.extra_config {
        let extra_cfg = TripwireConfig::load(extra)?;
        config = config.merge(extra_cfg);
    }
    Ok(config)
}

fn build_guard_config(settings: &GuardSettings) -> GuardConfig {
    GuardConfig {
        bind_addr: settings.bind_addr(),
        handshake_method: settings.handshake_method().to_string(),
        poll_interval: settings.poll_interval(),
        ready_timeout: settings.ready_timeout(),
        shutdown_timeout: settings.shutdown_timeout(),
    }
}
