//! Layered configuration loading.
//!
//! Loads and merges configuration from two locations:
//! 1. Global: `~/.config/tripwire/tripwire.toml`
//! 2. Project: `<workspace>/.tripwire/tripwire.toml`
//!
//! Project values take precedence for scalar fields; list fields are extended
//! so that both global and project entries contribute.

use crate::TripwireConfig;
use std::path::{Path, PathBuf};

/// Loads and merges `TripwireConfig` from global and project-level files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the merged configuration for the given workspace.
    ///
    /// Reads the global config, then the project config, and merges them.
    /// Missing files are silently skipped. Parse errors emit a warning to
    /// stderr and the file is treated as if absent.
    pub fn load(workspace: &Path) -> TripwireConfig {
        let global = Self::global_config_path()
            .map(|path| Self::load_optional(&path))
            .unwrap_or_default();
        let project = Self::load_optional(&Self::project_config_path(workspace));
        global.merge(project)
    }

    /// Absolute path to the global config file, if a config directory exists.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tripwire").join("tripwire.toml"))
    }

    /// Path to the project config file for the given workspace.
    pub fn project_config_path(workspace: &Path) -> PathBuf {
        workspace.join(".tripwire").join("tripwire.toml")
    }

    fn load_optional(path: &Path) -> TripwireConfig {
        if !path.exists() {
            return TripwireConfig::default();
        }
        match TripwireConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                // A malformed config shouldn't block the test run.
                eprintln!("tripwire-settings: warning: failed to parse {path:?}: {err}");
                TripwireConfig::default()
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn write_project_config(dir: &Path, contents: &str) {
        let config_dir = dir.join(".tripwire");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("tripwire.toml"), contents).unwrap();
    }

    #[test]
    fn test_load_project_config_only() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(
            dir.path(),
            "[guard]\nport = 8765\n[runner]\nprogram = \"cargo\"\nargs = [\"test\"]\n",
        );

        let config = ConfigLoader::load(dir.path());
        assert_eq!(config.guard.port(), 8765);
        assert_eq!(config.runner.program(), "cargo");
        assert_eq!(config.runner.args(), vec!["test".to_string()]);
    }

    #[test]
    fn test_project_config_path() {
        let path = ConfigLoader::project_config_path(Path::new("/workspace"));
        assert_eq!(path, PathBuf::from("/workspace/.tripwire/tripwire.toml"));
    }

    #[test]
    fn test_global_config_path_ends_with_tripwire_toml() {
        if let Some(path) = ConfigLoader::global_config_path() {
            assert!(path.ends_with("tripwire/tripwire.toml"));
        }
    }

    #[test]
    fn test_load_malformed_project_config_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write_project_config(dir.path(), "[guard]\nport = 4444\n");
        let with_valid = ConfigLoader::load(dir.path());
        assert_eq!(with_valid.guard.port(), 4444);

        write_project_config(dir.path(), "not valid toml :::");
        // Should not panic; the project layer drops out of the merge.
        let config = ConfigLoader::load(dir.path());
        assert_ne!(config.guard.port, Some(4444));
    }

    #[test]
    fn test_load_merges_global_and_project() {
        let global_dir = tempfile::tempdir().unwrap();
        let global_config_path = global_dir.path().join("tripwire.toml");
        fs::write(
            &global_config_path,
            "[guard]\nport = 1234\n[runner]\nenv = [\"CI=1\"]\n",
        )
        .unwrap();

        let project_dir = tempfile::tempdir().unwrap();
        write_project_config(
            project_dir.path(),
            "[guard]\nhandshake_method = \"PING\"\n[runner]\nenv = [\"NODE_ENV=test\"]\n",
        );

        // Load global manually then merge with project to test merge logic
        let global = TripwireConfig::load(&global_config_path).unwrap();
        let project =
            TripwireConfig::load(&ConfigLoader::project_config_path(project_dir.path())).unwrap();
        let merged = global.merge(project);

        assert_eq!(merged.guard.port(), 1234);
        assert_eq!(merged.guard.handshake_method(), "PING");
        assert_eq!(merged.runner.env, vec!["CI=1", "NODE_ENV=test"]);
    }
}
