//! Configuration loading for the dbclone CLI.
//!
//! Handles loading configuration from a JSON file in the home directory.

use std::path::Path;

use dbclone::DbcloneOptions;
use tracing::warn;

const CONFIG_FILE_JSON: &str = "config.json";

/// Load DbcloneOptions from configuration files in the given home directory.
///
/// Returns options with defaults if no config file is found. The home
/// directory from the command line always wins over the file.
pub fn load_config(home_dir: &Path) -> DbcloneOptions {
    let mut options = DbcloneOptions {
        home_dir: home_dir.to_path_buf(),
        ..DbcloneOptions::default()
    };

    if let Some(config) = try_load_json(home_dir) {
        options.orchestrator = config.orchestrator;
    }

    options
}

fn try_load_json(home_dir: &Path) -> Option<DbcloneOptions> {
    let config_path = home_dir.join(CONFIG_FILE_JSON);
    if !config_path.exists() {
        return None;
    }

    let content = match std::fs::read_to_string(&config_path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            );
            return None;
        }
    };

    match serde_json::from_str::<DbcloneOptions>(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            warn!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            );
            None
        }
    }
}
