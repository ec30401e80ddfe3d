//! Global configuration loader for Switchboard.
//!
//! Reads `config.toml` from the data directory (`~/.switchboard/` in
//! production) and deserializes it into [`GlobalConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use switchboard_types::config::GlobalConfig;

const DATA_DIR_ENV: &str = "SWITCHBOARD_DATA_DIR";
const DATABASE_URL_ENV: &str = "SWITCHBOARD_DATABASE_URL";

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or unparsable file: a warning, then the default.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `SWITCHBOARD_DATA_DIR`
/// 2. `~/.switchboard`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".switchboard");
    }
    PathBuf::from(".switchboard")
}

/// `SWITCHBOARD_DATABASE_URL`, or `sqlite://{data_dir}/switchboard.db`.
pub fn database_url(data_dir: &Path) -> String {
    std::env::var(DATABASE_URL_ENV).unwrap_or_else(|_| sqlite_url(data_dir))
}

fn sqlite_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("switchboard.db").display())
}
