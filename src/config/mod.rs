//! Configuration loading.
//!
//! `.optipod.toml` is looked up next to the working directory first, then in
//! the home directory; missing files fall back to defaults, and CLI flags
//! override whatever was loaded.

pub mod types;

pub use types::Config;

use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".optipod.toml";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Get the global config file path (~/.optipod.toml).
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(CONFIG_FILE_NAME))
}

/// Get the local config file path (cwd/.optipod.toml).
pub fn local_config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE_NAME)
}

/// Load configuration: explicit path, else local, else global, else
/// defaults. An explicit path that fails to read or parse is an error; the
/// implicit lookups fall through silently.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    if let Some(path) = explicit {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        return toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        });
    }

    let local = local_config_path(Path::new("."));
    if local.exists() {
        if let Ok(content) = fs::read_to_string(&local) {
            if let Ok(config) = toml::from_str(&content) {
                return Ok(config);
            }
            log::warn!("ignoring malformed config at {}", local.display());
        }
    }

    if let Some(global) = global_config_path() {
        if global.exists() {
            if let Ok(content) = fs::read_to_string(&global) {
                if let Ok(config) = toml::from_str(&content) {
                    return Ok(config);
                }
                log::warn!("ignoring malformed config at {}", global.display());
            }
        }
    }

    Ok(Config::default())
}
