//! Configuration file resolution and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "GENLOCK_CONFIG";

/// Config file resolution following the priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform config file (first one that exists)
/// 4. None: caller uses compiled defaults
///
/// Explicit paths (1 and 2) are returned even if the file does not exist,
/// so the load reports the missing file instead of silently using defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    default_config_candidates().into_iter().find(|p| p.exists())
}

/// Platform config file locations, most specific first
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("genlock").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/genlock/config.toml"));
    }
    candidates
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    let value = toml::from_str(&content)?;
    debug!("Loaded config file {}", path.display());
    Ok(value)
}

/// Resolve and load a config file, falling back to `T::default()`
///
/// A resolved file that fails to parse is an error; no resolved file at all
/// logs a warning and returns defaults.
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<(T, Option<PathBuf>)> {
    match resolve_config_path(cli_arg, env_var_name) {
        Some(path) => {
            let config = load_toml_file(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            warn!("No config file found, using built-in defaults");
            Ok((T::default(), None))
        }
    }
}
