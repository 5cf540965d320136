//! Configuration file resolution and TOML loading
//!
//! Every Pantry engine resolves its config file in the same priority order:
//! 1. Explicit path (highest priority, e.g. passed by the host application)
//! 2. Environment variable naming a file
//! 3. Platform config directory (`<config_dir>/pantry/<file_name>`)
//! 4. None: the caller falls back to compiled defaults
//!
//! A missing file is never fatal. A file that exists but does not parse is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "pantry";

/// Resolve which config file to read, if any.
///
/// An explicit path or environment path is returned even when it does not
/// exist so that [`load_toml_or_default`] can warn about it.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: explicit path
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    let platform_path = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(file_name))?;
    if platform_path.exists() {
        Some(platform_path)
    } else {
        debug!(path = %platform_path.display(), "No platform config file");
        None
    }
}

/// Parse a TOML file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse {}: {}", path.display(), e))
    })
}

/// Load `T` from `path`, falling back to `T::default()` when there is no file.
///
/// - `None` or a path that does not exist: warn (for explicit paths) and use defaults
/// - Existing file that fails to parse: `Error::Config`
pub fn load_toml_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using compiled defaults"
        );
        return Ok(T::default());
    }

    debug!(path = %path.display(), "Loading config file");
    load_toml(path)
}

/// Read an environment variable and parse it, ignoring (with a warning) values that don't parse
pub fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
