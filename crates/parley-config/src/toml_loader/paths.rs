//! Where the config file lives, and seeding it on first run.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parley_common::ConfigError;
use tracing::{debug, info};

use super::template::default_config_toml;

const APP_DIR: &str = "parley";
const FILE_NAME: &str = "config.toml";

/// `<platform config dir>/parley/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join(APP_DIR).join(FILE_NAME))
}

/// Write the commented template to `path`, creating parent directories.
///
/// An existing file is never overwritten; returns `false` in that case.
pub fn create_default_config(path: &Path) -> Result<bool, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Config already present, not seeding");
            return Ok(false);
        }
        Err(e) => return Err(io_err(e)),
    };
    file.write_all(default_config_toml().as_bytes())
        .map_err(io_err)?;

    info!(path = %path.display(), "Wrote default config");
    Ok(true)
}
