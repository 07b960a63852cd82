//! Reading [`PeerConfig`] from a TOML file on disk.

use std::path::Path;

use crate::domain::{ConfigError, PeerConfig};

/// Loads the config file at `path`.
///
/// Unlike a missing key, a missing file is an error: the caller named it
/// explicitly.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// its TOML is malformed.
pub fn load_config(path: &Path) -> Result<PeerConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    PeerConfig::from_toml_str(&text)
}
