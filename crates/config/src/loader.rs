use std::path::Path;

use crate::{ConfigSnapshot, error::Error};

/// Load a `ConfigSnapshot` from a TOML file on disk.
pub fn load<P: AsRef<Path>>(path: P) -> Result<ConfigSnapshot, Error> {
    let raw = std::fs::read_to_string(path)?;
    let snapshot = toml::from_str(&raw)?;
    Ok(snapshot)
}
