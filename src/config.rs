use std::fs;

use anyhow::Result;
use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::paths::PathCasing;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Where the persisted FSS snapshot is read from and written to.
    pub snapshot: Utf8PathBuf,

    /// When true, `is_initial_scan_performed` always reports false and the
    /// driver re-scans the filesystem every build rather than trusting
    /// accumulated dirty-file tracking.
    pub always_scan_fs: bool,

    pub path_casing: PathCasing,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot: Utf8PathBuf::from("state/fss.bin"),
            always_scan_fs: false,
            path_casing: PathCasing::native_default(),
        }
    }
}

impl Config {
    pub fn load(path: &Utf8PathBuf) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&content)?;
        Ok(cfg)
    }
}
