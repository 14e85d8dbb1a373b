//! Store configuration

use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::{DEFAULT_DB_PATH, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS};
use crate::error::Result;

/// Settings for opening an [`LmdbStore`](crate::LmdbStore)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub map_size: usize,
    pub max_dbs: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from(DEFAULT_DB_PATH),
            map_size: DEFAULT_MAP_SIZE,
            max_dbs: DEFAULT_MAX_DBS,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        StoreConfig { path: path.into(), ..Self::default() }
    }

    /// Parse a JSON document; omitted fields take their defaults
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
