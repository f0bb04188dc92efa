//! Environment-driven configuration, matching the handful of variables the
//! update engine actually reads.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

const DEFAULT_ROOT: &str = ".teerank";
const DEFAULT_UPDATE_DELAY: u32 = 5;

/// Resolved configuration for one run of the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding the sqlite database (`TEERANK_ROOT`).
    pub root: PathBuf,
    /// Enables debug-level logging (`TEERANK_VERBOSE`).
    pub verbose: bool,
    /// Parsed and range-checked for parity with the reference tool, but
    /// unused by this engine: pacing here is schedule-driven, not a fixed
    /// delay. Only the presentation layer reads this value.
    pub update_delay: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = match env::var("TEERANK_ROOT") {
            Ok(v) if !v.is_empty() => PathBuf::from(v),
            _ => PathBuf::from(DEFAULT_ROOT),
        };

        let verbose = match env::var("TEERANK_VERBOSE") {
            Ok(v) => v != "0" && !v.is_empty(),
            Err(_) => false,
        };

        let update_delay = match env::var("TEERANK_UPDATE_DELAY") {
            Ok(v) => v
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidUpdateDelay(v.clone()))?,
            Err(_) => DEFAULT_UPDATE_DELAY,
        };

        if !(1..=20).contains(&update_delay) {
            return Err(ConfigError::UpdateDelayOutOfRange(update_delay));
        }

        Ok(Config {
            root,
            verbose,
            update_delay,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join("teerank.db")
    }
}
