//! Command implementations for the Tally CLI

pub mod next_run;
pub mod send;
pub mod serve;
pub mod show;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tally_config::Config;

/// Paths tried when `--config` is not given
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["configs/tally.toml", "tally.toml"];

/// Load the config from `path`, or from the first default path that exists.
///
/// Falls back to built-in defaults, which have no receiver URL and are
/// only useful for inspection commands.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(p) = path {
        return Config::from_file(p)
            .with_context(|| format!("failed to load config from {}", p.display()));
    }

    for p in DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from) {
        if p.exists() {
            return Config::from_file(&p)
                .with_context(|| format!("failed to load config from {}", p.display()));
        }
    }

    Ok(Config::default())
}
