//! Framework configuration.
//!
//! Built once at startup and shared through an `Arc`; nothing reads
//! configuration from globals.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use crate::bundle::BundleId;
use crate::package::Version;
use crate::runtime::Runtime;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "BUNDLEWIRE_CONFIG";

/// A package the platform itself exports.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SystemPackage {
    pub name: String,
    #[serde(default)]
    pub version: Version,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Id of the platform's built-in bundle.
    pub system_bundle: BundleId,
    /// Packages exported by the system bundle.
    pub system_packages: Vec<SystemPackage>,
}

impl Config {
    /// Load configuration.
    ///
    /// Uses `path` when given, otherwise `<config_dir>/bundlewire/config.json`
    /// if it exists, otherwise the defaults.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path),
            None => Self::default_path(runtime).filter(|p| runtime.exists(p)),
        };

        let Some(path) = path else {
            debug!("No config file, using defaults");
            return Ok(Config::default());
        };

        debug!("Loading config from {:?}", path);
        let content = runtime
            .read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn default_path<R: Runtime>(runtime: &R) -> Option<PathBuf> {
        runtime
            .config_dir()
            .map(|dir| dir.join("bundlewire").join("config.json"))
    }
}
