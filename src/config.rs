//! Application configuration.
//!
//! Precedence, lowest first: built-in defaults, the config file (TOML, or JSON
//! for `.json`), `CONVERGE_*` environment variables, command-line flags. The
//! last two are resolved by clap; see `cli.rs`.

use std::path::{Path, PathBuf};

use converge_reconciler::{ControllerConfig, ManagerConfig, SourceConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Everything the binary needs to start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub manager: ManagerConfig,

    /// Manifest files loaded into the store at startup.
    #[serde(default)]
    pub seeds: Vec<PathBuf>,
}

impl AppConfig {
    /// Load from `path`, or return defaults when no file is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = match path {
            Some(path) => converge_core::config::load_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        self.source.validate()?;
        self.manager.validate()?;
        Ok(())
    }
}
