//! # Application configuration
//! Loading of the two YAML configuration files: `application.yml` holds
//! run-wide settings, `converters.yml` holds the recipe registry (see
//! [`Registry`](crate::recipe::Registry)).
use std::{
    fs::read_to_string,
    io,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    logger::{debug, info},
    recipe::Registry,
};

pub const APP_CONFIG_FILE: &str = "application.yml";
pub const CONVERTERS_FILE: &str = "converters.yml";

fn default_timeout() -> u64 {
    60
}

fn default_use_siegfried() -> bool {
    true
}

/// A direct representation of `application.yml`.
///
/// Missing file or missing keys fall back to defaults; the recipe registry
/// on the other hand is mandatory.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct AppConfig {
    /// Default wall-clock limit for converter commands, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Retain every original under the destination regardless of recipe.
    #[serde(default)]
    pub keep_original_files: bool,
    /// Identify with the external `sf` tool before falling back to sniffing.
    #[serde(default = "default_use_siegfried")]
    pub use_siegfried: bool,
    /// Python interpreter bundled with LibreOffice, used to start the
    /// office server when a recipe needs `unoconvert`.
    #[serde(default)]
    pub soffice_python: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            keep_original_files: false,
            use_siegfried: default_use_siegfried(),
            soffice_python: None,
        }
    }
}

impl AppConfig {
    /// Load `application.yml` from the config directory, falling back to the
    /// defaults when the file does not exist.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let path = config_dir.join(APP_CONFIG_FILE);
        match read_to_string(&path) {
            Ok(st) => {
                info!("Loading application config at '{}'", path.display());
                let config =
                    serde_yaml::from_str(&st).map_err(|source| ConfigError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                debug!("Using configuration:\n{config:?}");
                Ok(config)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(
                    "No application config at '{}'; using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }
}

/// Load the recipe registry from `converters.yml`. A missing registry is a
/// startup error.
pub fn load_registry(config_dir: &Path) -> Result<Registry, ConfigError> {
    let path = config_dir.join(CONVERTERS_FILE);
    match read_to_string(&path) {
        Ok(st) => {
            info!("Loading converter recipes at '{}'", path.display());
            Registry::from_yaml(&st).map_err(|source| ConfigError::Parse { path, source })
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ConfigError::Missing { path }),
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}
