//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/rsrepeat/rsrepeat.toml`
//! 3. Local config: file given with `--config`
//! 4. Environment variables: `RSREPEAT_*` prefix

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;

/// Raw settings for intermediate parsing (`None` means "not specified, inherit").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub store_path: Option<PathBuf>,
    pub lookup_marker: Option<String>,
    pub max_suffix_attempts: Option<u32>,
    pub create_display_nodes: Option<bool>,
    pub default_suffix: Option<u32>,
    pub calculated_by: Option<String>,
}

/// Unified configuration for rsrepeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Default snapshot file used when `--store` is not given
    pub store_path: Option<PathBuf>,
    /// Display-name marker recognizing legacy lookup variables (empty disables it)
    pub lookup_marker: String,
    /// Upper bound of candidates tried when auto-assigning a suffix
    pub max_suffix_attempts: u32,
    /// Materialize a display node for every duplicated variable
    pub create_display_nodes: bool,
    /// Suffix used when neither metadata, id nor plan provide one
    pub default_suffix: u32,
    /// Actor recorded in `calculatedBy` and audit records
    pub calculated_by: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: None,
            lookup_marker: "Lookup Table".into(),
            max_suffix_attempts: 1000,
            create_display_nodes: false,
            default_suffix: 1,
            calculated_by: "repeater-recalc".into(),
        }
    }
}

/// Get the XDG config directory for rsrepeat.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "rsrepeat").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("rsrepeat.toml"))
}

/// Expand `~`, `$VAR` and `${VAR}`; unresolvable input is returned unchanged.
pub fn expand_env_vars(path: &str) -> String {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Expand shell variables and tilde in path-like fields.
    fn expand_paths(&mut self) {
        if let Some(path) = &self.store_path {
            let expanded = expand_env_vars(path.to_string_lossy().as_ref());
            self.store_path = Some(PathBuf::from(expanded));
        }
    }

    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            store_path: overlay.store_path.clone().or_else(|| self.store_path.clone()),
            lookup_marker: overlay
                .lookup_marker
                .clone()
                .unwrap_or_else(|| self.lookup_marker.clone()),
            max_suffix_attempts: overlay.max_suffix_attempts.unwrap_or(self.max_suffix_attempts),
            create_display_nodes: overlay
                .create_display_nodes
                .unwrap_or(self.create_display_nodes),
            default_suffix: overlay.default_suffix.unwrap_or(self.default_suffix),
            calculated_by: overlay
                .calculated_by
                .clone()
                .unwrap_or_else(|| self.calculated_by.clone()),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local` - Optional config file given on the command line
    pub fn load(local: Option<&Path>) -> Result<Self, ApplicationError> {
        Self::load_from(global_config_path().as_deref(), local)
    }

    /// Load settings from explicit global/local files (missing global is skipped).
    pub fn load_from(global: Option<&Path>, local: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        if let Some(global_path) = global {
            if global_path.exists() {
                let raw = load_raw_settings(global_path)?;
                current = current.merge_with(&raw);
            }
        }

        // An explicitly requested file must exist
        if let Some(local_path) = local {
            let raw = load_raw_settings(local_path)?;
            current = current.merge_with(&raw);
        }

        current = Self::apply_env_overrides(current)?;
        current.expand_paths();
        current.validate()?;

        Ok(current)
    }

    /// Apply RSREPEAT_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        let builder = Config::builder().add_source(
            Environment::with_prefix("RSREPEAT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_err)?;

        if let Ok(val) = config.get_string("store_path") {
            settings.store_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = config.get_string("lookup_marker") {
            settings.lookup_marker = val;
        }
        if let Ok(val) = config.get::<u32>("max_suffix_attempts") {
            settings.max_suffix_attempts = val;
        }
        if let Ok(val) = config.get_bool("create_display_nodes") {
            settings.create_display_nodes = val;
        }
        if let Ok(val) = config.get::<u32>("default_suffix") {
            settings.default_suffix = val;
        }
        if let Ok(val) = config.get_string("calculated_by") {
            settings.calculated_by = val;
        }

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.default_suffix == 0 {
            return Err(ApplicationError::Config {
                message: "default_suffix must be a positive integer".into(),
            });
        }
        if self.max_suffix_attempts == 0 {
            return Err(ApplicationError::Config {
                message: "max_suffix_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# rsrepeat configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/rsrepeat/rsrepeat.toml
#   Local:  file passed with --config
#   Env:    RSREPEAT_* environment variables

# Snapshot file used when --store is not given
# store_path = "~/.local/share/rsrepeat/tree.json"

# Variables whose display name contains this marker are treated as lookup variables
# even without the explicit `lookup` flag. Empty string disables the fallback.
# lookup_marker = "Lookup Table"

# Candidates tried when a suffix collides and a free one must be picked
# max_suffix_attempts = 1000

# Create a companion display node for every duplicated variable
# create_display_nodes = false

# Suffix used when nothing else determines one
# default_suffix = 1

# Actor written to calculatedBy and the audit log
# calculated_by = "repeater-recalc"
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
