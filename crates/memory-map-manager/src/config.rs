//! Generator configuration.
//!
//! The configuration file (`main.yaml` by default) lists the description
//! files to merge and the directories to generate into. It is loaded with
//! figment, so output directories and conflict handling can also be set
//! through `MMM_` environment variables.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::importer::ConflictPolicy;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "main.yaml";

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "MMM_";

/// Keys that may be set from the environment.
const ENV_KEYS: [&str; 5] = [
    "c_dir",
    "csv_dir",
    "cfg_dir",
    "prompt_conflicts",
    "overwrite_conflicts",
];

/// Generator configuration.
///
/// Relative paths are resolved against `base_dir` by [`load_from`](Self::load_from).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Map description files, merged in order.
    pub files: Vec<PathBuf>,
    /// Directory relative paths are resolved against.
    /// Defaults to the directory of the configuration file.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Directory for C sources.
    #[serde(default)]
    pub c_dir: Option<PathBuf>,
    /// Directory for CSV documentation.
    #[serde(default)]
    pub csv_dir: Option<PathBuf>,
    /// Directory for configuration snapshots.
    #[serde(default)]
    pub cfg_dir: Option<PathBuf>,
    /// Ask on the terminal whether to overwrite conflicting keys.
    #[serde(default)]
    pub prompt_conflicts: bool,
    /// Let later files win conflicts, or make that the default answer.
    #[serde(default)]
    pub overwrite_conflicts: bool,
}

/// Join `path` to `base` unless it is absolute; `.` is `base` itself.
fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else if path == Path::new(".") {
        base.to_path_buf()
    } else {
        base.join(path)
    }
}

impl GeneratorConfig {
    /// Load the configuration from a YAML file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, cannot be parsed, has
    /// unknown keys or fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).only(&ENV_KEYS));
        let mut config: Self = figment.extract()?;

        let config_dir = path
            .canonicalize()?
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.rebase(&config_dir);
        config.validate()?;
        debug!(
            base_dir = ?config.base_dir,
            files = config.files.len(),
            "Loaded generator configuration"
        );
        Ok(config)
    }

    /// Resolve every relative path against `base_dir`, defaulting it to
    /// `config_dir`.
    pub fn rebase(&mut self, config_dir: &Path) {
        let base = self
            .base_dir
            .as_deref()
            .map_or_else(|| config_dir.to_path_buf(), |b| rebase(config_dir, b));
        for file in &mut self.files {
            *file = rebase(&base, file);
        }
        for dir in [&mut self.c_dir, &mut self.csv_dir, &mut self.cfg_dir]
            .into_iter()
            .flatten()
        {
            *dir = rebase(&base, dir);
        }
        self.base_dir = Some(base);
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no description file is listed.
    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::ConfigValidation {
                message: "files must list at least one map description".to_string(),
            });
        }
        Ok(())
    }

    /// How the importer handles conflicting keys.
    #[must_use]
    pub fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy {
            prompt: self.prompt_conflicts,
            overwrite: self.overwrite_conflicts,
        }
    }

    /// Check if any output directory is configured.
    #[must_use]
    pub fn has_outputs(&self) -> bool {
        self.c_dir.is_some() || self.csv_dir.is_some() || self.cfg_dir.is_some()
    }
}
