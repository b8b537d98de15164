//! Build Configuration
//!
//! Settings are layered the same way for every command: built-in defaults,
//! then `offload.toml` in the project directory, then `OFFLOAD_*` environment
//! variables (`OFFLOAD_TRANSPILE__STRICT=false` reaches nested tables).

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::bundle::TranspileOptions;

/// Directory (relative to a package root) holding a plugin's worker source.
pub const WORKERS_LOCATION: &str = "workers/background-adapters";

/// File name of the compiled worker inside the output tree.
pub const WORKER_FILENAME: &str = "worker.js";

/// Package keyword marking a plugin that contributes worker source.
pub const PLUGIN_KEYWORD: &str = "offload-worker-plugin";

/// Project-level configuration file.
pub const CONFIG_FILE: &str = "offload.toml";

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),
}

/// Worker bundle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// When false, `build` leaves the output tree untouched.
    pub enabled: bool,
    /// Minify the compiled worker.
    pub minify: bool,
    /// Public URL prefix the output tree is served under.
    pub root_url: String,
    /// Keyword that marks a contributing package.
    pub marker_keyword: String,
    /// Worker source directory, relative to each package root.
    pub workers_location: PathBuf,
    /// Staging directory, relative to the project root.
    pub staging_dir: PathBuf,
    /// Build output directory, relative to the project root.
    pub output_dir: PathBuf,
    /// Fail the build when two contributors claim the same import.
    pub strict_ownership: bool,
    /// Upper bound for each worker reply, in milliseconds. 0 waits forever.
    pub request_timeout_ms: u64,
    /// Output paths the host's fingerprinting pass must leave alone.
    pub fingerprint_exclude: Vec<String>,
    /// Options handed to the transpiler.
    pub transpile: TranspileOptions,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minify: false,
            root_url: "/".to_string(),
            marker_keyword: PLUGIN_KEYWORD.to_string(),
            workers_location: PathBuf::from(WORKERS_LOCATION),
            staging_dir: PathBuf::from(".offload/staging"),
            output_dir: PathBuf::from("dist"),
            strict_ownership: false,
            request_timeout_ms: 30_000,
            fingerprint_exclude: vec![format!("**/{}/**/*.js", WORKERS_LOCATION)],
            transpile: TranspileOptions::default(),
        }
    }
}

impl OffloadConfig {
    /// Load configuration for the project at `project_root`.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::figment(project_root.as_ref())
            .extract()
            .map_err(|e| ConfigError::Invalid(Box::new(e)))
    }

    /// The provider stack, exposed so callers can merge overrides on top.
    pub fn figment(project_root: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(project_root.join(CONFIG_FILE)))
            .merge(Env::prefixed("OFFLOAD_").split("__"))
    }

    /// Staging root for a project.
    pub fn staging_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.staging_dir)
    }

    /// Output root for a project.
    pub fn output_root(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.output_dir)
    }

    /// Worker reply timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<std::time::Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = OffloadConfig::load(dir.path()).unwrap();

        assert!(config.enabled);
        assert!(!config.minify);
        assert_eq!(config.workers_location, PathBuf::from(WORKERS_LOCATION));
        assert_eq!(config.marker_keyword, PLUGIN_KEYWORD);
        assert_eq!(
            config.request_timeout(),
            Some(std::time::Duration::from_secs(30))
        );
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"
minify = true
root_url = "/app/"
request_timeout_ms = 0

[transpile]
polyfill = true
"#,
        )
        .unwrap();

        let config = OffloadConfig::load(dir.path()).unwrap();
        assert!(config.minify);
        assert_eq!(config.root_url, "/app/");
        assert_eq!(config.request_timeout(), None);
        assert!(config.transpile.polyfill);
        assert!(config.transpile.strict);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "minify = \"sometimes\"").unwrap();

        assert!(OffloadConfig::load(dir.path()).is_err());
    }
}
