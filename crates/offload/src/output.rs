//! Artifact placement
//!
//! The compiled worker always lands at `<output>/<workers-location>/worker.js`
//! and is served from the matching URL under the host's root URL. Host asset
//! pipelines must not fingerprint it, since the runtime asks for it by name.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::info;
use wildmatch::WildMatch;

use crate::bundle::Artifact;
use crate::config::{OffloadConfig, WORKER_FILENAME};

/// Where the artifact is written inside `output_root`.
pub fn artifact_path(output_root: &Path, workers_location: &Path) -> PathBuf {
    output_root.join(workers_location).join(WORKER_FILENAME)
}

/// The URL the runtime loads the artifact from.
pub fn worker_location(root_url: &str, workers_location: &Path) -> String {
    let mut segments: Vec<String> = root_url
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    segments.extend(slash_separated(workers_location).split('/').map(str::to_string));
    segments.push(WORKER_FILENAME.to_string());

    format!("/{}", segments.join("/"))
}

/// Write `artifact` into the output tree, returning its path.
pub fn write_artifact(
    artifact: &Artifact,
    output_root: &Path,
    workers_location: &Path,
) -> std::io::Result<PathBuf> {
    let path = artifact_path(output_root, workers_location);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &artifact.code)?;

    info!("Wrote worker bundle to {}", path.display());
    Ok(path)
}

/// Glob rules for paths that must keep their names.
#[derive(Debug, Clone)]
pub struct FingerprintRules {
    patterns: Vec<WildMatch>,
}

impl FingerprintRules {
    /// Build rules from `**`-style globs.
    ///
    /// `**/` matches any number of directories, including none.
    pub fn new<S: AsRef<str>>(globs: &[S]) -> Self {
        let patterns = globs
            .iter()
            .map(|glob| {
                let pattern = glob.as_ref().replace("**/", "*").replace("**", "*");
                WildMatch::new(&pattern)
            })
            .collect();
        Self { patterns }
    }

    /// Whether `path`, relative to the output root, is excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = slash_separated(path);
        self.patterns.iter().any(|pattern| pattern.matches(&path))
    }
}

/// Whether `path`, relative to the output root, keeps its name under `config`.
pub fn is_fingerprint_excluded(config: &OffloadConfig, path: &Path) -> bool {
    FingerprintRules::new(&config.fingerprint_exclude).is_excluded(path)
}

fn slash_separated(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
