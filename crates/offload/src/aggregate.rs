//! Source Aggregator
//!
//! Copies every contributor's worker source into its own namespace under a
//! shared staging root and writes the synthetic entry that imports each
//! contributor by name:
//!
//! ```text
//! <staging>/workers/background-adapters/
//! ├── index.js            <- generated, one import per contributor
//! ├── pkg-a/
//! │   └── index.js
//! └── pkg-b/
//!     ├── index.js
//!     └── nested/util.js
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::registry::Contributor;
use crate::resolve::normalize;

/// File name of the synthetic entry inside the workers directory.
pub const ENTRY_FILENAME: &str = "index.js";

const SYNTHETIC_ENTRY: &str = "<synthetic entry>";

/// Error type for staging
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Staging destination {dest} is claimed by both {first} and {second}")]
    Collision {
        dest: PathBuf,
        first: String,
        second: String,
    },

    #[error("Contributor name cannot be used as a namespace: {0}")]
    InvalidName(String),

    #[error("Refusing to stage into {staging}: it would overwrite {protected}")]
    UnsafeStaging { staging: PathBuf, protected: PathBuf },

    #[error("Failed to stage worker source: {0}")]
    Io(#[from] std::io::Error),
}

/// Where one contributor's worker source went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingEntry {
    pub contributor: String,
    pub source: PathBuf,
    pub namespace: PathBuf,
}

/// The merged staging tree for one build.
#[derive(Debug, Clone)]
pub struct StagingTree {
    pub root: PathBuf,
    /// `<root>/<workers-location>`
    pub workers: PathBuf,
    /// The synthetic entry file.
    pub entry: PathBuf,
    pub entries: Vec<StagingEntry>,
    /// Every file written, in write order.
    pub files: Vec<PathBuf>,
}

/// Render the synthetic entry: one import per contributor, in order.
pub fn entry_source(contributors: &[Contributor]) -> String {
    contributors
        .iter()
        .map(|c| {
            let specifier =
                serde_json::to_string(&c.name).unwrap_or_else(|_| format!("\"{}\"", c.name));
            format!("import {};", specifier)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reject a staging root that is, or contains, any of `protected`.
pub fn check_staging<'a>(
    staging_root: &Path,
    protected: impl IntoIterator<Item = &'a Path>,
) -> Result<(), AggregateError> {
    let staging = absolute(staging_root);
    for path in protected {
        if absolute(path).starts_with(&staging) {
            return Err(AggregateError::UnsafeStaging {
                staging: staging_root.to_path_buf(),
                protected: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    normalize(&std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// Stage all contributors under `staging_root`.
///
/// The staged workers directory is cleared first; nothing else under the
/// staging root is touched. Every destination is planned before anything is
/// written, so a collision leaves nothing half-copied.
pub fn aggregate(
    contributors: &[Contributor],
    staging_root: &Path,
    workers_location: &Path,
) -> Result<StagingTree, AggregateError> {
    check_staging(
        staging_root,
        contributors.iter().map(|c| c.root.as_path()),
    )?;

    let workers = staging_root.join(workers_location);
    let entry = workers.join(ENTRY_FILENAME);

    let mut claimed: HashMap<PathBuf, String> = HashMap::new();
    let mut copies: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut entries = Vec::new();

    for contributor in contributors {
        let namespace = workers.join(namespace_for(&contributor.name)?);

        for relative in collect_files(&contributor.source)? {
            let dest = namespace.join(&relative);
            claim(&mut claimed, &dest, &contributor.name)?;
            copies.push((contributor.source.join(&relative), dest));
        }

        debug!(
            "Staging {} from {} into {}",
            contributor.name,
            contributor.source.display(),
            namespace.display()
        );

        entries.push(StagingEntry {
            contributor: contributor.name.clone(),
            source: contributor.source.clone(),
            namespace,
        });
    }

    claim(&mut claimed, &entry, SYNTHETIC_ENTRY)?;

    if workers.exists() {
        fs::remove_dir_all(&workers)?;
    }

    let mut files = Vec::with_capacity(copies.len() + 1);
    for (from, to) in copies {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&from, &to)?;
        files.push(to);
    }

    fs::create_dir_all(&workers)?;
    fs::write(&entry, entry_source(contributors))?;
    files.push(entry.clone());

    info!(
        "Staged {} files from {} contributors at {}",
        files.len(),
        entries.len(),
        staging_root.display()
    );

    Ok(StagingTree {
        root: staging_root.to_path_buf(),
        workers,
        entry,
        entries,
        files,
    })
}

fn claim(
    claimed: &mut HashMap<PathBuf, String>,
    dest: &Path,
    owner: &str,
) -> Result<(), AggregateError> {
    if let Some(first) = claimed.get(dest) {
        return Err(AggregateError::Collision {
            dest: dest.to_path_buf(),
            first: first.clone(),
            second: owner.to_string(),
        });
    }
    claimed.insert(dest.to_path_buf(), owner.to_string());
    Ok(())
}

/// Package names become relative paths; scoped names nest one level.
fn namespace_for(name: &str) -> Result<PathBuf, AggregateError> {
    let path = PathBuf::from(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if valid {
        Ok(path)
    } else {
        Err(AggregateError::InvalidName(name.to_string()))
    }
}

/// Files under `dir`, relative to it, in a stable order.
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(relative) = pending.pop() {
        let mut children: Vec<_> = fs::read_dir(dir.join(&relative))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|entry| entry.path())
            .collect();
        children.sort();

        // Reverse so directories are walked in sorted order off the stack.
        for child in children.into_iter().rev() {
            let Some(name) = child.file_name() else {
                continue;
            };
            let child_relative = relative.join(name);
            if child.is_dir() {
                pending.push(child_relative);
            } else {
                files.push(child_relative);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WORKERS_LOCATION;
    use tempfile::TempDir;

    fn contributor(base: &Path, name: &str, files: &[(&str, &str)]) -> Contributor {
        let root = base.join("packages").join(name);
        let source = root.join(WORKERS_LOCATION);
        for (path, content) in files {
            let file = source.join(path);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        Contributor {
            name: name.to_string(),
            entry: source.join("index.js"),
            root,
            source,
        }
    }

    #[test]
    fn test_entry_source_one_import_per_contributor() {
        let temp = TempDir::new().unwrap();
        let a = contributor(temp.path(), "pkg-a", &[("index.js", "")]);
        let b = contributor(temp.path(), "@scope/pkg-b", &[("index.js", "")]);

        let source = entry_source(&[a, b]);
        assert_eq!(source, "import \"pkg-a\";\nimport \"@scope/pkg-b\";");
    }

    #[test]
    fn test_aggregate_namespaces_sources() {
        let temp = TempDir::new().unwrap();
        let a = contributor(
            temp.path(),
            "pkg-a",
            &[("index.js", "import './nested/util';"), ("nested/util.js", "")],
        );
        let b = contributor(temp.path(), "@scope/pkg-b", &[("index.js", "")]);
        let staging = temp.path().join("staging");

        let tree = aggregate(&[a, b], &staging, Path::new(WORKERS_LOCATION)).unwrap();

        let workers = staging.join(WORKERS_LOCATION);
        assert_eq!(tree.entry, workers.join("index.js"));
        assert!(workers.join("pkg-a/index.js").is_file());
        assert!(workers.join("pkg-a/nested/util.js").is_file());
        assert!(workers.join("@scope/pkg-b/index.js").is_file());
        assert_eq!(tree.entries.len(), 2);
        assert_eq!(tree.files.len(), 4);
        assert_eq!(
            fs::read_to_string(&tree.entry).unwrap(),
            "import \"pkg-a\";\nimport \"@scope/pkg-b\";"
        );
    }

    #[test]
    fn test_aggregate_clears_stale_staging() {
        let temp = TempDir::new().unwrap();
        let a = contributor(temp.path(), "pkg-a", &[("index.js", "")]);
        let staging = temp.path().join("staging");
        let stale = staging.join(WORKERS_LOCATION).join("gone/index.js");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "").unwrap();

        aggregate(&[a], &staging, Path::new(WORKERS_LOCATION)).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_aggregate_rejects_colliding_destinations() {
        let temp = TempDir::new().unwrap();
        // `@scope` ships `pkg/index.js`, which is exactly where `@scope/pkg` lands.
        let outer = contributor(
            temp.path(),
            "@scope",
            &[("index.js", ""), ("pkg/index.js", "")],
        );
        let inner = contributor(temp.path(), "@scope/pkg", &[("index.js", "")]);
        let staging = temp.path().join("staging");

        let err = aggregate(&[outer, inner], &staging, Path::new(WORKERS_LOCATION)).unwrap_err();
        match err {
            AggregateError::Collision { first, second, .. } => {
                assert_eq!(first, "@scope");
                assert_eq!(second, "@scope/pkg");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!staging.exists());
    }

    #[test]
    fn test_aggregate_refuses_staging_over_a_contributor() {
        let temp = TempDir::new().unwrap();
        let a = contributor(temp.path(), "pkg-a", &[("index.js", "keep")]);

        for staging in [temp.path().to_path_buf(), a.root.clone(), temp.path().join("packages/..")] {
            let err = aggregate(std::slice::from_ref(&a), &staging, Path::new(WORKERS_LOCATION))
                .unwrap_err();
            assert!(matches!(err, AggregateError::UnsafeStaging { .. }), "{}", staging.display());
        }
        assert_eq!(fs::read_to_string(&a.entry).unwrap(), "keep");
    }

    #[test]
    fn test_aggregate_leaves_rest_of_staging_root_alone() {
        let temp = TempDir::new().unwrap();
        let a = contributor(temp.path(), "pkg-a", &[("index.js", "")]);
        let staging = temp.path().join("staging");
        let neighbour = staging.join("notes.txt");
        fs::create_dir_all(&staging).unwrap();
        fs::write(&neighbour, "").unwrap();

        aggregate(&[a], &staging, Path::new(WORKERS_LOCATION)).unwrap();
        assert!(neighbour.exists());
    }

    #[test]
    fn test_aggregate_rejects_escaping_names() {
        let temp = TempDir::new().unwrap();
        let mut evil = contributor(temp.path(), "evil", &[("index.js", "")]);
        evil.name = "../evil".to_string();

        let err = aggregate(&[evil], &temp.path().join("staging"), Path::new(WORKERS_LOCATION))
            .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidName(_)));
    }
}
