//! Plugin Registry
//!
//! Decides which packages contribute worker source to the bundle. A package
//! is a candidate when its manifest carries the marker keyword, or when it is
//! the host package, the top-level project, or the development harness. A
//! candidate becomes a [`Contributor`] only if its worker directory holds
//! exactly one entry point.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

/// Package manifest file name.
pub const MANIFEST_FILE: &str = "package.json";

/// Extensions accepted for a worker entry point.
pub const ENTRY_EXTENSIONS: &[&str] = &["js", "mjs", "cjs"];

/// Error type for package loading
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Package manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read package manifest: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse package manifest: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Package manifest has no name: {0}")]
    MissingName(PathBuf),
}

/// The subset of `package.json` the registry reads.
#[derive(Debug, Deserialize)]
struct PackageManifest {
    name: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    dependencies: serde_json::Map<String, serde_json::Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: serde_json::Map<String, serde_json::Value>,
}

/// A package visible to the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub name: String,
    pub root: PathBuf,
    pub keywords: Vec<String>,
    /// Declared dependency names, `dependencies` first, in manifest order.
    pub dependencies: Vec<String>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            keywords: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Load a package from the manifest in `root`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let root = root.as_ref();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(RegistryError::ManifestNotFound(manifest_path));
        }

        let content = fs::read_to_string(&manifest_path)?;
        let manifest: PackageManifest = serde_json::from_str(&content)?;
        let name = manifest
            .name
            .ok_or_else(|| RegistryError::MissingName(manifest_path.clone()))?;

        let dependencies = manifest
            .dependencies
            .keys()
            .chain(manifest.dev_dependencies.keys())
            .cloned()
            .collect();

        Ok(Self {
            name,
            root: root.to_path_buf(),
            keywords: manifest.keywords,
            dependencies,
        })
    }

    /// Whether the package advertises worker source through `marker`.
    pub fn provides_worker_source(&self, marker: &str) -> bool {
        self.keywords.iter().any(|k| k == marker)
    }

    /// The development harness that builds alongside this package.
    ///
    /// It shares the package manifest but is namespaced as `<name>-dummy`.
    pub fn harness(&self, root: impl Into<PathBuf>) -> Self {
        Self {
            name: format!("{}-dummy", self.name),
            root: root.into(),
            keywords: self.keywords.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

/// A package whose worker source goes into the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contributor {
    pub name: String,
    /// Package root; external imports are looked up from here.
    pub root: PathBuf,
    /// Worker source directory inside the package.
    pub source: PathBuf,
    /// The single entry point inside `source`.
    pub entry: PathBuf,
}

/// Everything the registry looks at for one build.
#[derive(Debug, Clone)]
pub struct DiscoveryInput {
    /// Installed packages, in the order they were reported.
    pub installed: Vec<PackageDescriptor>,
    /// The package providing the worker runtime.
    pub host: PackageDescriptor,
    /// The top-level project being built.
    pub project: PackageDescriptor,
    /// Development harness, when building the host in isolation.
    pub harness: Option<PackageDescriptor>,
}

/// Finds contributors among the packages of a build
#[derive(Debug, Clone)]
pub struct Registry {
    marker: String,
    workers_location: PathBuf,
}

impl Registry {
    pub fn new(marker: impl Into<String>, workers_location: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            workers_location: workers_location.into(),
        }
    }

    /// Discover contributors.
    ///
    /// Order follows `input`: marked installed packages as reported, then the
    /// host, the project and the harness. Packages already seen under the
    /// same name are not considered twice.
    pub fn discover(&self, input: &DiscoveryInput) -> Vec<Contributor> {
        let candidates = input
            .installed
            .iter()
            .filter(|pkg| pkg.provides_worker_source(&self.marker))
            .chain([&input.host, &input.project])
            .chain(input.harness.iter());

        let mut seen = HashSet::new();
        let mut contributors = Vec::new();

        debug!("Assembling list of worker contributors");

        for pkg in candidates {
            if !seen.insert(pkg.name.as_str()) {
                debug!("Package {} already considered, skipping", pkg.name);
                continue;
            }

            if let Some(contributor) = self.contributor(pkg) {
                debug!("Found worker contributor: {}", contributor.name);
                contributors.push(contributor);
            }
        }

        info!("Discovered {} worker contributors", contributors.len());
        contributors
    }

    /// Check a candidate for exactly one worker entry point.
    pub fn contributor(&self, pkg: &PackageDescriptor) -> Option<Contributor> {
        let source = pkg.root.join(&self.workers_location);
        let entries = entry_points(&source);

        if entries.len() != 1 {
            debug!(
                "Skipping {}: expected one index entry at {}, found {}",
                pkg.name,
                source.display(),
                entries.len()
            );
            return None;
        }

        let entry = entries.into_iter().next()?;
        Some(Contributor {
            name: pkg.name.clone(),
            root: pkg.root.clone(),
            source,
            entry,
        })
    }
}

/// Files named `index.<ext>` directly inside `dir`.
fn entry_points(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let stem = path.file_stem().and_then(|s| s.to_str());
            let ext = path.extension().and_then(|s| s.to_str());
            stem == Some("index") && ext.is_some_and(|ext| ENTRY_EXTENSIONS.contains(&ext))
        })
        .collect();
    found.sort();
    found
}

/// Enumerate the project's installed dependencies in declaration order.
///
/// Dependencies that are declared but missing from `node_modules` are
/// skipped with a warning.
pub fn scan_installed(project: &PackageDescriptor) -> Vec<PackageDescriptor> {
    let modules = project.root.join("node_modules");
    let mut installed = Vec::new();

    for name in &project.dependencies {
        let root = modules.join(name);
        match PackageDescriptor::load(&root) {
            Ok(pkg) => installed.push(pkg),
            Err(e) => warn!("Failed to load dependency {}: {}", name, e),
        }
    }

    installed
}
