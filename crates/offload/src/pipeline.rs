//! Build pipeline
//!
//! discover → aggregate → compile → write, for one project directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use offload_worker::{WorkerFactory, WorkerSessions};

use tracing::{info, warn};

use crate::aggregate::{aggregate, check_staging, AggregateError};
use crate::bundle::{compile, BundleError, BundleOptions};
use crate::config::{OffloadConfig, WORKER_FILENAME};
use crate::host::{self, HOST_DIR};
use crate::output::{is_fingerprint_excluded, worker_location, write_artifact};
use crate::registry::{
    scan_installed, Contributor, DiscoveryInput, PackageDescriptor, Registry, RegistryError,
};
use crate::resolve::OwnershipResolver;

/// Development harness location, relative to the project root.
pub const HARNESS_DIR: &str = "tests/dummy";

/// Error type for a build
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Failed to write worker bundle: {0}")]
    Write(#[from] std::io::Error),
}

/// What a build produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Contributor names in bundle order.
    pub contributors: Vec<String>,
    pub artifact: PathBuf,
    /// URL the runtime loads the artifact from.
    pub location: String,
    pub modules: usize,
    pub bytes: usize,
    /// Whether the artifact is shielded from asset fingerprinting.
    pub fingerprint_excluded: bool,
}

/// Gather the packages visible to a build of `project_root`.
pub fn discovery_input(
    project_root: &Path,
    config: &OffloadConfig,
) -> Result<DiscoveryInput, BuildError> {
    let project = PackageDescriptor::load(project_root)?;
    let installed = scan_installed(&project);
    let host = host::materialize(&project_root.join(HOST_DIR), &config.workers_location)?;

    let harness_root = project_root.join(HARNESS_DIR);
    let harness = harness_root
        .is_dir()
        .then(|| project.harness(harness_root));

    Ok(DiscoveryInput {
        installed,
        host,
        project,
        harness,
    })
}

/// Contributors for a build of `project_root`, in bundle order.
pub fn discover(project_root: &Path, config: &OffloadConfig) -> Result<Vec<Contributor>, BuildError> {
    let input = discovery_input(project_root, config)?;
    let registry = Registry::new(&config.marker_keyword, &config.workers_location);
    Ok(registry.discover(&input))
}

/// Build the worker bundle. Returns `None` when the build is disabled.
pub fn build(
    project_root: &Path,
    config: &OffloadConfig,
) -> Result<Option<BuildReport>, BuildError> {
    if !config.enabled {
        info!("Worker bundle disabled, skipping build");
        return Ok(None);
    }

    let staging_root = config.staging_root(project_root);
    let output_root = config.output_root(project_root);
    check_staging(&staging_root, [project_root, output_root.as_path()])?;

    let contributors = discover(project_root, config)?;
    let tree = aggregate(&contributors, &staging_root, &config.workers_location)?;

    let resolver = OwnershipResolver::new(&contributors, &config.workers_location)
        .strict(config.strict_ownership);
    let options = BundleOptions {
        minify: config.minify,
        transpile: config.transpile.clone(),
    };
    let artifact = compile(&tree, &resolver, &options)?;
    let path = write_artifact(&artifact, &output_root, &config.workers_location)?;

    let fingerprint_excluded =
        is_fingerprint_excluded(config, &config.workers_location.join(WORKER_FILENAME));
    if !fingerprint_excluded {
        warn!(
            "{} is not excluded from fingerprinting; the runtime will not find it once renamed",
            path.display()
        );
    }

    Ok(Some(BuildReport {
        contributors: contributors.into_iter().map(|c| c.name).collect(),
        artifact: path,
        location: worker_location(&config.root_url, &config.workers_location),
        modules: artifact.modules.len(),
        bytes: artifact.code.len(),
        fingerprint_excluded,
    }))
}

/// Extra time the host waits past the worker's own request timeout.
pub const REPLY_GRACE: Duration = Duration::from_secs(1);

/// Session service for the bundle a build of `config` produces.
///
/// The request timeout is sent to the worker as `config.timeout`, where the
/// runtime races the handler against it and answers `{}` on expiry. The host
/// waits [`REPLY_GRACE`] longer, so its own timeout only fires for a worker
/// that stopped responding.
pub fn sessions(config: &OffloadConfig, factory: Arc<dyn WorkerFactory>) -> WorkerSessions {
    let location = worker_location(&config.root_url, &config.workers_location);
    let sessions = WorkerSessions::new(factory, location)
        .with_timeout(config.request_timeout().map(|limit| limit + REPLY_GRACE));
    match config.request_timeout_ms {
        0 => sessions,
        ms => sessions.with_config_value("timeout", serde_json::json!(ms)),
    }
}
