//! Ownership Resolver
//!
//! Every import made from inside the staging tree belongs to exactly one
//! contributor. The resolver works out which one and where the file lives:
//!
//! 1. Synthetic ids (`\0`-prefixed or without an importer) are not ours.
//! 2. The staging workspace is found by walking up from the first importer
//!    until the workers directory appears, then cached for the build.
//! 3. Importing a contributor by name yields that contributor's entry.
//! 4. Inside contributor P's namespace, a matching file in the namespace
//!    wins; otherwise a bare id is P's external dependency, looked up from
//!    P's own package root and bound to P for the rest of the build.
//! 5. Imports made from a file that was itself bound earlier are resolved
//!    from that file's directory (sideloading), so dependencies of external
//!    dependencies work without being contributors.
//!
//! An id bound to one contributor is never rebound to another. A second
//! claimant is logged and handed to default resolution, or rejected when
//! ownership is strict.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::node;
use super::{normalize, BuildContext, Locations, Resolution, ResolveError, ResolveHook};
use crate::registry::Contributor;

#[derive(Debug, Clone)]
struct Owner {
    name: String,
    /// The name split on `/`, compared against namespace path segments.
    segments: Vec<String>,
    root: PathBuf,
}

/// Resolves imports made from the staging tree
#[derive(Debug, Clone)]
pub struct OwnershipResolver {
    owners: Vec<Owner>,
    workers_location: PathBuf,
    strict: bool,
}

impl OwnershipResolver {
    pub fn new(contributors: &[Contributor], workers_location: impl Into<PathBuf>) -> Self {
        let owners = contributors
            .iter()
            .map(|c| Owner {
                name: c.name.clone(),
                segments: c.name.split('/').map(str::to_string).collect(),
                root: c.root.clone(),
            })
            .collect();

        Self {
            owners,
            workers_location: workers_location.into(),
            strict: false,
        }
    }

    /// Reject competing owners instead of deferring to default resolution.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Workspace locations, seeking them from `importer` on first use.
    fn locate(&self, ctx: &mut BuildContext, importer: &Path) -> Option<Locations> {
        if let Some(locations) = &ctx.locations {
            return Some(locations.clone());
        }

        let origin = importer.parent()?;
        let workspace = origin
            .ancestors()
            .skip(1)
            .find(|dir| dir.join(&self.workers_location).is_dir())?
            .to_path_buf();

        debug!("Worker resolver established workspace at {}", workspace.display());

        let locations = Locations {
            workers: workspace.join(&self.workers_location),
            workspace,
        };
        ctx.locations = Some(locations.clone());
        Some(locations)
    }

    /// The contributor whose namespace contains `importer`.
    ///
    /// With nested scoped names the deepest namespace wins.
    fn owner_of(&self, workers: &Path, importer: &Path) -> Option<&Owner> {
        let relative = importer.strip_prefix(workers).ok()?;
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();

        self.owners
            .iter()
            .filter(|owner| {
                owner.segments.len() < segments.len()
                    && owner
                        .segments
                        .iter()
                        .zip(&segments)
                        .all(|(name, segment)| name == segment)
            })
            .max_by_key(|owner| owner.segments.len())
    }

    /// A contributor imported by name resolves to its entry.
    fn by_name(&self, workers: &Path, import_id: &str) -> Option<PathBuf> {
        let owner = self.owners.iter().find(|owner| owner.name == import_id)?;
        node::resolve_file(&workers.join(&owner.name).join("index"))
    }

    fn resolve_owned(
        &self,
        ctx: &mut BuildContext,
        owner: &Owner,
        workers: &Path,
        import_id: &str,
        importer: &Path,
    ) -> Result<Resolution, ResolveError> {
        let namespace = workers.join(&owner.name);
        let relative = node::is_relative(import_id);

        let base = match (relative, importer.parent()) {
            (true, Some(dir)) => dir,
            _ => namespace.as_path(),
        };
        if let Some(local) = node::resolve_file(&normalize(&base.join(import_id))) {
            if local.starts_with(&namespace) {
                return Ok(Resolution::Resolved(local));
            }
        }

        if relative {
            debug!(
                "{} imported from {} is not inside {}",
                import_id,
                importer.display(),
                owner.name
            );
            return Ok(Resolution::NotHandled);
        }

        if let Some(existing) = ctx.resolutions.get(import_id) {
            if existing.owner.as_deref() != Some(owner.name.as_str()) {
                let first = existing.owner.clone().unwrap_or_else(|| "a dependency".into());
                warn!(
                    "{} is imported by both {} and {}; falling back to default resolution",
                    import_id, first, owner.name
                );
                if self.strict {
                    return Err(ResolveError::AmbiguousOwner {
                        import_id: import_id.to_string(),
                        first,
                        second: owner.name.clone(),
                    });
                }
                return Ok(Resolution::NotHandled);
            }
            return Ok(Resolution::Resolved(existing.resolved_path.clone()));
        }

        match node::resolve(import_id, &owner.root) {
            Some(location) => {
                debug!("{} is being imported by {}", import_id, owner.name);
                ctx.resolutions
                    .record(import_id, Some(owner.name.clone()), location.clone());
                Ok(Resolution::Resolved(location))
            }
            None => {
                debug!(
                    "{} appeared to own {} but it was not found in {}",
                    owner.name,
                    import_id,
                    owner.root.display()
                );
                Ok(Resolution::NotHandled)
            }
        }
    }

    /// Resolve imports made by a previously bound dependency file.
    fn sideload(&self, ctx: &mut BuildContext, import_id: &str, importer: &Path) -> Resolution {
        if ctx.resolutions.by_path(importer).is_none() {
            return Resolution::NotHandled;
        }

        let Some(basedir) = importer.parent() else {
            return Resolution::NotHandled;
        };

        match node::resolve(import_id, basedir) {
            Some(location) => {
                debug!(
                    "Sideloaded {} from {} to {}",
                    import_id,
                    importer.display(),
                    location.display()
                );
                ctx.resolutions.record(import_id, None, location.clone());
                Resolution::Resolved(location)
            }
            None => Resolution::NotHandled,
        }
    }
}

impl ResolveHook for OwnershipResolver {
    fn resolve_id(
        &self,
        ctx: &mut BuildContext,
        import_id: &str,
        importer: Option<&Path>,
    ) -> Result<Resolution, ResolveError> {
        let Some(importer) = importer else {
            return Ok(Resolution::NotHandled);
        };
        if import_id.contains('\0') {
            return Ok(Resolution::NotHandled);
        }

        let importer = normalize(importer);

        if let Some(locations) = self.locate(ctx, &importer) {
            if let Some(entry) = self.by_name(&locations.workers, import_id) {
                return Ok(Resolution::Resolved(entry));
            }

            if let Some(owner) = self.owner_of(&locations.workers, &importer) {
                return self.resolve_owned(ctx, owner, &locations.workers, import_id, &importer);
            }
        }

        Ok(self.sideload(ctx, import_id, &importer))
    }
}
