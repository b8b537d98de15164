//! Module Resolution
//!
//! The bundler asks a [`ResolveHook`] for every import it meets. The hook
//! either resolves the import to a file, or hands it back with
//! [`Resolution::NotHandled`] so default resolution ([`node`]) can try.
//!
//! All memoised state for one bundling pass lives in a [`BuildContext`] that
//! the bundler threads through each call.

pub mod node;
mod ownership;

pub use ownership::OwnershipResolver;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Outcome of a resolution attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The import lives at this path.
    Resolved(PathBuf),
    /// Not ours to decide; default resolution applies.
    NotHandled,
}

/// Error type for resolution
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{import_id} is imported by both {first} and {second}")]
    AmbiguousOwner {
        import_id: String,
        first: String,
        second: String,
    },
}

/// A pluggable resolution step consulted by the bundler.
pub trait ResolveHook {
    fn resolve_id(
        &self,
        ctx: &mut BuildContext,
        import_id: &str,
        importer: Option<&Path>,
    ) -> Result<Resolution, ResolveError>;
}

/// Workspace locations, found once per build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locations {
    /// Staging root.
    pub workspace: PathBuf,
    /// `<workspace>/<workers-location>`
    pub workers: PathBuf,
}

/// One bound import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRecord {
    pub import_id: String,
    /// Contributor that owns the import. Sideloaded imports have none.
    pub owner: Option<String>,
    pub resolved_path: PathBuf,
}

/// Imports bound during one build, keyed by id and by resolved path.
#[derive(Debug, Default)]
pub struct ResolutionTable {
    by_id: HashMap<String, ResolutionRecord>,
    by_path: HashMap<PathBuf, ResolutionRecord>,
}

impl ResolutionTable {
    pub fn get(&self, import_id: &str) -> Option<&ResolutionRecord> {
        self.by_id.get(import_id)
    }

    /// The record whose resolved file is `path`, if any.
    pub fn by_path(&self, path: &Path) -> Option<&ResolutionRecord> {
        self.by_path.get(path)
    }

    /// Bind `import_id` unless it is already bound.
    ///
    /// The path index is always updated so imports made from `path` can be
    /// sideloaded later. Returns false when the id was already taken.
    pub fn record(
        &mut self,
        import_id: &str,
        owner: Option<String>,
        resolved_path: PathBuf,
    ) -> bool {
        let record = ResolutionRecord {
            import_id: import_id.to_string(),
            owner,
            resolved_path: resolved_path.clone(),
        };

        self.by_path
            .entry(resolved_path)
            .or_insert_with(|| record.clone());

        if self.by_id.contains_key(import_id) {
            return false;
        }
        self.by_id.insert(import_id.to_string(), record);
        true
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Per-build resolver state.
#[derive(Debug, Default)]
pub struct BuildContext {
    pub locations: Option<Locations>,
    pub resolutions: ResolutionTable,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lexically normalise a path: drop `.` and fold `..` into its parent.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/./c/../d.js")),
            PathBuf::from("/a/b/d.js")
        );
        assert_eq!(normalize(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_table_never_rebinds() {
        let mut table = ResolutionTable::default();
        assert!(table.record("rsvp", Some("pkg-a".into()), PathBuf::from("/a/rsvp.js")));
        assert!(!table.record("rsvp", Some("pkg-b".into()), PathBuf::from("/b/rsvp.js")));

        let record = table.get("rsvp").unwrap();
        assert_eq!(record.owner.as_deref(), Some("pkg-a"));
        assert_eq!(record.resolved_path, PathBuf::from("/a/rsvp.js"));

        // The losing path is still indexed for sideloading.
        assert!(table.by_path(Path::new("/b/rsvp.js")).is_some());
        assert_eq!(table.len(), 1);
    }
}
