//! Default resolution, following node's lookup rules with browser-field
//! preference.
//!
//! - `./x`, `../x`, `/x`: joined to the base directory
//! - `pkg`, `@scope/pkg`, `pkg/deep/file`: searched for in `node_modules`
//!   directories from the base directory upwards
//!
//! A file candidate is tried as-is, then with each of [`EXTENSIONS`], then as
//! a directory (`package.json` entry field, then `index`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::normalize;

/// Extensions tried when an import omits one.
pub const EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json"];

/// Manifest fields naming a package entry, in order of preference.
#[derive(Debug, Default, Deserialize)]
struct EntryFields {
    browser: Option<serde_json::Value>,
    module: Option<String>,
    main: Option<String>,
}

/// Whether `specifier` is a path rather than a package name.
pub fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier.starts_with('/')
}

/// Resolve `specifier` as imported from a file in `basedir`.
pub fn resolve(specifier: &str, basedir: &Path) -> Option<PathBuf> {
    if specifier.is_empty() {
        return None;
    }

    if is_relative(specifier) {
        return resolve_path(&basedir.join(specifier));
    }

    resolve_package(specifier, basedir)
}

/// Resolve a file or directory candidate.
pub fn resolve_path(candidate: &Path) -> Option<PathBuf> {
    let candidate = normalize(candidate);
    resolve_file(&candidate).or_else(|| resolve_directory(&candidate))
}

/// `candidate` itself, or `candidate` with one of the known extensions.
pub fn resolve_file(candidate: &Path) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }

    EXTENSIONS
        .iter()
        .map(|ext| with_extension(candidate, ext))
        .find(|path| path.is_file())
}

fn resolve_directory(dir: &Path) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    if let Some(entry) = package_entry(dir) {
        if let Some(path) = resolve_file(&entry).or_else(|| resolve_index(&entry)) {
            return Some(path);
        }
    }

    resolve_index(dir)
}

fn resolve_index(dir: &Path) -> Option<PathBuf> {
    resolve_file(&dir.join("index"))
}

/// The entry named by a package manifest in `dir`, if it names one.
fn package_entry(dir: &Path) -> Option<PathBuf> {
    let content = fs::read_to_string(dir.join("package.json")).ok()?;
    let fields: EntryFields = serde_json::from_str(&content).ok()?;

    // Only the string form of `browser` replaces the entry point.
    let browser = match fields.browser {
        Some(serde_json::Value::String(path)) => Some(path),
        _ => None,
    };

    browser
        .or(fields.module)
        .or(fields.main)
        .map(|entry| normalize(&dir.join(entry)))
}

fn resolve_package(specifier: &str, basedir: &Path) -> Option<PathBuf> {
    let (name, subpath) = split_package(specifier)?;

    for dir in basedir.ancestors() {
        if dir.file_name().is_some_and(|n| n == "node_modules") {
            continue;
        }

        let package = dir.join("node_modules").join(name);
        if !package.is_dir() {
            continue;
        }

        let found = match subpath {
            Some(subpath) => resolve_path(&package.join(subpath)),
            None => resolve_directory(&normalize(&package)),
        };
        if found.is_some() {
            return found;
        }
    }

    None
}

/// Split `@scope/pkg/deep` into (`@scope/pkg`, `deep`).
fn split_package(specifier: &str) -> Option<(&str, Option<&str>)> {
    let segments = if specifier.starts_with('@') { 2 } else { 1 };
    let mut split_at = None;
    let mut seen = 0;

    for (i, c) in specifier.char_indices() {
        if c == '/' {
            seen += 1;
            if seen == segments {
                split_at = Some(i);
                break;
            }
        }
    }

    match split_at {
        Some(i) => {
            let subpath = &specifier[i + 1..];
            Some((&specifier[..i], (!subpath.is_empty()).then_some(subpath)))
        }
        None if segments == 2 && seen == 0 => None,
        None => Some((specifier, None)),
    }
}

fn with_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_split_package() {
        assert_eq!(split_package("rsvp"), Some(("rsvp", None)));
        assert_eq!(split_package("lodash/fp"), Some(("lodash", Some("fp"))));
        assert_eq!(split_package("@scope/pkg"), Some(("@scope/pkg", None)));
        assert_eq!(
            split_package("@scope/pkg/a/b"),
            Some(("@scope/pkg", Some("a/b")))
        );
        assert_eq!(split_package("@scope"), None);
    }

    #[test]
    fn test_relative_with_extension_search() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("src/deferred.js"), "");
        write(&root.join("src/nested/index.js"), "");

        let base = root.join("src");
        assert_eq!(resolve("./deferred", &base), Some(base.join("deferred.js")));
        assert_eq!(resolve("./nested", &base), Some(base.join("nested/index.js")));
        assert_eq!(
            resolve("../src/./deferred.js", &base),
            Some(base.join("deferred.js"))
        );
        assert_eq!(resolve("./missing", &base), None);
    }

    #[test]
    fn test_package_entry_fields() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let modules = root.join("node_modules");

        write(&modules.join("plain/index.js"), "");
        write(&modules.join("mainfield/package.json"), r#"{ "main": "lib/main" }"#);
        write(&modules.join("mainfield/lib/main.js"), "");
        write(
            &modules.join("browserfield/package.json"),
            r#"{ "main": "node.js", "browser": "browser.js" }"#,
        );
        write(&modules.join("browserfield/node.js"), "");
        write(&modules.join("browserfield/browser.js"), "");
        write(&modules.join("@scope/pkg/index.js"), "");
        write(&modules.join("deep/a/b.js"), "");

        let base = root.join("src/nested");
        fs::create_dir_all(&base).unwrap();

        assert_eq!(resolve("plain", &base), Some(modules.join("plain/index.js")));
        assert_eq!(
            resolve("mainfield", &base),
            Some(modules.join("mainfield/lib/main.js"))
        );
        assert_eq!(
            resolve("browserfield", &base),
            Some(modules.join("browserfield/browser.js"))
        );
        assert_eq!(
            resolve("@scope/pkg", &base),
            Some(modules.join("@scope/pkg/index.js"))
        );
        assert_eq!(resolve("deep/a/b", &base), Some(modules.join("deep/a/b.js")));
        assert_eq!(resolve("absent", &base), None);
    }

    #[test]
    fn test_nearest_node_modules_wins() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(&root.join("node_modules/dep/index.js"), "outer");
        write(&root.join("pkg/node_modules/dep/index.js"), "inner");

        assert_eq!(
            resolve("dep", &root.join("pkg")),
            Some(root.join("pkg/node_modules/dep/index.js"))
        );
        assert_eq!(
            resolve("dep", root),
            Some(root.join("node_modules/dep/index.js"))
        );
    }
}
