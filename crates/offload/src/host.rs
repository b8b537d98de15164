//! The worker runtime shipped with offload.
//!
//! It is the host contributor: it answers the boot handshake and forwards
//! requests to whatever handler the other contributors installed. The
//! sources are compiled into the binary and written out next to the
//! staging tree so they go through discovery like any other package.

use std::fs;
use std::path::Path;

use crate::registry::{PackageDescriptor, RegistryError, MANIFEST_FILE};

/// Where the runtime package is written, relative to the project root.
pub const HOST_DIR: &str = ".offload/host";

const MANIFEST: &str = include_str!("../runtime/package.json");

const SOURCES: &[(&str, &str)] = &[
    (
        "index.js",
        include_str!("../runtime/workers/background-adapters/index.js"),
    ),
    (
        "timeout.js",
        include_str!("../runtime/workers/background-adapters/timeout.js"),
    ),
];

/// Write the runtime package into `dir` and load its descriptor.
pub fn materialize(dir: &Path, workers_location: &Path) -> Result<PackageDescriptor, RegistryError> {
    let workers = dir.join(workers_location);
    fs::create_dir_all(&workers)?;
    fs::write(dir.join(MANIFEST_FILE), MANIFEST)?;
    for (name, source) in SOURCES {
        fs::write(workers.join(name), source)?;
    }

    PackageDescriptor::load(dir)
}
