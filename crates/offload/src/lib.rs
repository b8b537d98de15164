//! Offload
//!
//! Builds the background worker bundle for a project. Packages tagged with
//! the plugin keyword contribute source under `workers/background-adapters`;
//! their sources are staged side by side, compiled into one script with
//! ownership-aware import resolution, and written where the runtime loads it.
//!
//! - [`registry`]: finds contributing packages
//! - [`aggregate`]: stages their sources and generates the entry file
//! - [`resolve`]: decides which contributor's dependencies an import uses
//! - [`bundle`]: compiles the staged tree into a single script
//! - [`output`]: places the artifact
//! - [`pipeline`]: runs a whole build
//! - [`watch`]: rebuilds on change

pub mod aggregate;
pub mod bundle;
pub mod config;
pub mod host;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod resolve;
pub mod watch;

pub use config::OffloadConfig;
pub use pipeline::{build, discover, BuildError, BuildReport};
