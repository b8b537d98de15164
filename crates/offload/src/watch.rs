//! Rebuild on change
//!
//! Watches every contributor's worker directory and rebuilds the bundle
//! when a source file is created, modified or removed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::OffloadConfig;
use crate::host::HOST_DIR;
use crate::pipeline;

/// Quiet period before a burst of events triggers one rebuild.
const SETTLE: Duration = Duration::from_millis(150);

/// Contributor source watcher
pub struct BuildWatcher {
    project_root: PathBuf,
    config: OffloadConfig,
    rx: mpsc::Receiver<PathBuf>,
    watched: HashSet<PathBuf>,
    watcher: RecommendedWatcher,
}

impl BuildWatcher {
    pub fn new(project_root: impl AsRef<Path>, config: OffloadConfig) -> Result<Self, notify::Error> {
        let project_root = project_root
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| project_root.as_ref().to_path_buf());
        let (tx, rx) = mpsc::channel(100);

        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if let Some(path) = Self::event_to_change(&event) {
                        let _ = tx.blocking_send(path);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            }
        })?;

        let mut this = Self {
            project_root,
            config,
            rx,
            watched: HashSet::new(),
            watcher,
        };
        this.refresh();
        Ok(this)
    }

    /// Source directories currently watched.
    pub fn watched(&self) -> impl Iterator<Item = &PathBuf> {
        self.watched.iter()
    }

    fn event_to_change(event: &Event) -> Option<PathBuf> {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_) => {}
            _ => {
                debug!("Ignoring event kind: {:?}", event.kind);
                return None;
            }
        }

        event.paths.first().cloned()
    }

    /// Watch the source directory of every current contributor.
    fn refresh(&mut self) {
        let contributors = match pipeline::discover(&self.project_root, &self.config) {
            Ok(contributors) => contributors,
            Err(e) => {
                warn!("Failed to discover contributors: {}", e);
                return;
            }
        };

        // The runtime is rewritten by every build.
        let host = self.project_root.join(HOST_DIR);
        let wanted: HashSet<PathBuf> = contributors
            .into_iter()
            .map(|c| c.source)
            .filter(|source| !source.starts_with(&host))
            .collect();

        for stale in self.watched.difference(&wanted) {
            if let Err(e) = self.watcher.unwatch(stale) {
                debug!("Failed to unwatch {}: {}", stale.display(), e);
            }
        }
        for source in wanted.difference(&self.watched) {
            match self.watcher.watch(source, RecursiveMode::Recursive) {
                Ok(()) => info!("Watching worker sources: {}", source.display()),
                Err(e) => warn!("Failed to watch {}: {}", source.display(), e),
            }
        }
        self.watched = wanted;
    }

    /// Run the watcher loop
    pub async fn run(mut self) {
        info!("Starting file watcher loop");

        while let Some(path) = self.rx.recv().await {
            info!("Worker source changed: {}", path.display());

            // Collapse the rest of the burst into this rebuild.
            tokio::time::sleep(SETTLE).await;
            while self.rx.try_recv().is_ok() {}

            self.rebuild().await;
            self.refresh();
        }

        info!("File watcher loop ended");
    }

    async fn rebuild(&self) {
        let root = self.project_root.clone();
        let config = self.config.clone();

        match tokio::task::spawn_blocking(move || pipeline::build(&root, &config)).await {
            Ok(Ok(Some(report))) => info!(
                "Rebuilt worker bundle: {} modules from {} contributors",
                report.modules,
                report.contributors.len()
            ),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => error!("Worker bundle build failed: {}", e),
            Err(e) => error!("Worker bundle build panicked: {}", e),
        }
    }
}
