//! Workers backed by V8 isolates.
//!
//! A worker script is evaluated as a classic script on top of a small set of
//! browser-like globals (`self`, `addEventListener`, `postMessage`,
//! `setTimeout`, `console`, `crypto.randomUUID`).

mod handle;
mod ops;
mod runtime;

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use deno_core::v8;
use tokio::sync::{mpsc, watch};

pub use handle::JsWorker;
pub use runtime::init_platform;

use crate::error::WorkerError;
use crate::worker::{Worker, WorkerFactory};
use runtime::run_worker;

/// Start a worker evaluating `code`.
pub fn spawn_worker(name: String, code: String) -> Result<JsWorker, WorkerError> {
    tracing::debug!("[spawn_worker] Starting {}", name);
    init_platform();

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (outbound_tx, messages) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<Result<v8::IsolateHandle, String>>(1);

    let thread_name = name.clone();
    let thread_handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || -> Result<(), WorkerError> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            let result = rt.block_on(run_worker(
                thread_name.clone(),
                code,
                cmd_rx,
                outbound_tx,
                shutdown_rx,
                init_tx,
            ));

            rt.shutdown_background();
            tracing::debug!("[spawn_worker:{}] Thread exiting", thread_name);
            result
        })?;

    let isolate_handle = init_rx
        .recv()
        .map_err(|_| WorkerError::ChannelClosed)?
        .map_err(WorkerError::JavaScript)?;

    tracing::debug!("[spawn_worker] {} is ready", name);

    Ok(JsWorker {
        cmd_tx,
        messages,
        shutdown_tx,
        terminated: AtomicBool::new(false),
        isolate_handle,
        thread_handle: Some(thread_handle),
    })
}

#[derive(Debug, Clone)]
enum Source {
    /// Scripts are read from disk, with URL paths mapped under a public root.
    Public { root: PathBuf, root_url: String },
    Inline(Arc<str>),
}

/// Starts [`JsWorker`]s.
#[derive(Debug, Clone)]
pub struct JsWorkerFactory {
    source: Source,
}

impl JsWorkerFactory {
    /// Serve worker scripts from `public_root`, the directory behind `/`.
    pub fn new(public_root: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::Public {
                root: public_root.into(),
                root_url: "/".to_string(),
            },
        }
    }

    /// Set the URL prefix `public_root` is served under.
    pub fn with_root_url(mut self, url: impl Into<String>) -> Self {
        if let Source::Public { root_url, .. } = &mut self.source {
            *root_url = url.into();
        }
        self
    }

    /// Run `code` for every location.
    pub fn from_source(code: impl Into<Arc<str>>) -> Self {
        Self {
            source: Source::Inline(code.into()),
        }
    }

    fn load(&self, location: &str) -> Result<String, WorkerError> {
        match &self.source {
            Source::Inline(code) => Ok(code.to_string()),
            Source::Public { root, root_url } => {
                let path = script_path(root, root_url, location);
                if !path.is_file() {
                    return Err(WorkerError::NotFound {
                        location: location.to_string(),
                        path,
                    });
                }
                Ok(std::fs::read_to_string(path)?)
            }
        }
    }
}

impl WorkerFactory for JsWorkerFactory {
    fn spawn(&self, location: &str) -> Result<Box<dyn Worker>, WorkerError> {
        let code = self.load(location)?;
        let worker = spawn_worker(format!("worker:{}", location), code)?;
        Ok(Box::new(worker))
    }
}

/// Map a script URL onto the public directory.
fn script_path(root: &Path, root_url: &str, location: &str) -> PathBuf {
    let path = location.split(['?', '#']).next().unwrap_or_default();
    let prefix = root_url.trim_end_matches('/');
    let relative = path.strip_prefix(prefix).unwrap_or(path);

    relative
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}
