//! Offload CLI
//!
//! Builds the worker bundle for a project and runs requests through it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use offload::config::OffloadConfig;
use offload::pipeline;
use offload::watch::BuildWatcher;
use offload_worker::{JsWorkerFactory, WorkerFactory};

/// Background worker bundler
#[derive(Parser, Debug)]
#[command(name = "offload")]
#[command(about = "Bundle and run background data workers", long_about = None)]
struct Args {
    /// Path to the project directory
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile the worker bundle
    Build {
        /// Output directory, relative to the project
        #[arg(long)]
        out: Option<PathBuf>,

        /// Minify the bundle
        #[arg(long)]
        minify: bool,

        /// Keep running and rebuild when worker sources change
        #[arg(long)]
        watch: bool,
    },

    /// List contributing packages in bundle order
    Discover,

    /// Request URLs through the compiled worker
    Run {
        /// Bundle to run instead of the project's build output
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// Request URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn main() -> Result<()> {
    // V8 must be initialized on the main thread before the tokio runtime starts.
    offload_worker::init_platform();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("offload=info,offload_worker=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let project = args.project;
    let mut config = OffloadConfig::load(&project)
        .with_context(|| format!("Failed to load configuration for {}", project.display()))?;

    match args.command {
        Command::Build { out, minify, watch } => {
            if let Some(out) = out {
                config.output_dir = out;
            }
            config.minify |= minify;
            build(&project, &config).await?;

            if watch {
                let watcher = BuildWatcher::new(&project, config)?;
                tokio::select! {
                    _ = watcher.run() => {}
                    _ = tokio::signal::ctrl_c() => info!("Stopping watcher"),
                }
            }
        }

        Command::Discover => {
            for contributor in pipeline::discover(&project, &config)? {
                println!("{}\t{}", contributor.name, contributor.source.display());
            }
        }

        Command::Run { bundle, urls } => {
            let factory: Arc<dyn WorkerFactory> = match bundle {
                Some(path) => {
                    let code = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    Arc::new(JsWorkerFactory::from_source(code))
                }
                None => Arc::new(
                    JsWorkerFactory::new(config.output_root(&project)).with_root_url(&config.root_url),
                ),
            };
            let sessions = pipeline::sessions(&config, factory);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            for url in urls {
                match sessions.chunk_with_cancel(&url, &cancel).await {
                    Ok(reply) => println!("{}", serde_json::to_string(&reply)?),
                    Err(e) => {
                        error!("{}: {}", url, e);
                        return Err(e.into());
                    }
                }
            }
        }
    }

    Ok(())
}

async fn build(project: &std::path::Path, config: &OffloadConfig) -> Result<()> {
    let root = project.to_path_buf();
    let config = config.clone();

    match tokio::task::spawn_blocking(move || pipeline::build(&root, &config)).await?? {
        Some(report) => info!(
            "Built {} ({} modules, {} bytes) from {}",
            report.artifact.display(),
            report.modules,
            report.bytes,
            report.contributors.join(", ")
        ),
        None => info!("Worker bundle is disabled"),
    }
    Ok(())
}
