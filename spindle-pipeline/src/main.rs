//! spindle-pipeline - Content discovery and batch processing service
//!
//! Discovers source candidates from the external catalog, promotes them into
//! the generation queue, dispatches batches of child jobs and tracks their
//! completion, and drains the import queue one record at a time.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use spindle_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver,
};
use spindle_common::events::EventBus;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spindle_pipeline::config::{resolve_generator_token, PipelineTimings};
use spindle_pipeline::services::{
    Collaborators, HttpCatalogClient, HttpContentGenerator, HttpJobLauncher, PipelineScheduler,
    PipelineServices,
};
use spindle_pipeline::AppState;

/// Command-line arguments for spindle-pipeline
#[derive(Parser, Debug)]
#[command(name = "spindle-pipeline")]
#[command(about = "Content discovery and batch processing pipeline")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5790", env = "SPINDLE_PIPELINE_PORT")]
    port: u16,

    /// Root folder holding the database
    #[arg(short, long, env = "SPINDLE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to ~/.config/spindle/spindle.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serve on-demand triggers only; do not start the timers
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so the TOML log level can seed the filter
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let toml_config = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting spindle-pipeline on port {}", args.port);
    info!(
        "Version: {} ({} built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // Step 1: Resolve and create the root folder
    let resolver = RootFolderResolver::new(args.root_folder.clone(), &toml_config);
    let initializer = RootFolderInitializer::new(resolver.resolve());
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    // Step 2: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = spindle_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    // Step 3: Timings and collaborators
    let timings = PipelineTimings::load(&db)
        .await
        .context("Failed to load pipeline settings")?;
    info!(?timings, "Pipeline timings loaded");

    let catalog = HttpCatalogClient::from_config(&db, &toml_config)
        .await
        .context("Failed to build catalog client")?;

    let generator_token = resolve_generator_token(&db, &toml_config).await?;
    if toml_config.generator.base_url.is_none() {
        warn!("[generator] base_url not set; dispatch and import processing will fail");
    }
    let launcher = HttpJobLauncher::new(
        toml_config.generator.base_url.clone(),
        generator_token.clone(),
    )
    .context("Failed to build job launcher")?;
    let generator = HttpContentGenerator::new(toml_config.generator.base_url.clone(), generator_token)
        .context("Failed to build content generator")?;

    let collaborators = Collaborators {
        catalog: std::sync::Arc::new(catalog),
        launcher: std::sync::Arc::new(launcher),
        generator: std::sync::Arc::new(generator),
    };

    // Step 4: Services, monitors and timers
    let event_bus = EventBus::new(100);
    let shutdown = CancellationToken::new();

    let services = PipelineServices::new(
        db.clone(),
        event_bus.clone(),
        &timings,
        collaborators,
        toml_config.catalog.formats.clone(),
        shutdown.clone(),
    );

    let resumed = services
        .monitors
        .resume_all()
        .await
        .context("Failed to resume batch monitors")?;
    if resumed > 0 {
        info!("Resumed {} batch monitor(s)", resumed);
    }

    // Claims left by a previous process can never complete
    services
        .sequential
        .release_all_claims()
        .await
        .context("Failed to release interrupted import claims")?;

    let scheduler_enabled = toml_config.scheduler.enabled && !args.no_scheduler;
    let timer_tasks = if scheduler_enabled {
        PipelineScheduler::new(
            services.promotion.clone(),
            services.sequential.clone(),
            toml_config.scheduler.clone(),
            shutdown.clone(),
        )
        .spawn()
    } else {
        info!("Scheduler disabled; stages run on demand only");
        Vec::new()
    };

    let state = AppState::new(
        db,
        event_bus,
        services,
        timings,
        toml_config.scheduler.promotion_batch_size,
    );
    let app = spindle_pipeline::build_router(state);

    // Step 5: Serve
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    // Monitors stop without writing; they resume from their stored counters
    shutdown.cancel();
    for task in timer_tasks {
        if let Err(e) = task.await {
            warn!("Timer task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels the shutdown token
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    shutdown.cancel();
}
