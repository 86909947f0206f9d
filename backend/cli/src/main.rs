mod api;
mod composer;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use leadflow_config::{config_dir, config_file_path, load_and_prepare, write_config, LeadflowConfig};
use leadflow_engine::{register_jobs, AreaCodeZones};
use leadflow_logging::init_logger;
use leadflow_scheduler::{RunLog, Scheduler};

use api::AppState;

/// Scheduler run history older than this is pruned on startup.
const RUN_LOG_RETENTION_SECS: i64 = 30 * 86_400;

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(about = "Lead follow-up orchestration and delivery engine")]
#[command(version)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the HTTP server
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run a single follow-up cycle and exit
    RunOnce,
    /// Drain the primary and retry queues once
    Drain,
    /// Flush pending spreadsheet writes
    Flush,
    /// Show the status of a running server
    Status {
        /// Base URL of the server (defaults to the configured bind/port)
        #[arg(long)]
        url: Option<String>,
    },
    /// Show recent scheduler runs of a job
    Runs {
        job: String,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_file_path(&config_dir()));

    if let Commands::Init { force } = cli.command {
        return init_config(&config_path, force).await;
    }

    let config = load_and_prepare(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    init_logger(&config.logging.dir, &config.logging.level, config.logging.json);

    match cli.command {
        Commands::Serve { port } => {
            let mut config = config;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await?;
        }
        Commands::RunOnce => {
            let service = runtime::build_service(&config).await?;
            let summary = service.trigger_cycle().await?;
            // Persist anything left queued for the next process.
            service.record_metrics(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Drain => {
            let service = runtime::build_service(&config).await?;
            let now = Utc::now();
            let primary = service.drain_primary(now).await;
            let retry = service.drain_retries(now).await;
            service.record_metrics(now).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "primary": primary, "retry": retry }))?
            );
        }
        Commands::Flush => {
            let service = runtime::build_service(&config).await?;
            let report = service.flush_batch().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { url } => {
            let base = url.unwrap_or_else(|| {
                format!("http://{}:{}", config.server.bind, config.server.port)
            });
            let client = reqwest::Client::new();
            match client.get(format!("{base}/api/status")).send().await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Leadflow is not running at {base}");
                }
            }
        }
        Commands::Runs { job, limit } => {
            let log = RunLog::open(&config.storage.db_path)?;
            for entry in log.recent(&job, limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

async fn init_config(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&LeadflowConfig::default(), path).await?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

async fn run_server(config: LeadflowConfig) -> Result<()> {
    info!(
        port = config.server.port,
        bind = %config.server.bind,
        db = %config.storage.db_path,
        "Starting Leadflow"
    );

    let service = runtime::build_service(&config).await?;

    // Cron expressions are evaluated in the default area code's zone.
    let offset = AreaCodeZones::from_config(&config.business_hours).offset_for_phone(None);
    let run_log = RunLog::open(&config.storage.db_path)?;
    let pruned = run_log.prune(RUN_LOG_RETENTION_SECS)?;
    if pruned > 0 {
        info!(pruned, "Pruned old scheduler runs");
    }
    let mut scheduler = Scheduler::new(offset).with_run_log(Arc::new(Mutex::new(run_log)));
    register_jobs(&mut scheduler, service.clone(), &config)?;
    info!(jobs = ?scheduler.job_names(), "Scheduler configured");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move {
        if let Err(e) = scheduler.run(shutdown_rx).await {
            error!(error = %e, "Scheduler stopped with error");
        }
    });

    let state = Arc::new(AppState { service });
    let app = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task panicked");
    }
    info!("Leadflow stopped");
    Ok(())
}
