mod config;
mod detector;
mod error;
mod models;
mod notifier;
mod pipeline;
mod scraper;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::detector::MonitorState;
use crate::models::ExtractionResult;
use crate::pipeline::Monitor;
use crate::scraper::parsers::page_diagnostics;

#[derive(Parser)]
#[command(
    name = "availability-monitor",
    about = "Watches a booking widget and mails when rooms free up",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single check and exit (for cron or a platform scheduler)
    Once,

    /// Check continuously until interrupted
    Watch {
        /// Minutes between checks (overrides configuration)
        #[arg(short, long, env = "CHECK_INTERVAL_MINUTES")]
        interval_minutes: Option<u64>,
    },

    /// Fetch the page once and show what the extractors see
    Probe,
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform sends one.
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "Ctrl-C",
        _ = terminate => "SIGTERM",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "availability_monitor=info,warn",
        1 => "availability_monitor=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Once => {
            let monitor = Monitor::new(&config)?;
            let mut state = MonitorState::new();
            // A lone run can only baseline, but fetch and extraction problems still surface.
            match monitor.guarded_cycle(&mut state).await {
                Ok(report) => info!("Done: strategy {:?}", report.strategy),
                Err(e) => tracing::error!("❌ Check failed: {:#}", anyhow::Error::new(e)),
            }
        }

        Command::Watch { interval_minutes } => {
            if let Some(minutes) = interval_minutes {
                config.monitor.interval_minutes = minutes;
            }
            let monitor = Monitor::new(&config)?;

            let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
            tokio::spawn(async move {
                let signal = shutdown_signal().await;
                info!("{} received, stopping", signal);
                let _ = stop_tx.send(());
            });

            let mut state = MonitorState::new();
            monitor
                .run_until(&mut state, async {
                    let _ = stop_rx.await;
                })
                .await;
            info!("Done after {} checks", state.poll_count());
        }

        Command::Probe => {
            let monitor = Monitor::new(&config)?;
            let doc = monitor
                .fetcher()
                .get(&config.target.url)
                .await
                .context("Could not fetch target page")?;
            let diag = page_diagnostics(&doc.body);

            println!("─────────────────────────────────");
            println!("  Probe — {}", config.target.url);
            println!("─────────────────────────────────");
            let content_type = doc
                .headers
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("—");
            println!("  Status   : {} ({} bytes)", doc.status, doc.body.len());
            println!("  Type     : {}", content_type);
            println!("  Title    : {}", diag.title.as_deref().unwrap_or("—"));
            println!("  Divs     : {}", diag.div_count);
            println!("  Scripts  : {}", diag.script_count);
            println!("  Keywords : {:?}", diag.indicators);
            println!("  Widget   : {}", if diag.mentions_provider { "mentioned" } else { "not found" });

            match monitor.extractor().extract(&doc).await {
                ExtractionResult::Structured(snapshot, id) => {
                    let today = chrono::Local::now().date_naive();
                    let available: Vec<String> = snapshot
                        .available_dates(today)
                        .iter()
                        .take(5)
                        .map(|d| d.to_string())
                        .collect();
                    println!("  Strategy : {}", id);
                    println!("  Window   : {} → {}", snapshot.window_start(), snapshot.window_end());
                    println!("  Blocked  : {}", snapshot.blocked_dates().len());
                    println!("  First    : {}", available.join(", "));
                }
                ExtractionResult::SignatureOnly(signature, id) => {
                    println!("  Strategy : {} (no structured data)", id);
                    println!("{}", serde_json::to_string_pretty(&signature)?);
                }
                ExtractionResult::Failed(reason) => {
                    println!("  Strategy : none ({})", reason);
                }
            }
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}
