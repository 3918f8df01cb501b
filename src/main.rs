//! farmpilot daemon entry point.

use farmpilot::config::Config;
use farmpilot::db::Db;
use farmpilot::escalation::{
    CaseStore, EscalationCoordinator, NotificationSweep, ResponseReconciler, spawn_poll_loop,
    spawn_sweep_loop,
};
use farmpilot::gateway::telegram::TelegramGateway;
use farmpilot::gateway::Gateway;
use farmpilot::pipeline::{RequestPipeline, spawn_farmer_listener};
use farmpilot::specialist::{HttpSpecialist, Specialist};

use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "farmpilot")]
#[command(about = "Farming-assistant chatbot with human-in-the-loop veterinary escalation")]
struct Cli {
    /// Path to a TOML config file. Defaults to ./farmpilot.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,

    /// Write daily-rolling log files into this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_dir.as_deref());

    let config = Config::load(cli.config.as_deref())?;

    let db = Db::connect(&config.data_dir()).await?;
    let store = CaseStore::new(db.sqlite.clone());

    let farmer_token = config
        .telegram
        .farmer_bot_token
        .clone()
        .context("telegram.farmer_bot_token (or TELEGRAM_TOKEN) is required")?;
    let farmer_gateway: Arc<dyn Gateway> = Arc::new(TelegramGateway::new(&farmer_token));

    let agent_url = config
        .agents
        .service_url
        .clone()
        .context("agents.service_url (or AGENT_SERVICE_URL) is required")?;
    let specialist: Arc<dyn Specialist> = Arc::new(HttpSpecialist::new(&agent_url));

    let intervals = &config.escalation;
    let start_delay = Duration::from_secs(intervals.start_delay_secs);

    let coordinator = match config.escalation_settings() {
        Some(settings) => {
            let expert_gateway: Arc<dyn Gateway> =
                Arc::new(TelegramGateway::new(&settings.emergency_bot_token));

            let coordinator = Arc::new(EscalationCoordinator::new(
                store.clone(),
                expert_gateway.clone(),
                settings.expert_channel,
            ));

            let reconciler = ResponseReconciler::new(store.clone(), expert_gateway);
            spawn_poll_loop(
                reconciler,
                Duration::from_secs(intervals.poll_interval_secs),
                start_delay,
            );

            let sweep = NotificationSweep::new(store.clone(), farmer_gateway.clone());
            spawn_sweep_loop(
                sweep,
                Duration::from_secs(intervals.sweep_interval_secs),
                start_delay,
            );

            tracing::info!(expert_channel = %settings.expert_channel, "emergency vet review enabled");
            Some(coordinator)
        }
        None => {
            tracing::warn!(
                "expert channel not configured - emergency vet review disabled, \
                 cases will never escalate"
            );
            None
        }
    };

    let pipeline = Arc::new(RequestPipeline::new(specialist, coordinator));
    spawn_farmer_listener(
        pipeline,
        farmer_gateway,
        Duration::from_secs(intervals.farmer_poll_interval_secs),
    );

    tracing::info!("farmpilot started");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    db.close().await;
    Ok(())
}

fn init_tracing(debug: bool, log_dir: Option<&std::path::Path>) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    };

    match log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, "farmpilot.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leak the guard so the non-blocking writer lives for the entire
            // process.
            std::mem::forget(guard);

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .compact();
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer().compact();
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }
}
