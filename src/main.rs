use anyhow::{Context, Result};
use futures::StreamExt;
use std::io::{self, BufWriter};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
mod db;
mod events;
mod gather;
mod planner;

#[cfg(test)]
mod tests;

use config::{parse_disklist, PlannerConfig};
use db::Database;
use events::EventHub;
use gather::TcpTransport;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dump_planner=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    info!("dump-planner v{} starting up", env!("CARGO_PKG_VERSION"));

    let config = PlannerConfig::load()?;
    info!(
        "Configuration loaded: config={}, dumpcycle={}, runtapes={}, tape_length={} KB",
        config.config_name, config.dumpcycle, config.runtapes, config.tape_length_kb
    );

    let contents = std::fs::read_to_string(&config.disklist_path)
        .with_context(|| format!("Failed to read disk list: {}", config.disklist_path))?;
    let disks = parse_disklist(&contents, &config)?;
    info!("Disk list loaded: {} disk(s) from {}", disks.len(), config.disklist_path);

    let db = Database::open(&config.db_path)?;
    db.run_migrations()?;
    info!("Database initialized at {}", config.db_path);

    let event_hub = EventHub::new(256);
    let forwarder = tokio::spawn(forward_events(BroadcastStream::new(event_hub.subscribe())));

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(shutdown_signal(cancel.clone()));
    let transport = Arc::new(TcpTransport::new(config.estimate_port));

    let mut out = BufWriter::new(io::stdout().lock());
    let outcome = planner::run(
        config,
        disks,
        &db,
        transport,
        event_hub,
        cancel,
        chrono::Utc::now(),
        &mut out,
    )
    .await;

    signals.abort();
    if let Err(e) = forwarder.await {
        warn!("event forwarder stopped abnormally: {}", e);
    }

    match outcome {
        Ok(summary) => {
            info!(
                "Run planned: {} scheduled, {} failed, {} skipped, {} KB",
                summary.scheduled, summary.failed, summary.skipped, summary.total_size_kb
            );
            if summary.failed > 0 || summary.scheduled == 0 {
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Planning failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Write every planner event to the log as a JSON record.
async fn forward_events(mut stream: BroadcastStream<events::Event>) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!(kind = event.event_type(), "{}", json),
                Err(e) => warn!("cannot serialize {} event: {}", event.event_type(), e),
            },
            Err(BroadcastStreamRecvError::Lagged(n)) => {
                warn!("event log fell behind, {} event(s) dropped", n);
            }
        }
    }
}

/// Cancel `token` on SIGTERM or SIGINT.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { warn!("Received Ctrl+C, abandoning estimates..."); },
        () = terminate => { warn!("Received SIGTERM, abandoning estimates..."); },
    }
    token.cancel();
}
