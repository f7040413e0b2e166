use crate::config::load_config;
use crate::pipeline::Agent;
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path.ok_or(
        "config not found (searched ~/.config/logferry/config.yml and /etc/logferry/config.yml); \
         use --config <path> or run 'logferry config init'",
    )?;

    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;
    let agent = Agent::new(config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let summary = agent.run(shutdown).await?;
    info!(
        sources = summary.sources,
        events = summary.events_ingested,
        "Shutdown complete"
    );
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        match unix_signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
    shutdown.cancel();
}
