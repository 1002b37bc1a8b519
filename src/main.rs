use anyhow::Result;
use hearth::config::HearthConfig;
use hearth::engine::SyncEngine;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth=info".into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "hearth.toml".to_string());
    let config = match hearth::config::load_config(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Config not loaded, using defaults");
            HearthConfig::default()
        }
    };

    info!(url = %config.connection.url, "Hearth starting...");

    let engine = SyncEngine::new(config);
    engine.connect();

    let mut all = engine.entities();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = all.changed() => {
                info!(
                    entities = all.entities().len(),
                    connected = all.is_connected(),
                    "State updated"
                );
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}
