//! kafka-bridge: a Kafka wire-protocol gateway in front of a segmented log backend.
//!
//! Clients speak the Kafka protocol to the listener; every request is routed
//! through a per-connection [`kafka::KafkaSession`] to backend collaborators
//! (placement, discovery, log storage, admin, readers, authentication) that are
//! supplied as trait objects.
//!
//! ```rust,ignore
//! kafka_bridge::init_logging("info");
//! let backend = MemoryBackend::single_node(local, "PLAINTEXT://127.0.0.1:9092");
//! let gateway = GatewayContext::new(GatewayConfig::load()?, backend.collaborators());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! kafka_bridge::serve(gateway, shutdown_rx).await?;
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod kafka;

// Test utilities (only compiled in test builds)
#[cfg(test)]
mod testing;

pub use config::GatewayConfig;
pub use kafka::{GatewayContext, KafkaError, KafkaSession, Result};

/// Install the fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Safe to call more than once; later
/// calls leave the first subscriber in place.
pub fn init_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Bind the configured plaintext listener and serve until shutdown
///
/// Once the listener stops, every group's offset reader is closed.
pub async fn serve(
    gateway: Arc<GatewayContext>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let listener = kafka::listener::bind(&gateway).await?;
    let result = kafka::listener::run(listener, gateway.clone(), shutdown_rx).await;
    gateway.acker.close_all().await;
    result
}
