use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_sieve::config::Config;
use webhook_sieve::downstream::{ChannelQueue, DEFAULT_SEND_TIMEOUT, Forwarder, RetryConfig};
use webhook_sieve::persistence::{FileStore, MemoryStore, Store};
use webhook_sieve::server::{AppState, build_router};
use webhook_sieve::shard::ShardRegistry;
use webhook_sieve::webhooks::SignatureVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_sieve=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let verifier = match &config.public_key_path {
        Some(path) => {
            let pem = std::fs::read_to_string(path)
                .with_context(|| format!("reading public key {}", path.display()))?;
            SignatureVerifier::from_pem(&pem)?
        }
        None => SignatureVerifier::platform_default()?,
    };

    let store = match &config.state_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "Persisting shard state to disk");
            Store::File(FileStore::open(dir).with_context(|| format!("opening state dir {}", dir.display()))?)
        }
        None => {
            info!("No state directory configured, shard state is in memory only");
            Store::Memory(MemoryStore::new())
        }
    };

    let (queue, downstream) = ChannelQueue::new(config.queue_capacity, DEFAULT_SEND_TIMEOUT);
    let forwarder = Forwarder::new(config.downstream_url.clone(), RetryConfig::DEFAULT)?;
    let forwarder_shutdown = CancellationToken::new();
    let forwarder_task = tokio::spawn(forwarder.run(downstream, forwarder_shutdown.clone()));

    let registry = Arc::new(ShardRegistry::new_with_shutdown(
        config.shard.clone(),
        Arc::new(queue),
        Arc::new(store),
        CancellationToken::new(),
    ));

    let app_state = AppState::new(
        Arc::clone(&registry),
        Arc::new(verifier),
        config.max_body_bytes,
        config.metrics_ttl,
    );
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    // Shards flush into the queue while draining; stop the forwarder after.
    registry.shutdown_all().await;
    forwarder_shutdown.cancel();
    let stats = forwarder_task.await?;
    info!(delivered = stats.delivered, failed = stats.failed, "Stopped");

    Ok(())
}
