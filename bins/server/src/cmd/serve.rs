use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use broker_bridge::BrokerBridge;
use feed_ingest::{Backoff, Supervisor};
use relay_api::{Broker, EventStore};
use relay_api_server::{AppState, FeedTrigger};
use storage_jsonl::JsonlStore;
use storage_memory::MemoryStore;

use crate::config::{ServeArgs, ServerConfig, StorageConfig};
use crate::error::ServerError;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("relay-server starting");

    // --- Load config ---
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(token) = args.access_token.filter(|t| !t.is_empty()) {
        config.feed.access_token = Some(token);
    }
    tracing::info!(config = %args.config, "loaded config");

    let token = CancellationToken::new();

    // --- Event store ---
    let store = open_store(&config.storage).await?;

    // --- Broker bridge ---
    let bridge = BrokerBridge::connect(&config.broker, token.clone());
    let broker = bridge.handle();
    let inbound = broker.inbound();
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let mut state = AppState::new(broker, inbound, store.clone())
        .with_ws(config.ws_buffer, config.ws_overflow);

    // --- Feed ingestion ---
    let http = reqwest::Client::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    match config.feed.source() {
        Some(source) => {
            state = state.with_feed(FeedTrigger {
                client: http.clone(),
                source: source.clone(),
            });
            if config.feed.autostart {
                let backoff = Backoff::new(config.feed.initial_backoff(), config.feed.max_backoff());
                handles.push(Supervisor::new(http, source, store.clone(), backoff).spawn(token.clone()));
            }
        }
        None => {
            tracing::warn!("no feed access token configured, ingestion disabled");
        }
    }

    // --- API server (HTTP + WS) ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = relay_api_server::serve(listener, state, api_token).await {
            tracing::error!(error = %e, "api server error");
        }
    });

    tracing::info!(port = config.api_port, "server ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    handles.push(api_handle);
    let drain = async {
        for h in handles.iter_mut() {
            let _ = h.await;
        }
    };
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_ok();
    if !drained {
        tracing::warn!("tasks did not stop in time, aborting");
        for h in &handles {
            h.abort();
        }
    }
    if tokio::time::timeout(DRAIN_TIMEOUT, bridge.join()).await.is_err() {
        tracing::warn!("broker bridge did not stop in time");
    }

    if let Err(e) = store.flush().await {
        tracing::error!(error = %e, "store flush error");
    }

    tracing::info!("shutdown complete");
    Ok(())
}

async fn open_store(config: &StorageConfig) -> Result<Arc<dyn EventStore>, ServerError> {
    let store: Arc<dyn EventStore> = match config {
        StorageConfig::Memory(cfg) => Arc::new(MemoryStore::from_config(cfg)),
        StorageConfig::Jsonl(cfg) => Arc::new(JsonlStore::from_config(cfg)),
    };
    store.init().await?;
    tracing::info!(kind = config.kind(), "event store ready");
    Ok(store)
}
