mod http;
mod session;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use feed_ingest::FeedSource;
use relay_api::{Broker, BrokerMessage, EventStore, OverflowPolicy};

pub use session::{ClientSession, ServerFrame};

/// What the ingestion trigger needs to start a run.
#[derive(Clone)]
pub struct FeedTrigger {
    pub client: reqwest::Client,
    pub source: FeedSource,
}

#[derive(Clone)]
pub struct AppState {
    broker: Arc<dyn Broker>,
    inbound: broadcast::Sender<BrokerMessage>,
    store: Arc<dyn EventStore>,
    feed: Option<FeedTrigger>,
    ws_buffer: usize,
    ws_overflow: OverflowPolicy,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        broker: Arc<dyn Broker>,
        inbound: broadcast::Sender<BrokerMessage>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            broker,
            inbound,
            store,
            feed: None,
            ws_buffer: 256,
            ws_overflow: OverflowPolicy::Drop,
            shutdown: CancellationToken::new(),
        }
    }

    /// Enable `GET /test/event-stream`.
    pub fn with_feed(mut self, feed: FeedTrigger) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Per-connection outbound queue for broker messages.
    pub fn with_ws(mut self, buffer: usize, overflow: OverflowPolicy) -> Self {
        self.ws_buffer = buffer.max(1);
        self.ws_overflow = overflow;
        self
    }

    /// Open WebSocket connections close when this token fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", get(http::handle_recent_events))
        .route("/test/event-stream", get(http::handle_start_ingestion))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
}

/// HTTP + WebSocket API server on an already bound listener. Runs until
/// `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "api server (http+ws) listening");

    axum::serve(listener, router(state.with_shutdown(shutdown.clone())))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
