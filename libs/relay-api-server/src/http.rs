use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use relay_api::{Event, EventQuery, SortOrder};

use super::AppState;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 100;

// ═══════════════════════════════════════════════════════════════
//  REST: GET /api/events?limit=&topic=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct EventsParams {
    limit: Option<String>,
    topic: Option<String>,
}

/// Most recently published events, newest first. Never an error: a
/// failing store is logged and answered with an empty list.
pub(crate) async fn handle_recent_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> impl IntoResponse {
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAX_LIMIT);
    let query = EventQuery {
        topic: params.topic.filter(|t| !t.is_empty()),
        limit: Some(limit),
        order: SortOrder::Desc,
    };

    let events: Vec<Event> = match state.store.query(&query).await {
        Ok(events) => events,
        Err(e) => {
            tracing::error!(error = %e, "event query failed");
            Vec::new()
        }
    };
    axum::Json(events)
}

// ═══════════════════════════════════════════════════════════════
//  GET /test/event-stream?product=
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct TriggerParams {
    product: Option<String>,
}

/// Start one detached ingestion run and answer right away.
pub(crate) async fn handle_start_ingestion(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> impl IntoResponse {
    let Some(feed) = &state.feed else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "feed access token not configured",
        )
            .into_response();
    };

    let source = match params.product.filter(|p| !p.is_empty()) {
        Some(product) => feed.source.with_product(product),
        None => feed.source.clone(),
    };
    tracing::info!(product = %source.product, "ingestion run requested");
    // Detached: the run ends with its stream.
    drop(feed_ingest::spawn_run(
        feed.client.clone(),
        source,
        state.store.clone(),
    ));

    (StatusCode::OK, "Started collection.").into_response()
}
