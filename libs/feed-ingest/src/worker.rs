use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;

use relay_api::{EventStore, RelayError, SaveOutcome};

use crate::{FeedSource, SseDecoder, SseFrame, decode_event};

// ═══════════════════════════════════════════════════════════════
//  Report
// ═══════════════════════════════════════════════════════════════

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The remote closed the stream.
    Closed,
    /// Connect failure, HTTP error status or a broken stream.
    Terminated(RelayError),
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub saved: usize,
    pub duplicates: usize,
    /// Events dropped because they failed to decode or to persist.
    pub skipped: usize,
    pub outcome: RunOutcome,
}

impl IngestReport {
    fn terminated(error: RelayError) -> Self {
        Self {
            saved: 0,
            duplicates: 0,
            skipped: 0,
            outcome: RunOutcome::Terminated(error),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Run
// ═══════════════════════════════════════════════════════════════

/// One ingestion run: open the feed, persist events until the stream ends.
///
/// Never panics and never retries; the returned report says how it ended.
pub async fn run_once(
    client: &reqwest::Client,
    source: &FeedSource,
    store: &dyn EventStore,
) -> IngestReport {
    tracing::info!(product = %source.product, "opening feed stream");

    let response = client
        .get(source.events_url())
        .query(&[("access_token", source.access_token.as_str())])
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await;

    // without_url(): the request URL carries the access token.
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            let report = IngestReport::terminated(RelayError::StreamTerminated(format!(
                "connect: {}",
                e.without_url()
            )));
            log_report(&source.product, &report);
            return report;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let report =
            IngestReport::terminated(RelayError::StreamTerminated(format!("http status {status}")));
        log_report(&source.product, &report);
        return report;
    }

    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(reqwest::Error::without_url));
    let report = ingest_stream(&source.product, body, store, source.max_line_length).await;
    log_report(&source.product, &report);
    report
}

/// Spawn [`run_once`] as a detached task and return immediately.
pub fn spawn_run(
    client: reqwest::Client,
    source: FeedSource,
    store: Arc<dyn EventStore>,
) -> JoinHandle<IngestReport> {
    tokio::spawn(async move { run_once(&client, &source, store.as_ref()).await })
}

/// Decode an SSE byte stream and persist each event in arrival order.
///
/// A bad event or a failed save is logged and skipped; a stream error
/// ends the run.
pub async fn ingest_stream<S, B, E>(
    name: &str,
    stream: S,
    store: &dyn EventStore,
    max_line_length: usize,
) -> IngestReport
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = SseDecoder::new(max_line_length);
    let mut report = IngestReport {
        saved: 0,
        duplicates: 0,
        skipped: 0,
        outcome: RunOutcome::Closed,
    };

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                report.outcome = RunOutcome::Terminated(RelayError::StreamTerminated(e.to_string()));
                return report;
            }
        };

        let frames = match decoder.push(chunk.as_ref()) {
            Ok(f) => f,
            Err(e) => {
                report.outcome = RunOutcome::Terminated(e);
                return report;
            }
        };

        for frame in frames {
            match persist(&frame, store).await {
                Ok(SaveOutcome::Stored) => report.saved += 1,
                Ok(SaveOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!(
                        feed = %name,
                        event = frame.event.as_deref().unwrap_or(""),
                        kind = %e.kind(),
                        error = %e,
                        "feed event skipped"
                    );
                }
            }
        }
    }

    report
}

async fn persist(frame: &SseFrame, store: &dyn EventStore) -> Result<SaveOutcome, RelayError> {
    let event = decode_event(frame)?;
    store.save(&event).await.map_err(|e| match e {
        RelayError::Persistence(_) => e,
        other => RelayError::persistence(other),
    })
}

fn log_report(product: &str, report: &IngestReport) {
    match &report.outcome {
        RunOutcome::Closed => tracing::info!(
            %product,
            saved = report.saved,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "feed stream closed"
        ),
        RunOutcome::Terminated(e) => tracing::warn!(
            %product,
            saved = report.saved,
            duplicates = report.duplicates,
            skipped = report.skipped,
            error = %e,
            "feed stream terminated"
        ),
    }
}
