use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_api::EventStore;

use crate::{FeedSource, IngestReport, run_once};

/// Exponential backoff between ingestion runs.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next run. A run that stored something resets the
    /// backoff; an unproductive one doubles it up to the cap.
    pub fn next_delay(&mut self, report: &IngestReport) -> Duration {
        if report.saved > 0 {
            self.current = self.initial;
            return self.current;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Re-invokes [`run_once`] until cancelled.
pub struct Supervisor {
    client: reqwest::Client,
    source: FeedSource,
    store: Arc<dyn EventStore>,
    backoff: Backoff,
}

impl Supervisor {
    pub fn new(
        client: reqwest::Client,
        source: FeedSource,
        store: Arc<dyn EventStore>,
        backoff: Backoff,
    ) -> Self {
        Self {
            client,
            source,
            store,
            backoff,
        }
    }

    pub fn spawn(mut self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(product = %self.source.product, "feed supervisor started");
            let mut runs: u64 = 0;
            loop {
                let report = tokio::select! {
                    r = run_once(&self.client, &self.source, self.store.as_ref()) => r,
                    _ = token.cancelled() => break,
                };
                runs += 1;

                let delay = self.backoff.next_delay(&report);
                tracing::info!(
                    product = %self.source.product,
                    runs,
                    delay_ms = delay.as_millis() as u64,
                    "feed run ended, restarting after delay"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => break,
                }
            }
            tracing::info!(product = %self.source.product, "feed supervisor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunOutcome;
    use relay_api::RelayError;

    fn report(saved: usize) -> IngestReport {
        IngestReport {
            saved,
            duplicates: 0,
            skipped: 0,
            outcome: RunOutcome::Terminated(RelayError::StreamTerminated("eof".into())),
        }
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let delays: Vec<u128> = (0..4).map(|_| b.next_delay(&report(0)).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);

        assert_eq!(b.next_delay(&report(3)), Duration::from_millis(100));
        assert_eq!(b.next_delay(&report(0)), Duration::from_millis(100));
        assert_eq!(b.next_delay(&report(0)), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn stops_on_cancel() {
        let store: Arc<dyn EventStore> = Arc::new(storage_memory::MemoryStore::new(10));
        let source = FeedSource {
            base_url: "http://127.0.0.1:9".into(),
            product: "p".into(),
            access_token: "t".into(),
            max_line_length: 0,
        };
        let token = CancellationToken::new();
        let handle = Supervisor::new(
            reqwest::Client::new(),
            source,
            store,
            Backoff::new(Duration::from_secs(30), Duration::from_secs(60)),
        )
        .spawn(token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap();
    }
}
