use std::collections::{HashSet, VecDeque};

use tokio::sync::RwLock;

use relay_api::{BoxFuture, Event, EventKey, EventQuery, EventStore, RelayError, SaveOutcome};

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_max_records() -> usize {
    100_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MemoryStoreConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

struct Inner {
    events: VecDeque<Event>,
    keys: HashSet<EventKey>,
}

/// In-memory ring buffer of events. Once `max_records` is reached the
/// oldest stored event is evicted, which also forgets its dedup key.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    max_records: usize,
}

impl MemoryStore {
    pub fn new(max_records: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                events: VecDeque::with_capacity(max_records.min(65536)),
                keys: HashSet::new(),
            }),
            max_records: max_records.max(1),
        }
    }

    pub fn from_config(config: &MemoryStoreConfig) -> Self {
        Self::new(config.max_records)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl EventStore for MemoryStore {
    fn init(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async { Ok(()) })
    }

    fn save(&self, event: &Event) -> BoxFuture<'_, Result<SaveOutcome, RelayError>> {
        let event = event.clone();
        Box::pin(async move {
            let key = event.key();
            let mut inner = self.inner.write().await;
            if inner.keys.contains(&key) {
                return Ok(SaveOutcome::Duplicate);
            }
            if inner.events.len() >= self.max_records {
                if let Some(evicted) = inner.events.pop_front() {
                    inner.keys.remove(&evicted.key());
                }
            }
            inner.keys.insert(key);
            inner.events.push_back(event);
            Ok(SaveOutcome::Stored)
        })
    }

    fn query(&self, query: &EventQuery) -> BoxFuture<'_, Result<Vec<Event>, RelayError>> {
        let query = query.clone();
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(query.apply(inner.events.iter().cloned()))
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), RelayError>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(topic: &str, payload: i64, second: u32) -> Event {
        Event::new(
            topic,
            "dev",
            serde_json::json!(payload),
            Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, second).unwrap(),
        )
    }

    #[tokio::test]
    async fn duplicate_save_is_a_noop() {
        let store = MemoryStore::new(10);
        let e = event("a", 1, 1);
        assert_eq!(store.save(&e).await.unwrap(), SaveOutcome::Stored);
        assert_eq!(store.save(&e).await.unwrap(), SaveOutcome::Duplicate);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn most_recent_is_newest_first() {
        let store = MemoryStore::new(100);
        for i in 0..8 {
            store.save(&event("a", i, i as u32)).await.unwrap();
        }
        let got = store.query(&EventQuery::most_recent(5)).await.unwrap();
        let payloads: Vec<i64> = got.iter().map(|e| e.payload.as_i64().unwrap()).collect();
        assert_eq!(payloads, vec![7, 6, 5, 4, 3]);
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let store = MemoryStore::new(4);
        assert!(store.is_empty().await);
        assert!(store.query(&EventQuery::most_recent(5)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn evicts_oldest_and_forgets_its_key() {
        let store = MemoryStore::new(2);
        let first = event("a", 1, 1);
        store.save(&first).await.unwrap();
        store.save(&event("a", 2, 2)).await.unwrap();
        store.save(&event("a", 3, 3)).await.unwrap();
        assert_eq!(store.len().await, 2);

        // evicted, so it can be stored again
        assert_eq!(store.save(&first).await.unwrap(), SaveOutcome::Stored);
    }
}
