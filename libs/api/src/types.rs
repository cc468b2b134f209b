use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Behaviour of a bounded channel when the receiver falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): drop the message and log it when the channel is full.
    Drop,
    /// .send().await: wait for room (back-pressure on the producer).
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  Event
// ════════════════════════════════════════════════════════════════

/// One event ingested from the external feed.
///
/// Built once by the ingestion worker and never mutated afterwards.
/// `published_at` comes from the feed payload, not from the local
/// clock, so storage order follows the source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event name (SSE `event:` field).
    pub topic: String,
    /// Originating device id, empty when the feed omits it.
    #[serde(default)]
    pub source: String,
    /// Event body as delivered by the feed.
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl Event {
    pub fn new(
        topic: impl Into<String>,
        source: impl Into<String>,
        payload: serde_json::Value,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            source: source.into(),
            payload,
            published_at,
            ttl: None,
        }
    }

    /// Identity used for deduplication in stores.
    pub fn key(&self) -> EventKey {
        EventKey {
            topic: self.topic.clone(),
            source: self.source.clone(),
            published_at: self.published_at,
            payload: self.payload.to_string(),
        }
    }
}

/// Dedup identity of an [`Event`]: two events with the same topic,
/// source, publication time and payload are the same event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventKey {
    topic: String,
    source: String,
    published_at: DateTime<Utc>,
    payload: String,
}

/// Result of [`crate::EventStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    /// An identical event was already stored; nothing was written.
    Duplicate,
}

// ════════════════════════════════════════════════════════════════
//  EventQuery
// ════════════════════════════════════════════════════════════════

/// Sort direction over `published_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Parameters of a store query.
///
/// Results are ordered by `published_at` in `order`; events with equal
/// timestamps keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    /// Only events with this topic.
    pub topic: Option<String>,
    /// Maximum number of events returned.
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: SortOrder,
}

impl EventQuery {
    /// The `n` most recently published events, newest first.
    pub fn most_recent(n: usize) -> Self {
        Self {
            topic: None,
            limit: Some(n),
            order: SortOrder::Desc,
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        self.topic.as_ref().is_none_or(|t| *t == event.topic)
    }

    /// Filter, order and truncate events given in insertion order.
    ///
    /// Uses a stable sort, so equal `published_at` values keep the
    /// order in which they were stored.
    pub fn apply<I>(&self, events: I) -> Vec<Event>
    where
        I: IntoIterator<Item = Event>,
    {
        let mut result: Vec<Event> = events.into_iter().filter(|e| self.matches(e)).collect();
        match self.order {
            SortOrder::Asc => result.sort_by(|a, b| a.published_at.cmp(&b.published_at)),
            SortOrder::Desc => result.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        }
        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}

// ════════════════════════════════════════════════════════════════
//  BrokerMessage
// ════════════════════════════════════════════════════════════════

/// A message delivered by the broker on a subscribed topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
