use std::future::Future;
use std::pin::Pin;

use crate::{Event, EventQuery, RelayError, SaveOutcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ════════════════════════════════════════════════════════════════
//  EventStore
// ════════════════════════════════════════════════════════════════

/// Durable home of ingested events.
///
/// Implementations serialize their own writes and must tolerate the same
/// event being saved more than once: a repeated save reports
/// [`SaveOutcome::Duplicate`] and changes nothing.
pub trait EventStore: Send + Sync {
    /// Prepare the backend (create directories, load indexes).
    fn init(&self) -> BoxFuture<'_, Result<(), RelayError>>;

    fn save(&self, event: &Event) -> BoxFuture<'_, Result<SaveOutcome, RelayError>>;

    /// Events ordered by `published_at` as requested; ties keep insertion order.
    fn query(&self, query: &EventQuery) -> BoxFuture<'_, Result<Vec<Event>, RelayError>>;

    fn flush(&self) -> BoxFuture<'_, Result<(), RelayError>>;
}

// ════════════════════════════════════════════════════════════════
//  Broker
// ════════════════════════════════════════════════════════════════

/// Narrow view of the broker connection handed to client-facing code.
///
/// Both operations fail fast with [`RelayError::NotConnected`] while the
/// connection is down; they never wait for a reconnect.
pub trait Broker: Send + Sync {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> BoxFuture<'_, Result<(), RelayError>>;

    /// Register interest in a topic filter. Repeating a subscribe for the
    /// same filter is a no-op.
    fn subscribe(&self, topic: &str) -> BoxFuture<'_, Result<(), RelayError>>;
}
