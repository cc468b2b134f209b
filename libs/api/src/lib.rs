//! Shared vocabulary of the event relay: events, client commands,
//! the storage and broker seams, and the common error type.

pub mod command;
pub mod error;
pub mod store;
pub mod types;

pub use command::ClientCommand;
pub use error::{ErrorKind, RelayError};
pub use store::{BoxFuture, Broker, EventStore};
pub use types::{
    BrokerMessage, Event, EventKey, EventQuery, OverflowPolicy, SaveOutcome, SortOrder,
};
