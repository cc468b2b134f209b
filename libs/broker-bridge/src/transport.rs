use relay_api::{BrokerMessage, RelayError};

use crate::Qos;

/// What the transport task reports to the bridge core, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connecting,
    /// The broker accepted the session.
    Connected,
    Disconnected(String),
    Message(BrokerMessage),
}

/// Outbound half of the transport.
///
/// Calls only enqueue a request and return; they never wait on the
/// network, so callers holding locks cannot stall the event loop.
pub trait MqttClient: Send + Sync {
    fn publish(&self, topic: &str, qos: Qos, payload: Vec<u8>) -> Result<(), RelayError>;

    fn subscribe(&self, filter: &str, qos: Qos) -> Result<(), RelayError>;

    /// All `filters` in one SUBSCRIBE request.
    fn subscribe_many(&self, filters: &[String], qos: Qos) -> Result<(), RelayError>;
}
