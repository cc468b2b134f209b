//! Broker Bridge: the single MQTT connection of the relay.
//!
//! The bridge core owns the connection state machine and the
//! subscription set. It is fed [`TransportEvent`]s by the transport
//! task and talks back through [`MqttClient`]. Client-facing code only
//! sees a [`BrokerHandle`].

mod bridge;
pub mod config;
mod filter;
mod mqtt;
mod state;
mod transport;

pub use bridge::{BrokerBridge, BrokerHandle};
pub use config::{BrokerConfig, Qos};
pub use filter::topic_matches;
pub use mqtt::RumqttClient;
pub use state::ConnectionState;
pub use transport::{MqttClient, TransportEvent};
