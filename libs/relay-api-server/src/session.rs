use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use broker_bridge::topic_matches;
use relay_api::{Broker, BrokerMessage, ClientCommand, RelayError};

/// Frame sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack {
        action: &'static str,
        topic: String,
    },
    Error {
        kind: String,
        error: String,
    },
    Message {
        topic: String,
        payload: String,
    },
}

impl ServerFrame {
    pub fn error(e: &RelayError) -> Self {
        ServerFrame::Error {
            kind: e.kind().to_string(),
            error: e.to_string(),
        }
    }

    pub fn message(msg: &BrokerMessage) -> Self {
        ServerFrame::Message {
            topic: msg.topic.clone(),
            payload: msg.payload_text(),
        }
    }
}

/// Command handling for one client connection.
///
/// Holds the connection's topic filters; nothing here is shared with
/// other connections except the broker handle.
pub struct ClientSession {
    broker: Arc<dyn Broker>,
    filters: BTreeSet<String>,
}

impl ClientSession {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            filters: BTreeSet::new(),
        }
    }

    /// Decode and execute one text frame; the reply goes back to this
    /// connection only.
    pub async fn handle_text(&mut self, raw: &str) -> ServerFrame {
        match self.execute(raw).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "client command rejected");
                ServerFrame::error(&e)
            }
        }
    }

    async fn execute(&mut self, raw: &str) -> Result<ServerFrame, RelayError> {
        let cmd = ClientCommand::parse(raw)?;
        match &cmd {
            ClientCommand::Publish { topic, message } => {
                self.broker
                    .publish(topic, message.clone().into_bytes())
                    .await?;
            }
            ClientCommand::Subscribe { topic } => {
                self.broker.subscribe(topic).await?;
                self.filters.insert(topic.clone());
            }
            ClientCommand::Unsubscribe { topic } => {
                self.filters.remove(topic);
            }
        }
        Ok(ServerFrame::Ack {
            action: cmd.action(),
            topic: cmd.topic().to_string(),
        })
    }

    /// Whether a broker message on `topic` should reach this client.
    pub fn wants(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic_matches(f, topic))
    }
}
