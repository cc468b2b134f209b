use serde::Deserialize;

use crate::RelayError;

/// Instruction sent by a client over its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Publish { topic: String, message: String },
    Subscribe { topic: String },
    /// Drop this connection's interest in a topic. The broker
    /// subscription itself is shared and stays in place.
    Unsubscribe { topic: String },
}

/// Wire envelope: `{"action": "...", "topic": "...", "message": ...}`.
#[derive(Deserialize)]
struct Envelope {
    action: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl ClientCommand {
    /// Decode one text frame. Any structural problem is reported as
    /// [`RelayError::MalformedCommand`].
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let env: Envelope = serde_json::from_str(raw)
            .map_err(|e| RelayError::MalformedCommand(format!("parse: {e}")))?;

        let topic = match env.topic {
            Some(t) if !t.is_empty() => t,
            _ => return Err(RelayError::MalformedCommand("missing topic".into())),
        };

        match env.action.as_str() {
            "publish" => {
                let message = match env.message {
                    Some(serde_json::Value::String(s)) => s,
                    Some(serde_json::Value::Null) | None => {
                        return Err(RelayError::MalformedCommand("missing message".into()));
                    }
                    // Structured messages are forwarded as their JSON text.
                    Some(other) => other.to_string(),
                };
                Ok(ClientCommand::Publish { topic, message })
            }
            "subscribe" => Ok(ClientCommand::Subscribe { topic }),
            "unsubscribe" => Ok(ClientCommand::Unsubscribe { topic }),
            other => Err(RelayError::MalformedCommand(format!("unknown action '{other}'"))),
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ClientCommand::Publish { .. } => "publish",
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            ClientCommand::Publish { topic, .. }
            | ClientCommand::Subscribe { topic }
            | ClientCommand::Unsubscribe { topic } => topic,
        }
    }
}
