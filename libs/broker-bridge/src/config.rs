use serde::Deserialize;

/// MQTT quality of service used for every publish and subscribe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl From<Qos> for rumqttc::QoS {
    fn from(q: Qos) -> Self {
        match q {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// `[broker]` section of the server config.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Pause between a transport error and the next connect attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Capacity of the outbound request queue to the MQTT event loop.
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
    /// Capacity of the inbound broadcast. Slow receivers lose the oldest messages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub qos: Qos,
    /// Subscribed on every (re)connect.
    #[serde(default = "default_startup_topics")]
    pub startup_topics: Vec<String>,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "event-relay".into()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_request_capacity() -> usize {
    64
}
fn default_channel_capacity() -> usize {
    1024
}
fn default_startup_topics() -> Vec<String> {
    vec!["p2penergy/test".into(), "p2penergy/photon/events".into()]
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_capacity: default_request_capacity(),
            channel_capacity: default_channel_capacity(),
            qos: Qos::default(),
            startup_topics: default_startup_topics(),
        }
    }
}
