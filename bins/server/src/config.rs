use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use broker_bridge::BrokerConfig;
use feed_ingest::FeedConfig;
use relay_api::OverflowPolicy;
use storage_jsonl::JsonlStoreConfig;
use storage_memory::MemoryStoreConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "relay-server", about = "Event relay: WebSocket gateway, MQTT bridge and feed ingestion")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay
    Serve(ServeArgs),
}

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Feed access token, overrides `[feed] access_token`
    #[arg(long, env = "PARTICLE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Per-connection outbound queue for broker messages.
    #[serde(default = "default_ws_buffer")]
    pub ws_buffer: usize,
    #[serde(default = "default_ws_overflow")]
    pub ws_overflow: OverflowPolicy,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory(MemoryStoreConfig),
    Jsonl(JsonlStoreConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryStoreConfig::default())
    }
}

impl StorageConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageConfig::Memory(_) => "memory",
            StorageConfig::Jsonl(_) => "jsonl",
        }
    }
}

fn default_api_port() -> u16 {
    9200
}
fn default_ws_buffer() -> usize {
    256
}
fn default_ws_overflow() -> OverflowPolicy {
    OverflowPolicy::Drop
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = ServerConfig::parse("").unwrap();
        assert_eq!(cfg.api_port, 9200);
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(
            cfg.broker.startup_topics,
            vec!["p2penergy/test", "p2penergy/photon/events"]
        );
        assert_eq!(cfg.feed.product, "p2p-energy-v100");
        assert!(cfg.feed.source().is_none());
        assert!(matches!(cfg.storage, StorageConfig::Memory(ref m) if m.max_records == 100_000));
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = ServerConfig::parse(
            r#"
            api_port = 8080
            ws_overflow = "back_pressure"

            [broker]
            host = "mqtt.local"
            qos = "at_most_once"
            startup_topics = []

            [feed]
            access_token = "tok"
            autostart = true

            [storage]
            kind = "jsonl"
            path = "/tmp/events.jsonl"
            recent_records = 50
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_port, 8080);
        assert_eq!(cfg.ws_overflow, OverflowPolicy::BackPressure);
        assert_eq!(cfg.broker.host, "mqtt.local");
        assert!(cfg.broker.startup_topics.is_empty());
        assert!(cfg.feed.autostart);
        assert_eq!(cfg.feed.source().unwrap().access_token, "tok");
        match cfg.storage {
            StorageConfig::Jsonl(j) => {
                assert_eq!(j.path, "/tmp/events.jsonl");
                assert_eq!(j.recent_records, 50);
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn shipped_config_parses() {
        let cfg = ServerConfig::parse(include_str!("../../../config.toml")).unwrap();
        assert_eq!(cfg.api_port, 9200);
        assert_eq!(cfg.storage.kind(), "memory");
        assert!(!cfg.feed.autostart);
    }

    #[test]
    fn unknown_storage_kind_is_a_config_error() {
        let err = ServerConfig::parse("[storage]\nkind = \"s3\"\n").unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "parse", .. }));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = ServerConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, ServerError::Config { context: "read", .. }));
    }
}
