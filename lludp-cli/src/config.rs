//! Configuration file support for the LLUDP CLI tools

use lludp::server::TransportConfig;
use lludp::AgentId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// A circuit authorised ahead of time, standing in for the login service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Circuit code the viewer will present
    pub code: u32,
    /// Agent id, hyphenated or plain hex
    pub agent: String,
}

impl CircuitConfig {
    pub fn agent_id(&self) -> Result<AgentId, ConfigError> {
        self.agent
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("circuit {}: {}", self.code, e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
    #[serde(default = "default_ack_threshold")]
    pub ack_threshold: usize,
    #[serde(default = "default_max_appended_acks")]
    pub max_appended_acks: usize,
    #[serde(default = "default_max_pending_acks")]
    pub max_pending_acks: usize,
    #[serde(default = "default_resend_timeout")]
    pub resend_timeout_ms: u64,
    #[serde(default = "default_max_resends")]
    pub max_resends: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_sequence_ceiling")]
    pub sequence_ceiling: u32,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Statistics interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    /// Circuits to authorise at startup
    #[serde(default)]
    pub circuits: Vec<CircuitConfig>,
}

fn default_bind() -> SocketAddr {
    TransportConfig::default().bind_addr
}

fn default_inbox_capacity() -> usize {
    TransportConfig::default().inbox_capacity
}

fn default_archive_capacity() -> usize {
    TransportConfig::default().archive_capacity
}

fn default_ack_threshold() -> usize {
    TransportConfig::default().ack_threshold
}

fn default_max_appended_acks() -> usize {
    TransportConfig::default().max_appended_acks
}

fn default_max_pending_acks() -> usize {
    TransportConfig::default().max_pending_acks
}

fn default_resend_timeout() -> u64 {
    4000
}

fn default_max_resends() -> u32 {
    3
}

fn default_idle_timeout() -> u64 {
    60_000
}

fn default_tick_interval() -> u64 {
    500
}

fn default_sequence_ceiling() -> u32 {
    TransportConfig::default().sequence_ceiling
}

fn default_recv_buffer_size() -> usize {
    TransportConfig::default().recv_buffer_size
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            inbox_capacity: default_inbox_capacity(),
            archive_capacity: default_archive_capacity(),
            ack_threshold: default_ack_threshold(),
            max_appended_acks: default_max_appended_acks(),
            max_pending_acks: default_max_pending_acks(),
            resend_timeout_ms: default_resend_timeout(),
            max_resends: default_max_resends(),
            idle_timeout_ms: default_idle_timeout(),
            tick_interval_ms: default_tick_interval(),
            sequence_ceiling: default_sequence_ceiling(),
            recv_buffer_size: default_recv_buffer_size(),
            stats_interval_secs: default_stats_interval(),
            circuits: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Build and validate the transport configuration
    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let config = TransportConfig {
            bind_addr: self.bind,
            inbox_capacity: self.inbox_capacity,
            archive_capacity: self.archive_capacity,
            ack_threshold: self.ack_threshold,
            max_appended_acks: self.max_appended_acks,
            max_pending_acks: self.max_pending_acks,
            resend_timeout: Duration::from_millis(self.resend_timeout_ms),
            max_resends: self.max_resends,
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            sequence_ceiling: self.sequence_ceiling,
            recv_buffer_size: self.recv_buffer_size,
            ..TransportConfig::default()
        };
        config
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(config)
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Test client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address
    pub server: SocketAddr,
    /// Circuit code issued for this session
    pub code: u32,
    /// Agent id
    pub agent: String,
    /// Number of pings to send
    #[serde(default = "default_pings")]
    pub pings: u32,
    /// Delay between pings in milliseconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,
}

fn default_pings() -> u32 {
    5
}

fn default_ping_interval() -> u64 {
    1000
}

impl ClientConfig {
    pub fn agent_id(&self) -> Result<AgentId, ConfigError> {
        self.agent
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("client agent: {}", e)))
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: Option<ServerConfig>,
    /// Client configuration
    pub client: Option<ClientConfig>,
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example server configuration
    pub fn example_server() -> Self {
        Config {
            server: Some(ServerConfig {
                circuits: vec![CircuitConfig {
                    code: 1000,
                    agent: "00000000-0000-0000-0000-000000000001".to_string(),
                }],
                ..ServerConfig::default()
            }),
            client: None,
        }
    }

    /// Create example client configuration
    pub fn example_client() -> Self {
        Config {
            server: None,
            client: Some(ClientConfig {
                server: SocketAddr::from(([127, 0, 0, 1], 9000)),
                code: 1000,
                agent: "00000000-0000-0000-0000-000000000001".to_string(),
                pings: default_pings(),
                ping_interval_ms: default_ping_interval(),
            }),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_configs() {
        let server = Config::example_server();
        assert!(server.server.is_some());
        assert!(server.client.is_none());

        let client = Config::example_client();
        assert_eq!(client.client.unwrap().code, 1000);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = Config::example_server();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&toml).unwrap();

        let server = parsed.server.unwrap();
        assert_eq!(server.circuits.len(), 1);
        assert_eq!(
            server.circuits[0].agent_id().unwrap(),
            AgentId::from_u128(1)
        );
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let parsed = Config::from_toml(
            r#"
            [server]
            bind = "127.0.0.1:9100"
            resend_timeout_ms = 1000
            "#,
        )
        .unwrap();

        let transport = parsed.server.unwrap().transport_config().unwrap();
        assert_eq!(transport.bind_addr.port(), 9100);
        assert_eq!(transport.resend_timeout, Duration::from_secs(1));
        assert_eq!(transport.max_resends, 3);
        assert_eq!(transport.archive_capacity, 200);
        assert_eq!(transport.tick_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_transport_rejected() {
        let config = ServerConfig {
            tick_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.transport_config(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_bad_agent_id() {
        let circuit = CircuitConfig {
            code: 5,
            agent: "nope".to_string(),
        };
        assert!(circuit.agent_id().is_err());
    }
}
