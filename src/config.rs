//! Configuration management

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;
use crate::error::NetworkError;
use crate::participant::Participant;

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session label, used in logs and thread names
    pub name: String,

    /// Payload type stamped on every outgoing data packet
    pub payload_type: u8,

    /// Participant this process represents
    pub local: ParticipantConfig,

    /// Initial description of the peer
    pub remote: ParticipantConfig,

    /// Socket options
    pub network: NetworkConfig,

    /// Announce on init and say goodbye on terminate
    pub automated_control: bool,

    /// Overwrite the sender identifier of outgoing data packets with the local one
    pub stamp_sender_id: bool,

    /// Canonical name advertised in session descriptions (defaults to `name`)
    pub cname: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "session".to_string(),
            payload_type: DEFAULT_PAYLOAD_TYPE,
            local: ParticipantConfig::default(),
            remote: ParticipantConfig {
                data_port: DEFAULT_DATA_PORT + 1000,
                control_port: DEFAULT_CONTROL_PORT + 1000,
                ..Default::default()
            },
            network: NetworkConfig::default(),
            automated_control: false,
            stamp_sender_id: true,
            cname: None,
        }
    }
}

impl SessionConfig {
    /// Config for a session between `local` and `remote`
    pub fn new(name: impl Into<String>, payload_type: u8, local: ParticipantConfig, remote: ParticipantConfig) -> Self {
        Self {
            name: name.into(),
            payload_type,
            local,
            remote,
            ..Default::default()
        }
    }

    /// Load configuration from file
    pub fn load(path: &PathBuf) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rtp-duo", "rtp-duo")
            .map(|dirs| dirs.config_dir().join("session.toml"))
    }
}

/// Host, ports and optional identifier of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub host: String,
    pub data_port: u16,
    pub control_port: u16,

    /// Known identifier; `None` means learned (remote) or generated (local)
    pub id: Option<u32>,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            data_port: DEFAULT_DATA_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            id: None,
        }
    }
}

impl ParticipantConfig {
    pub fn new(host: impl Into<String>, data_port: u16, control_port: u16) -> Self {
        Self {
            host: host.into(),
            data_port,
            control_port,
            id: None,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    /// Resolve host and ports into a participant
    pub fn resolve(&self) -> Result<Participant, NetworkError> {
        let data_address = resolve_address(&self.host, self.data_port)?;
        let control_address = resolve_address(&self.host, self.control_port)?;
        Ok(match self.id {
            Some(id) => Participant::new(data_address, control_address, id),
            None => Participant::anonymous(data_address, control_address),
        })
    }
}

fn resolve_address(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::AddressResolution(format!("{}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| NetworkError::AddressResolution(format!("{}:{}: no addresses", host, port)))
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Socket send buffer size
    pub send_buffer_size: usize,

    /// Socket receive buffer size
    pub recv_buffer_size: usize,

    /// Enable SO_REUSEADDR
    pub reuse_addr: bool,

    /// Largest datagram a receive loop accepts
    pub datagram_buffer_len: usize,

    /// Receive loop wake-up interval
    pub read_timeout_ms: u64,

    /// Upper bound for a blocked send
    pub write_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            // a second session on the same port must fail to bind
            reuse_addr: false,
            datagram_buffer_len: DEFAULT_DATAGRAM_BUFFER_LEN,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_toml() {
        let config: SessionConfig = toml::from_str(
            r#"
            name = "Session1"
            payload_type = 0

            [local]
            host = "127.0.0.1"
            data_port = 6000
            control_port = 6001
            id = 1

            [remote]
            data_port = 7000
            control_port = 7001

            [network]
            read_timeout_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "Session1");
        assert_eq!(config.payload_type, 0);
        assert_eq!(config.local.id, Some(1));
        assert_eq!(config.remote.host, "127.0.0.1");
        assert_eq!(config.remote.id, None);
        assert_eq!(config.network.read_timeout(), Duration::from_millis(20));
        assert_eq!(config.network.datagram_buffer_len, DEFAULT_DATAGRAM_BUFFER_LEN);
        assert!(config.stamp_sender_id);
        assert!(!config.automated_control);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("rtp-duo-config-{}.toml", std::process::id()));
        let mut config = SessionConfig::new(
            "saved",
            96,
            ParticipantConfig::new("127.0.0.1", 6000, 6001).with_id(7),
            ParticipantConfig::new("localhost", 7000, 7001),
        );
        config.cname = Some("saved@host".to_string());

        config.save(&path).unwrap();
        let loaded = SessionConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.name, "saved");
        assert_eq!(loaded.payload_type, 96);
        assert_eq!(loaded.local, config.local);
        assert_eq!(loaded.remote, config.remote);
        assert_eq!(loaded.cname.as_deref(), Some("saved@host"));
    }

    #[test]
    fn test_resolve_participant() {
        let participant = ParticipantConfig::new("127.0.0.1", 7000, 7001)
            .with_id(2)
            .resolve()
            .unwrap();

        assert_eq!(participant.id(), Some(2));
        assert_eq!(participant.data_address(), "127.0.0.1:7000".parse().unwrap());
        assert_eq!(participant.control_address(), "127.0.0.1:7001".parse().unwrap());

        let unresolvable = ParticipantConfig::new("no such host.invalid", 1, 2).resolve();
        assert!(matches!(unresolvable, Err(NetworkError::AddressResolution(_))));
    }
}
