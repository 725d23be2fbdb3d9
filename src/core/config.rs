use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::utils::{P2PError, Result};

pub const DEFAULT_DIRECTORY_PORT: u16 = 65432;

/// Upper bound on the JSON around a hex resource payload:
/// `{"status":"success","resource":""}` plus slack.
pub const RESPONSE_ENVELOPE_LEN: usize = 64;

/// Limits shared by every listener and outbound call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    /// Bound on a whole request/response exchange once connected.
    pub io_timeout: Duration,
    pub max_message_size: usize,
    /// Concurrent sessions a listener will serve before it stops accepting.
    pub max_connections: usize,
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(P2PError::ConfigError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_message_size <= RESPONSE_ENVELOPE_LEN {
            return Err(P2PError::ConfigError(format!(
                "max_message_size must exceed {} bytes",
                RESPONSE_ENVELOPE_LEN
            )));
        }
        Ok(())
    }

    /// Largest resource whose hex-encoded response still fits in one
    /// message.
    pub fn max_resource_size(&self) -> usize {
        self.max_message_size.saturating_sub(RESPONSE_ENVELOPE_LEN) / 2
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(10),
            max_message_size: 16 * 1024 * 1024,
            max_connections: 64,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub listen_addr: SocketAddr,
    pub transport: TransportConfig,
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_DIRECTORY_PORT,
            ),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub peer_id: String,
    /// `host:port` of the directory service.
    pub directory_addr: String,
    /// Interface the resource server binds and advertises. `None` picks the
    /// outbound interface address.
    pub listen_host: Option<IpAddr>,
    /// 0 selects an ephemeral port.
    pub listen_port: u16,
    pub download_dir: PathBuf,
    pub transport: TransportConfig,
}

impl PeerConfig {
    pub fn generate_peer_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("peer-{}", &id[..8])
    }

    pub fn validate(&self) -> Result<()> {
        if self.peer_id.trim().is_empty() {
            return Err(P2PError::ConfigError("peer id must not be empty".to_string()));
        }
        if self.directory_addr.trim().is_empty() {
            return Err(P2PError::ConfigError(
                "directory address must not be empty".to_string(),
            ));
        }
        self.transport.validate()
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            peer_id: Self::generate_peer_id(),
            directory_addr: format!("127.0.0.1:{}", DEFAULT_DIRECTORY_PORT),
            listen_host: None,
            listen_port: 0,
            download_dir: PathBuf::from("downloaded_files"),
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_peer_ids_differ() {
        let a = PeerConfig::generate_peer_id();
        let b = PeerConfig::generate_peer_id();
        assert!(a.starts_with("peer-"));
        assert_eq!(a.len(), "peer-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_blank_peer_id() {
        let config = PeerConfig {
            peer_id: "  ".to_string(),
            ..PeerConfig::default()
        };
        assert!(matches!(config.validate(), Err(P2PError::ConfigError(_))));
        assert!(PeerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_connections() {
        let transport = TransportConfig {
            max_connections: 0,
            ..TransportConfig::default()
        };
        let directory = DirectoryConfig {
            transport: transport.clone(),
            ..DirectoryConfig::default()
        };
        assert!(matches!(directory.validate(), Err(P2PError::ConfigError(_))));

        let peer = PeerConfig {
            transport,
            ..PeerConfig::default()
        };
        assert!(matches!(peer.validate(), Err(P2PError::ConfigError(_))));
        assert!(DirectoryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_max_resource_size_accounts_for_hex() {
        let transport = TransportConfig {
            max_message_size: 1024,
            ..TransportConfig::default()
        };
        assert_eq!(transport.max_resource_size(), (1024 - RESPONSE_ENVELOPE_LEN) / 2);

        let encoded = serde_json::to_vec(
            &crate::core::Response::success().with_resource(vec![0xab; transport.max_resource_size()]),
        )
        .unwrap();
        assert!(encoded.len() <= transport.max_message_size);
    }
}
