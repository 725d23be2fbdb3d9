use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::utils::{P2PError, Result};

/// Unroutable private address used only to make the kernel pick a source
/// interface. Nothing is ever sent to it.
const PROBE_ADDR: ([u8; 4], u16) = ([10, 254, 254, 254], 1);

pub struct NodeUtils;

impl NodeUtils {
    /// Best guess at the address other hosts can reach us on.
    ///
    /// Falls back to loopback when the host has no usable route.
    pub fn local_ip() -> IpAddr {
        match Self::probe_outbound_ip() {
            Ok(ip) => {
                debug!("Outbound interface address: {}", ip);
                ip
            }
            Err(e) => {
                warn!("Could not determine local IP, using loopback: {}", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    fn probe_outbound_ip() -> Result<IpAddr> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| P2PError::NetworkError(format!("Failed to create socket: {}", e)))?;

        // UDP connect only selects a route; no packet leaves the host.
        let target = SocketAddr::from(PROBE_ADDR);
        socket
            .connect(&target.into())
            .map_err(|e| P2PError::NetworkError(format!("Failed to route to {}: {}", target, e)))?;

        let local = socket
            .local_addr()
            .map_err(|e| P2PError::NetworkError(format!("Failed to read local address: {}", e)))?;

        local
            .as_socket()
            .map(|addr| addr.ip())
            .filter(|ip| !ip.is_unspecified())
            .ok_or_else(|| P2PError::NetworkError("No outbound interface address".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ip_is_never_unspecified() {
        let ip = NodeUtils::local_ip();
        assert!(!ip.is_unspecified());
    }
}
