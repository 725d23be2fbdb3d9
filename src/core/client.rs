use log::{debug, warn};
use std::net::SocketAddr;

use crate::core::protocol::{Request, Response};
use crate::core::TransportConfig;
use crate::network::Transport;
use crate::utils::Result;

/// Talks to the directory. Each call is one connection carrying one request
/// and one response.
///
/// Calls never fail with `Err`: connect, timeout and decode failures come
/// back as an error-status [`Response`] carrying the failure text.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    directory_addr: String,
    transport: TransportConfig,
}

impl DirectoryClient {
    pub fn new(directory_addr: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            directory_addr: directory_addr.into(),
            transport,
        }
    }

    pub fn directory_addr(&self) -> &str {
        &self.directory_addr
    }

    pub async fn join(&self, peer_id: &str, address: SocketAddr) -> Response {
        self.send(Request::Join {
            peer_id: peer_id.to_string(),
            peer_address: address,
        })
        .await
    }

    pub async fn upload_index(&self, peer_id: &str, names: Vec<String>) -> Response {
        self.send(Request::UploadIndex {
            peer_id: peer_id.to_string(),
            resources: names,
        })
        .await
    }

    pub async fn retrieve_index(&self) -> Response {
        self.send(Request::RetrieveIndex).await
    }

    pub async fn leave(&self, peer_id: &str) -> Response {
        self.send(Request::Leave {
            peer_id: peer_id.to_string(),
        })
        .await
    }

    pub async fn retrieve_peers(&self) -> Response {
        self.send(Request::RetrievePeers).await
    }

    /// Pre-join probe: true only if the directory answered and does not list
    /// `peer_id`. Another node can still claim the id between this check and
    /// its own join.
    pub async fn check_peer_id_unique(&self, peer_id: &str) -> bool {
        let response = self.retrieve_peers().await;
        if !response.is_success() {
            warn!("Could not check peer id: {}", response.error_message());
            return false;
        }
        let taken = response
            .peers
            .as_ref()
            .is_some_and(|peers| peers.contains_key(peer_id));
        if taken {
            warn!("Peer id {} is already in use", peer_id);
        }
        !taken
    }

    async fn send(&self, request: Request) -> Response {
        let action = request.action();
        let result: Result<Response> =
            Transport::exchange(&self.directory_addr, &request, &self.transport).await;
        match result {
            Ok(response) => {
                debug!("Directory answered {}: {:?}", action, response.status);
                response
            }
            Err(e) => {
                warn!("Directory request {} failed: {}", action, e);
                Response::error(e.to_string())
            }
        }
    }
}
