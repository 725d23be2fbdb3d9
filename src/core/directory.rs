use async_trait::async_trait;
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::protocol::{PeerMap, Request, ResourceIndex, Response, UNKNOWN_ACTION};
use crate::core::DirectoryConfig;
use crate::network::{RequestHandler, Server, ServerHandle};
use crate::utils::Result;

/// Membership and the resource index.
///
/// Every mutation is a plain overwrite or removal. A name has at most one
/// owner and the last `upload_index` for it wins.
#[derive(Debug, Default, Clone)]
pub struct DirectoryState {
    peers: PeerMap,
    resources: ResourceIndex,
}

impl DirectoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, request: Request) -> Response {
        match request {
            Request::Join {
                peer_id,
                peer_address,
            } => self.join(peer_id, peer_address),
            Request::UploadIndex { peer_id, resources } => self.upload_index(&peer_id, resources),
            Request::RetrieveIndex => self.retrieve_index(),
            Request::Leave { peer_id } => self.leave(&peer_id),
            Request::RetrievePeers => self.retrieve_peers(),
            Request::RequestResource { .. } | Request::Unknown => Response::error(UNKNOWN_ACTION),
        }
    }

    /// Uniqueness is not enforced; a second join under the same id replaces
    /// the first address.
    pub fn join(&mut self, peer_id: String, address: SocketAddr) -> Response {
        if let Some(previous) = self.peers.insert(peer_id.clone(), address) {
            if previous != address {
                info!("Peer {} moved from {} to {}", peer_id, previous, address);
            }
        } else {
            info!("Peer {} joined at {} ({} online)", peer_id, address, self.peers.len());
        }
        Response::success().with_peers(self.peers.clone())
    }

    /// Membership is not checked: a peer that already left can still
    /// advertise names.
    pub fn upload_index(&mut self, peer_id: &str, names: Vec<String>) -> Response {
        let count = names.len();
        for name in names {
            if let Some(previous) = self.resources.insert(name.clone(), peer_id.to_string()) {
                if previous != peer_id {
                    debug!("Resource {} now owned by {} (was {})", name, peer_id, previous);
                }
            }
        }
        debug!("Peer {} published {} resource names", peer_id, count);
        Response::success()
    }

    pub fn retrieve_index(&self) -> Response {
        Response::success().with_resources(self.resources.clone())
    }

    /// Removes the peer and every name currently attributed to it. Leaving
    /// without having joined is a successful no-op.
    pub fn leave(&mut self, peer_id: &str) -> Response {
        let was_member = self.peers.remove(peer_id).is_some();
        let before = self.resources.len();
        self.resources.retain(|_, owner| owner != peer_id);
        let dropped = before - self.resources.len();

        if was_member || dropped > 0 {
            info!(
                "Peer {} left, {} resource names withdrawn ({} online)",
                peer_id,
                dropped,
                self.peers.len()
            );
        }
        Response::success()
    }

    pub fn retrieve_peers(&self) -> Response {
        Response::success().with_peers(self.peers.clone())
    }

    pub fn peers(&self) -> &PeerMap {
        &self.peers
    }

    pub fn resources(&self) -> &ResourceIndex {
        &self.resources
    }
}

/// Serializes every request through one lock, so each action (including the
/// two-step `leave`) is atomic with respect to all others.
pub struct DirectoryService {
    state: Mutex<DirectoryState>,
}

impl DirectoryService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DirectoryState::new()),
        }
    }

    pub async fn snapshot(&self) -> DirectoryState {
        self.state.lock().await.clone()
    }
}

impl Default for DirectoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestHandler for DirectoryService {
    async fn handle(&self, request: Request, from: SocketAddr) -> Option<Response> {
        debug!("Directory request {} from {}", request.action(), from);
        let response = self.state.lock().await.apply(request);
        Some(response)
    }
}

/// The running rendezvous service.
pub struct Directory {
    service: Arc<DirectoryService>,
    server: ServerHandle,
}

impl Directory {
    pub async fn start(config: DirectoryConfig) -> Result<Self> {
        config.validate()?;

        let service = Arc::new(DirectoryService::new());
        let server = Server::bind(
            "directory",
            config.listen_addr,
            service.clone(),
            config.transport,
        )
        .await?
        .spawn()?;

        info!("Directory service started at {}", server.local_addr());
        Ok(Self { service, server })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub async fn snapshot(&self) -> DirectoryState {
        self.service.snapshot().await
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
        info!("Directory service stopped");
    }
}
