use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::client::DirectoryClient;
use crate::core::protocol::{RESOURCE_NOT_FOUND, Request, ResourceIndex, Response};
use crate::core::PeerConfig;
use crate::network::{RequestHandler, Server, ServerHandle, Transport};
use crate::storage::{FileManager, LocalResourceStore};
use crate::utils::{NodeUtils, P2PError, Result};

/// Where a node stands with the directory. The resource server runs in
/// every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Unregistered,
    Joined,
    Left,
}

/// Result of [`PeerNode::request_resource_from_peer`]. Every failure is
/// reported here rather than as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Retrieved {
        name: String,
        peer_id: String,
        path: PathBuf,
        size: usize,
    },
    /// The cached index has no owner for the name.
    NotInNetwork { name: String },
    /// The owner is no longer listed by the directory.
    PeerAddressNotFound { peer_id: String },
    /// The owner answered with an error status.
    Rejected { peer_id: String, message: String },
    /// The owner closed the connection without answering.
    NoData { peer_id: String },
    TransportFailed { message: String },
    SaveFailed { name: String, message: String },
}

impl FetchOutcome {
    pub fn is_retrieved(&self) -> bool {
        matches!(self, FetchOutcome::Retrieved { .. })
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Retrieved {
                name,
                peer_id,
                path,
                size,
            } => write!(
                f,
                "Retrieved resource {} ({} bytes) from peer {} into {:?}",
                name, size, peer_id, path
            ),
            FetchOutcome::NotInNetwork { name } => {
                write!(f, "Resource {} not found in network", name)
            }
            FetchOutcome::PeerAddressNotFound { peer_id } => {
                write!(f, "Peer {} address not found", peer_id)
            }
            FetchOutcome::Rejected { peer_id, message } => {
                write!(f, "Peer {} refused the request: {}", peer_id, message)
            }
            FetchOutcome::NoData { peer_id } => write!(f, "No data received from peer {}", peer_id),
            FetchOutcome::TransportFailed { message } => write!(f, "Transfer failed: {}", message),
            FetchOutcome::SaveFailed { name, message } => {
                write!(f, "Could not save resource {}: {}", name, message)
            }
        }
    }
}

/// Answers `request_resource` from the local store only. Other actions get
/// no reply.
pub struct ResourceService {
    store: Arc<RwLock<LocalResourceStore>>,
}

impl ResourceService {
    pub fn new(store: Arc<RwLock<LocalResourceStore>>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestHandler for ResourceService {
    async fn handle(&self, request: Request, from: SocketAddr) -> Option<Response> {
        match request {
            Request::RequestResource { resource_name } => {
                let store = self.store.read().await;
                let response = match store.get(&resource_name) {
                    Some(data) => {
                        info!(
                            "Serving {} ({} bytes) to {}",
                            resource_name,
                            data.len(),
                            from
                        );
                        Response::success().with_resource(data.to_vec())
                    }
                    None => {
                        debug!("{} asked for unknown resource {}", from, resource_name);
                        Response::error(RESOURCE_NOT_FOUND)
                    }
                };
                Some(response)
            }
            other => {
                debug!("Ignoring {} from {}", other.action(), from);
                None
            }
        }
    }
}

/// A participant in the overlay: directory client and resource server.
pub struct PeerNode {
    config: PeerConfig,
    address: SocketAddr,
    client: DirectoryClient,
    store: Arc<RwLock<LocalResourceStore>>,
    remote_index: RwLock<ResourceIndex>,
    state: RwLock<MembershipState>,
    file_manager: FileManager,
    server: ServerHandle,
}

impl PeerNode {
    /// Binds the resource server and starts serving immediately, before any
    /// contact with the directory.
    pub async fn new(config: PeerConfig) -> Result<Self> {
        config.validate()?;

        let host = config.listen_host.unwrap_or_else(NodeUtils::local_ip);
        let store = Arc::new(RwLock::new(LocalResourceStore::new()));
        let service = Arc::new(ResourceService::new(store.clone()));

        let server = Server::bind(
            "resource-server",
            SocketAddr::new(host, config.listen_port),
            service,
            config.transport.clone(),
        )
        .await?
        .spawn()?;
        let address = server.local_addr();

        let client = DirectoryClient::new(config.directory_addr.clone(), config.transport.clone());
        let file_manager = FileManager::new(config.download_dir.clone());

        info!("Peer {} started at {}", config.peer_id, address);

        Ok(Self {
            config,
            address,
            client,
            store,
            remote_index: RwLock::new(ResourceIndex::new()),
            state: RwLock::new(MembershipState::Unregistered),
            file_manager,
            server,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.config.peer_id
    }

    /// The resource-server address advertised to the directory.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.client
    }

    pub async fn state(&self) -> MembershipState {
        *self.state.read().await
    }

    pub async fn local_resource_names(&self) -> Vec<String> {
        self.store.read().await.names()
    }

    /// The index as of the last successful [`retrieve_index`](Self::retrieve_index).
    pub async fn remote_index(&self) -> ResourceIndex {
        self.remote_index.read().await.clone()
    }

    pub async fn join(&self) -> Response {
        let response = self.client.join(self.peer_id(), self.address).await;
        if response.is_success() {
            *self.state.write().await = MembershipState::Joined;
            info!("Joined network as {}", self.peer_id());
        }
        response
    }

    /// Publishes every local resource name under this node's id.
    pub async fn upload_index(&self) -> Response {
        let names = self.local_resource_names().await;
        let count = names.len();
        let response = self.client.upload_index(self.peer_id(), names).await;
        if response.is_success() {
            info!("Uploaded index of {} resources", count);
        }
        response
    }

    /// Fetches the directory index and replaces the cached copy with it.
    pub async fn retrieve_index(&self) -> Response {
        let response = self.client.retrieve_index().await;
        if response.is_success() {
            let index = response.resources.clone().unwrap_or_default();
            debug!("Cached index of {} resources", index.len());
            *self.remote_index.write().await = index;
        }
        response
    }

    pub async fn leave(&self) -> Response {
        let response = self.client.leave(self.peer_id()).await;
        if response.is_success() {
            let mut state = self.state.write().await;
            if *state == MembershipState::Joined {
                *state = MembershipState::Left;
            }
            info!("Left network");
        }
        response
    }

    pub async fn retrieve_peers(&self) -> Response {
        self.client.retrieve_peers().await
    }

    /// Adds content under `name` without publishing it. Names are single
    /// path components, and content must fit in one response frame.
    pub async fn add_resource_bytes(&self, name: &str, data: Vec<u8>) -> Result<()> {
        if FileManager::sanitize_name(name)? != name {
            return Err(P2PError::InvalidResourceName(name.to_string()));
        }
        if data.len() > self.config.transport.max_resource_size() {
            return Err(P2PError::MessageTooLarge(data.len()));
        }
        let size = data.len();
        self.store.write().await.insert(name.to_string(), data);
        info!("Added resource {} ({} bytes)", name, size);
        Ok(())
    }

    /// Reads a file into the local store and publishes the updated index.
    ///
    /// A read failure is an `Err`; a failed publish is reported in the
    /// returned response and leaves the resource stored locally.
    pub async fn add_resource(&self, path: &Path) -> Result<Response> {
        let (name, data) = FileManager::read_resource(path).await?;
        self.add_resource_bytes(&name, data).await?;

        let response = self.upload_index().await;
        if !response.is_success() {
            warn!(
                "Resource {} stored but not published: {}",
                name,
                response.error_message()
            );
        }
        Ok(response)
    }

    /// Fetches `name` directly from its owner as listed in the cached index
    /// and writes it to the download directory.
    ///
    /// The owner's address is always resolved fresh from the directory. The
    /// cached index may be stale, in which case the owner answers "Resource
    /// not found" and the outcome is [`FetchOutcome::Rejected`].
    pub async fn request_resource_from_peer(&self, name: &str) -> FetchOutcome {
        let owner = self.remote_index.read().await.get(name).cloned();
        let Some(peer_id) = owner else {
            return FetchOutcome::NotInNetwork {
                name: name.to_string(),
            };
        };

        let peers = self.client.retrieve_peers().await;
        if !peers.is_success() {
            return FetchOutcome::TransportFailed {
                message: peers.error_message().to_string(),
            };
        }
        let Some(peer_addr) = peers.peers.and_then(|p| p.get(&peer_id).copied()) else {
            return FetchOutcome::PeerAddressNotFound { peer_id };
        };

        info!("Connecting to peer {} at {}", peer_id, peer_addr);
        let request = Request::RequestResource {
            resource_name: name.to_string(),
        };
        let response: Response =
            match Transport::exchange(&peer_addr.to_string(), &request, &self.config.transport)
                .await
            {
                Ok(response) => response,
                Err(P2PError::ConnectionClosed) => return FetchOutcome::NoData { peer_id },
                Err(e) => {
                    warn!("Transfer of {} from {} failed: {}", name, peer_id, e);
                    return FetchOutcome::TransportFailed {
                        message: e.to_string(),
                    };
                }
            };

        if !response.is_success() {
            return FetchOutcome::Rejected {
                peer_id,
                message: response.error_message().to_string(),
            };
        }
        let Some(data) = response.resource else {
            return FetchOutcome::NoData { peer_id };
        };

        match self.file_manager.save_download(name, &data).await {
            Ok(path) => FetchOutcome::Retrieved {
                name: name.to_string(),
                peer_id,
                path,
                size: data.len(),
            },
            Err(e) => FetchOutcome::SaveFailed {
                name: name.to_string(),
                message: e.to_string(),
            },
        }
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
        info!("Peer {} stopped", self.config.peer_id);
    }
}
