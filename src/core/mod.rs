pub mod client;
pub mod config;
pub mod directory;
pub mod node;
pub mod protocol;

pub use client::DirectoryClient;
pub use config::{DirectoryConfig, PeerConfig, TransportConfig};
pub use directory::{Directory, DirectoryService, DirectoryState};
pub use node::{FetchOutcome, MembershipState, PeerNode, ResourceService};
pub use protocol::{PeerMap, Request, ResourceIndex, Response, Status};
