//! Mini Rendezvous
//!
//! Peer-to-peer resource sharing around a single directory service. The
//! directory tracks who is online and who owns which resource name; peers
//! fetch resource bytes directly from each other.

pub mod core;
pub mod network;
pub mod storage;
pub mod utils;

// Re-export main types
pub use crate::core::{
    Directory, DirectoryClient, DirectoryConfig, FetchOutcome, MembershipState, PeerConfig,
    PeerNode, Request, Response, Status, TransportConfig,
};
pub use network::Transport;
pub use storage::{FileManager, LocalResourceStore};
pub use utils::{
    NodeUtils,
    error::{P2PError, Result},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
