pub mod server;
pub mod transport;

pub use server::{RequestHandler, Server, ServerHandle};
pub use transport::Transport;
