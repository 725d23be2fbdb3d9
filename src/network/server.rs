use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

use crate::core::{Request, Response, TransportConfig};
use crate::network::Transport;
use crate::utils::{P2PError, Result};

/// Serves one decoded request per connection.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Returning `None` closes the connection without a reply.
    async fn handle(&self, request: Request, from: SocketAddr) -> Option<Response>;
}

/// Owns a running accept loop. Dropping the handle stops accepting new
/// connections; sessions already in flight run to completion.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

pub struct Server<H> {
    name: &'static str,
    listener: TcpListener,
    handler: Arc<H>,
    config: TransportConfig,
}

impl<H: RequestHandler> Server<H> {
    pub async fn bind(
        name: &'static str,
        addr: SocketAddr,
        handler: Arc<H>,
        config: TransportConfig,
    ) -> Result<Self> {
        let listener = Transport::listen(addr).await?;
        Ok(Self {
            name,
            listener,
            handler,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.accept_loop(shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    async fn accept_loop(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let Server {
            name,
            listener,
            handler,
            config,
        } = self;
        let permits = Arc::new(Semaphore::new(config.max_connections));

        loop {
            // Wait for a free slot before accepting so a flood queues in the
            // kernel backlog instead of spawning without bound.
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = shutdown_rx.recv() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!("{}: connection from {}", name, addr);

                    let handler = handler.clone();
                    let config = config.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = Self::handle_connection(stream, addr, handler, &config).await
                        {
                            warn!("{}: dropped connection from {}: {}", name, addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("{}: failed to accept connection: {}", name, e);
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }

        info!("{}: stopped accepting connections", name);
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<H>,
        config: &TransportConfig,
    ) -> Result<()> {
        let request: Request = timeout(
            config.io_timeout,
            Transport::receive_message(&mut stream, config.max_message_size),
        )
        .await
        .map_err(|_| P2PError::Timeout(format!("Reading request from {}", addr)))??;

        let action = request.action();
        match handler.handle(request, addr).await {
            Some(response) => {
                timeout(
                    config.io_timeout,
                    Transport::send_message(&mut stream, &response),
                )
                .await
                .map_err(|_| P2PError::Timeout(format!("Writing response to {}", addr)))??;
                debug!("Answered {} from {}: {:?}", action, addr, response.status);
            }
            None => debug!("No reply for {} from {}", action, addr),
        }

        let _ = stream.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, request: Request, _from: SocketAddr) -> Option<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request {
                Request::RetrievePeers => Some(Response::success()),
                _ => None,
            }
        }
    }

    async fn spawn_echo() -> (ServerHandle, Arc<Echo>) {
        let handler = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let server = Server::bind(
            "echo",
            "127.0.0.1:0".parse().unwrap(),
            handler.clone(),
            TransportConfig::default(),
        )
        .await
        .unwrap();
        (server.spawn().unwrap(), handler)
    }

    #[tokio::test]
    async fn test_serves_one_request_per_connection() {
        let (handle, handler) = spawn_echo().await;
        let addr = handle.local_addr().to_string();
        let config = TransportConfig::default();

        for _ in 0..3 {
            let response: Response = Transport::exchange(&addr, &Request::RetrievePeers, &config)
                .await
                .unwrap();
            assert!(response.is_success());
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_reply_closes_connection() {
        let (handle, _) = spawn_echo().await;
        let addr = handle.local_addr().to_string();

        let result: Result<Response> =
            Transport::exchange(&addr, &Request::RetrieveIndex, &TransportConfig::default()).await;
        assert!(matches!(result, Err(P2PError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_malformed_request_does_not_stop_the_loop() {
        let (handle, handler) = spawn_echo().await;
        let addr = handle.local_addr().to_string();
        let config = TransportConfig::default();

        let mut stream = Transport::connect(&addr, &config).await.unwrap();
        Transport::send_data(&mut stream, b"{broken").await.unwrap();
        let reply = Transport::receive_data(&mut stream, 1024).await;
        assert!(matches!(reply, Err(P2PError::ConnectionClosed)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        let response: Response = Transport::exchange(&addr, &Request::RetrievePeers, &config)
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_stalled_client_times_out() {
        let handler = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let config = TransportConfig {
            io_timeout: Duration::from_millis(100),
            max_connections: 1,
            ..TransportConfig::default()
        };
        let server = Server::bind("echo", "127.0.0.1:0".parse().unwrap(), handler, config.clone())
            .await
            .unwrap();
        let handle = server.spawn().unwrap();
        let addr = handle.local_addr().to_string();

        // Holds the only slot without sending anything.
        let _idle = Transport::connect(&addr, &config).await.unwrap();

        let response: Response = Transport::exchange(
            &addr,
            &Request::RetrievePeers,
            &TransportConfig {
                io_timeout: Duration::from_secs(5),
                ..config
            },
        )
        .await
        .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (handle, _) = spawn_echo().await;
        let addr = handle.local_addr().to_string();
        handle.shutdown().await;

        let config = TransportConfig {
            connect_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_millis(500),
            ..TransportConfig::default()
        };
        let result: Result<Response> =
            Transport::exchange(&addr, &Request::RetrievePeers, &config).await;
        assert!(result.is_err());
    }
}
