use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::core::TransportConfig;
use crate::utils::{P2PError, Result};

/// Leading byte of every frame. Bumped whenever the payload schema changes
/// incompatibly.
pub const FRAME_VERSION: u8 = 1;

/// `[version: u8][length: u32 BE]`
pub const FRAME_HEADER_LEN: usize = 5;

pub struct Transport;

impl Transport {
    pub async fn connect(addr: &str, config: &TransportConfig) -> Result<TcpStream> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::Timeout(format!("Connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set TCP_NODELAY: {}", e)))?;

        debug!("Connected to {}", addr);
        Ok(stream)
    }

    pub async fn listen(addr: SocketAddr) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| P2PError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn send_data<W>(stream: &mut W, data: &[u8]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let len = u32::try_from(data.len()).map_err(|_| P2PError::MessageTooLarge(data.len()))?;
        stream.write_u8(FRAME_VERSION).await?;
        stream.write_u32(len).await?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one frame. A stream that ends before the first header
    /// byte yields [`P2PError::ConnectionClosed`].
    pub async fn receive_data<R>(stream: &mut R, max_size: usize) -> Result<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut version = [0u8; 1];
        if stream.read(&mut version).await? == 0 {
            return Err(P2PError::ConnectionClosed);
        }
        if version[0] != FRAME_VERSION {
            return Err(P2PError::UnsupportedVersion(version[0]));
        }

        let len = stream.read_u32().await? as usize;
        if len > max_size {
            return Err(P2PError::MessageTooLarge(len));
        }

        let mut buffer = vec![0u8; len];
        stream.read_exact(&mut buffer).await?;

        Ok(buffer)
    }

    pub async fn send_message<W, T>(stream: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let payload = serde_json::to_vec(message)?;
        Self::send_data(stream, &payload).await
    }

    pub async fn receive_message<R, T>(stream: &mut R, max_size: usize) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let payload = Self::receive_data(stream, max_size).await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// One request/response round trip on a fresh connection.
    pub async fn exchange<Req, Resp>(
        addr: &str,
        request: &Req,
        config: &TransportConfig,
    ) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut stream = Self::connect(addr, config).await?;

        let response = timeout(config.io_timeout, async {
            Self::send_message(&mut stream, request).await?;
            Self::receive_message(&mut stream, config.max_message_size).await
        })
        .await
        .map_err(|_| P2PError::Timeout(format!("Waiting for response from {}", addr)))??;

        let _ = stream.shutdown().await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Request, Response};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_layout() {
        let (mut client, mut server) = duplex(1024);
        Transport::send_data(&mut client, b"abc").await.unwrap();
        drop(client);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, vec![FRAME_VERSION, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size_is_received() {
        // A payload of exactly 4096 bytes would stall a "read until short packet" reader.
        let payload = vec![7u8; 4096];
        let (mut client, mut server) = duplex(64 * 1024);

        Transport::send_data(&mut client, &payload).await.unwrap();
        let received = Transport::receive_data(&mut server, 1 << 20).await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_back_to_back_frames_stay_separate() {
        let (mut client, mut server) = duplex(1024);
        Transport::send_data(&mut client, b"first").await.unwrap();
        Transport::send_data(&mut client, b"second").await.unwrap();

        assert_eq!(Transport::receive_data(&mut server, 64).await.unwrap(), b"first");
        assert_eq!(Transport::receive_data(&mut server, 64).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = duplex(1024);
        Transport::send_data(&mut client, &[0u8; 100]).await.unwrap();

        let result = Transport::receive_data(&mut server, 10).await;
        assert!(matches!(result, Err(P2PError::MessageTooLarge(100))));
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&[9, 0, 0, 0, 0]).await.unwrap();

        let result = Transport::receive_data(&mut server, 10).await;
        assert!(matches!(result, Err(P2PError::UnsupportedVersion(9))));
    }

    #[tokio::test]
    async fn test_closed_stream_is_reported() {
        let (client, mut server) = duplex(1024);
        drop(client);

        let result = Transport::receive_data(&mut server, 10).await;
        assert!(matches!(result, Err(P2PError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&[FRAME_VERSION, 0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(client);

        let result = Transport::receive_data(&mut server, 64).await;
        assert!(matches!(result, Err(P2PError::IoError(_))));
    }

    #[tokio::test]
    async fn test_message_roundtrip_over_duplex() {
        let (mut client, mut server) = duplex(4096);
        let request = Request::Leave {
            peer_id: "bob".to_string(),
        };
        Transport::send_message(&mut client, &request).await.unwrap();

        let decoded: Request = Transport::receive_message(&mut server, 4096).await.unwrap();
        assert_eq!(decoded, request);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_a_decode_error() {
        let (mut client, mut server) = duplex(1024);
        Transport::send_data(&mut client, b"not json").await.unwrap();

        let result: Result<Response> = Transport::receive_message(&mut server, 1024).await;
        assert!(matches!(result, Err(P2PError::SerializationError(_))));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = Transport::connect(&addr.to_string(), &TransportConfig::default()).await;
        assert!(matches!(result, Err(P2PError::ConnectionFailed(_))));
    }
}
