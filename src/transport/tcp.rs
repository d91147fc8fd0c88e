//! TCP simulation transport for developing without Bluetooth hardware
//!
//! Peers are identified by `host:port` socket addresses. The service
//! identifier only shows up in logs since TCP has no service records.

use crate::transport::traits::{ClientSocket, LinkListener, Transport};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use btchat_shared::{PeerId, ServiceId};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

/// Configuration for the TCP simulation transport
#[derive(Debug, Clone)]
pub struct TcpSimConfig {
    /// Address the acceptor binds to
    pub listen_address: String,
}

impl Default for TcpSimConfig {
    fn default() -> Self {
        Self {
            listen_address: btchat_shared::link::DEFAULT_TCP_SIM_ADDRESS.into(),
        }
    }
}

/// Listening TCP socket
pub struct TcpSimListener {
    inner: Option<TcpListener>,
}

impl TcpSimListener {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let listener = self.inner.as_ref().ok_or_else(|| anyhow!("listener closed"))?;
        Ok(listener.local_addr()?)
    }
}

#[async_trait]
impl LinkListener for TcpSimListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerId)> {
        let listener = self.inner.as_ref().ok_or_else(|| anyhow!("listener closed"))?;
        let (stream, addr) = listener.accept().await?;
        let peer: PeerId = addr.to_string().parse()?;
        Ok((stream, peer))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Unconnected TCP socket targeting a peer
pub struct TcpSimSocket {
    inner: Option<TcpSocket>,
    target: SocketAddr,
}

#[async_trait]
impl ClientSocket for TcpSimSocket {
    type Stream = TcpStream;

    async fn connect(&mut self) -> Result<Self::Stream> {
        let socket = self
            .inner
            .take()
            .ok_or_else(|| anyhow!("socket to {} already closed", self.target))?;
        let stream = socket
            .connect(self.target)
            .await
            .with_context(|| format!("TCP connect to {} failed", self.target))?;
        Ok(stream)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// TCP transport standing in for RFCOMM
pub struct TcpSimTransport {
    config: TcpSimConfig,
}

impl TcpSimTransport {
    pub fn new(config: TcpSimConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for TcpSimTransport {
    type Listener = TcpSimListener;
    type Socket = TcpSimSocket;

    async fn listen(&self, service: ServiceId) -> Result<Self::Listener> {
        let listener = TcpListener::bind(&self.config.listen_address)
            .await
            .with_context(|| format!("bind {}", self.config.listen_address))?;
        info!(
            "[SIM] Listening for service {} on {}",
            service,
            listener.local_addr()?
        );
        Ok(TcpSimListener {
            inner: Some(listener),
        })
    }

    async fn open_client_socket(&self, peer: &PeerId, service: ServiceId) -> Result<Self::Socket> {
        let target: SocketAddr = peer
            .as_str()
            .parse()
            .with_context(|| format!("peer {} is not a socket address", peer))?;
        let socket = if target.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        debug!("[SIM] Socket for service {} on {} allocated", service, target);
        Ok(TcpSimSocket {
            inner: Some(socket),
            target,
        })
    }

    async fn cancel_discovery(&self) {
        // Nothing to discover over TCP
    }

    fn name(&self) -> &'static str {
        "TCP simulation"
    }
}
