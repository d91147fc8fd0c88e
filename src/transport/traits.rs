//! Transport trait abstraction for the platform's stream sockets

use anyhow::Result;
use async_trait::async_trait;
use btchat_shared::{PeerId, ServiceId};
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected byte stream. Dropping it closes the socket.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A listening socket bound to a service
#[async_trait]
pub trait LinkListener: Send + 'static {
    type Stream: LinkStream;

    /// Block until a peer connects
    async fn accept(&mut self) -> Result<(Self::Stream, PeerId)>;

    /// Release the listening socket
    fn close(&mut self) -> Result<()>;
}

/// An outbound socket that has been allocated but not yet connected
#[async_trait]
pub trait ClientSocket: Send + 'static {
    type Stream: LinkStream;

    /// Block until the connection is established or fails
    async fn connect(&mut self) -> Result<Self::Stream>;

    /// Release the socket
    fn close(&mut self) -> Result<()>;
}

/// Platform primitives the link manager is built on
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Listener: LinkListener;
    type Socket: ClientSocket;

    /// Create a listening socket for `service`
    async fn listen(&self, service: ServiceId) -> Result<Self::Listener>;

    /// Allocate a client socket targeting `service` on `peer`
    async fn open_client_socket(&self, peer: &PeerId, service: ServiceId) -> Result<Self::Socket>;

    /// Called before every connect
    ///
    /// Stops discovery this transport controls. A scan owned by another
    /// client can only be reported.
    async fn cancel_discovery(&self);

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
