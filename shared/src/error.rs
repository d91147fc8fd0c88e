//! Error taxonomy for the connection lifecycle
//!
//! None of these are fatal: each is recovered locally and surfaced either as
//! a return value or as a link event.

use thiserror::Error;

use crate::{PeerId, ServiceId};

/// Errors surfaced by the link manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Listening socket could not be created (transport disabled, bind failed)
    #[error("Listen setup failed for service {service}: {reason}")]
    ListenSetup { service: ServiceId, reason: String },

    /// Accept failed or the listening socket was closed underneath it
    #[error("Accept failed: {0}")]
    Accept(String),

    /// Client socket could not be allocated
    #[error("Could not create socket to {peer}: {reason}")]
    SocketCreate { peer: PeerId, reason: String },

    /// Outbound connect failed or was cancelled
    #[error("Connect to {peer} failed: {reason}")]
    Connect { peer: PeerId, reason: String },

    /// Read loop ended (peer closed or transport error)
    #[error("Read loop terminated: {0}")]
    ReadLoopTerminated(String),

    /// A single write failed; the channel stays up
    #[error("Write failed: {0}")]
    Write(String),

    #[error("No active connection")]
    NoActiveConnection,

    #[error("Link manager closed")]
    ManagerClosed,

    #[error("Invalid peer identity: {0:?}")]
    InvalidPeer(String),
}
