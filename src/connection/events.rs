//! Notifications emitted by the link and reports flowing back to the manager

use crate::transport::LinkStream;
use btchat_shared::{state_machine::LinkState, LinkError, PeerId};
use bytes::Bytes;

/// Which side of the race produced a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Peer dialed us while we were listening
    Accepting,
    /// We dialed the peer
    Initiating,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Accepting => write!(f, "accepted"),
            Role::Initiating => write!(f, "initiated"),
        }
    }
}

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Lifecycle state changed
    StateChanged { from: LinkState, to: LinkState },
    /// A data channel to `peer` is active
    Connected { peer: PeerId, role: Role },
    /// A data channel ended; emitted exactly once per channel
    Disconnected { peer: PeerId, reason: String },
    /// Bytes read from the peer
    Received { peer: PeerId, data: Bytes },
    /// A single write failed; the channel stays up
    WriteFailed { reason: String },
    /// Listening could not be set up, or the accept failed
    ListenFailed { reason: String },
    /// Outbound connection attempt failed
    ConnectFailed { peer: PeerId, reason: String },
}

/// Outcome reported by an attempt or channel task
pub(crate) enum Report {
    Accepted {
        attempt: u64,
        stream: Box<dyn LinkStream>,
        peer: PeerId,
    },
    AcceptFailed {
        attempt: u64,
        error: LinkError,
    },
    Connected {
        attempt: u64,
        stream: Box<dyn LinkStream>,
        peer: PeerId,
    },
    ConnectFailed {
        attempt: u64,
        peer: PeerId,
        error: LinkError,
    },
    ChannelEnded {
        channel: u64,
    },
}
