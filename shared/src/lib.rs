//! btchat Shared Types
//!
//! This crate provides the identifiers, error taxonomy and lifecycle state
//! machine shared by every part of the point-to-point link.

pub mod error;
pub mod state_machine;

use std::fmt;
use std::str::FromStr;

pub use error::LinkError;
pub use uuid::Uuid;

/// Well-known service identifier shared by both ends out of band
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

/// Name of the service record advertised when listening
pub const SERVICE_NAME: &str = "BtChatName";

/// Link parameters for the system
pub mod link {
    /// Size of the buffer handed to each blocking read
    pub const READ_BUFFER_SIZE: usize = 1024;

    /// Capacity of the command queue feeding the manager task
    pub const EVENT_QUEUE_CAPACITY: usize = 100;

    /// RFCOMM channel the well-known service is bound to
    pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

    /// Listen address used by the TCP simulation transport
    pub const DEFAULT_TCP_SIM_ADDRESS: &str = "127.0.0.1:9000";
}

/// 128-bit identifier naming a logical service on the stream transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Uuid);

impl ServiceId {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self(SERVICE_UUID)
    }
}

impl From<Uuid> for ServiceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of the remote endpoint (a Bluetooth MAC or socket address)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.chars().any(char::is_whitespace) {
            return Err(LinkError::InvalidPeer(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
