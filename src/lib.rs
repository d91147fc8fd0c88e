//! Point-to-point chat link over Bluetooth RFCOMM
//!
//! A [`connection::ConnectionManager`] owns at most one connection to a peer,
//! established either by listening or by dialing, and pumps opaque bytes in
//! both directions.

pub mod config;
pub mod connection;
pub mod console;
pub mod transport;

pub use btchat_shared as shared;
pub use config::{LinkConfig, TransportMode};
pub use connection::{ConnectionManager, LinkEvent, LinkHandle, Role};
