//! Connection lifecycle for a single point-to-point link
//!
//! This module handles:
//! - Listening for one inbound connection (acceptor)
//! - Dialing a peer (initiator), racing the acceptor if both run
//! - Pumping bytes over the established connection (data channel)
//! - Serializing start/stop/replace decisions (manager)

mod acceptor;
mod attempt;
mod channel;
mod events;
mod initiator;
mod manager;

pub use channel::ChannelWriter;
pub use events::{LinkEvent, Role};
pub use manager::{ConnectionManager, LinkHandle};
