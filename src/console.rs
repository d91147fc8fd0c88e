//! Interactive console commands
//!
//! Lines starting with `/` drive the link; anything else is sent to the peer.

use btchat_shared::{LinkError, PeerId};
use thiserror::Error;

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start (or restart) listening
    Listen,
    /// Dial a peer
    Connect(PeerId),
    /// Tear everything down
    Stop,
    /// Print the lifecycle state
    State,
    /// Exit the program
    Quit,
    /// Send the text to the peer
    Send(String),
    /// Nothing to do
    Empty,
}

/// Errors from console input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("unknown command /{0}")]
    UnknownCommand(String),

    #[error("usage: /connect <peer>")]
    MissingPeer,

    #[error(transparent)]
    InvalidPeer(#[from] LinkError),
}

/// Parse one line of console input
pub fn parse_line(line: &str) -> Result<ConsoleCommand, ConsoleError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(ConsoleCommand::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(ConsoleCommand::Send(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let command = parts.next().unwrap_or_default();
    match command {
        "listen" => Ok(ConsoleCommand::Listen),
        "connect" => {
            let peer = parts.next().ok_or(ConsoleError::MissingPeer)?;
            Ok(ConsoleCommand::Connect(peer.parse()?))
        }
        "stop" => Ok(ConsoleCommand::Stop),
        "state" => Ok(ConsoleCommand::State),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        // "//text" sends "/text"
        _ if rest.starts_with('/') => Ok(ConsoleCommand::Send(rest.to_string())),
        other => Err(ConsoleError::UnknownCommand(other.to_string())),
    }
}
