//! Link State Machine
//!
//! Tracks which parts of the link lifecycle are active and derives the
//! externally visible state from them. Listening and connecting may be active
//! at the same time; an open channel dominates both.

use crate::PeerId;

/// Externally visible lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Listening,
    Connecting,
    /// Accept and connect attempts racing each other
    ListeningAndConnecting,
    Connected,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Listening => write!(f, "listening"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::ListeningAndConnecting => write!(f, "listening+connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Inputs that can change the lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub enum LinkInput {
    /// A fresh acceptor is listening
    ListenStarted,
    /// The acceptor resolved, failed or was cancelled
    ListenEnded,
    /// A fresh initiator is dialing
    ConnectStarted,
    /// The initiator resolved, failed or was cancelled
    ConnectEnded,
    /// A data channel became active, replacing any previous one
    ChannelOpened(PeerId),
    /// The active data channel terminated
    ChannelClosed,
    /// Everything was torn down
    Stopped,
}

/// Result of processing an input
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Visible state changed
    Changed { from: LinkState, to: LinkState },
    /// Input was valid but the visible state is the same
    Unchanged(LinkState),
    /// Input made no sense in the current state and was ignored
    Invalid { from: LinkState, input: LinkInput },
}

/// The lifecycle state machine for a single point-to-point link
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    listening: bool,
    connecting: bool,
    peer: Option<PeerId>,
}

impl LinkStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        match (&self.peer, self.listening, self.connecting) {
            (Some(_), _, _) => LinkState::Connected,
            (None, true, true) => LinkState::ListeningAndConnecting,
            (None, true, false) => LinkState::Listening,
            (None, false, true) => LinkState::Connecting,
            (None, false, false) => LinkState::Idle,
        }
    }

    /// Peer of the active channel, if any
    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting
    }

    /// Process an input and return the transition result
    pub fn process(&mut self, input: LinkInput) -> TransitionResult {
        let from = self.state();

        let applied = match &input {
            LinkInput::ListenStarted => {
                self.listening = true;
                true
            }
            LinkInput::ConnectStarted => {
                self.connecting = true;
                true
            }
            LinkInput::ListenEnded if self.listening => {
                self.listening = false;
                true
            }
            LinkInput::ConnectEnded if self.connecting => {
                self.connecting = false;
                true
            }
            LinkInput::ChannelOpened(peer) => {
                self.peer = Some(peer.clone());
                true
            }
            LinkInput::ChannelClosed if self.peer.is_some() => {
                self.peer = None;
                true
            }
            LinkInput::Stopped => {
                self.listening = false;
                self.connecting = false;
                self.peer = None;
                true
            }
            _ => false,
        };

        if !applied {
            return TransitionResult::Invalid { from, input };
        }

        let to = self.state();
        if from == to {
            TransitionResult::Unchanged(to)
        } else {
            TransitionResult::Changed { from, to }
        }
    }
}
