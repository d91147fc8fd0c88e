//! Connection manager owning at most one data channel
//!
//! All state transitions run on a single manager task. Attempts and channels
//! never mutate manager state; they report outcomes back over a channel and
//! the manager discards reports from attempts or channels it already retired.

use super::acceptor::ConnectionAcceptor;
use super::attempt::AttemptHandle;
use super::channel::{ChannelHandle, ChannelWriter, DataChannel};
use super::events::{LinkEvent, Report, Role};
use super::initiator::ConnectionInitiator;
use crate::config::LinkConfig;
use crate::transport::{LinkStream, Transport};
use btchat_shared::{
    state_machine::{LinkInput, LinkState, LinkStateMachine, TransitionResult},
    LinkError, PeerId, ServiceId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

/// Commands accepted by the manager task
enum Command {
    StartListening {
        service: ServiceId,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    StartConnecting {
        peer: PeerId,
        service: ServiceId,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle for driving the link
#[derive(Clone)]
pub struct LinkHandle {
    commands: mpsc::Sender<Command>,
    current: Arc<RwLock<Option<ChannelWriter>>>,
    fsm: Arc<RwLock<LinkStateMachine>>,
}

impl LinkHandle {
    /// Listen for an inbound connection on `service`
    ///
    /// Cancels any outbound attempt in flight. Fails with
    /// [`LinkError::ListenSetup`] when the listening socket cannot be created.
    pub async fn start_listening(&self, service: ServiceId) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartListening { service, reply }).await?;
        rx.await.map_err(|_| LinkError::ManagerClosed)?
    }

    /// Dial `peer`, replacing any previous outbound attempt
    ///
    /// Returns once the attempt is started; the outcome arrives as a
    /// [`LinkEvent`].
    pub async fn start_connecting(&self, peer: PeerId, service: ServiceId) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::StartConnecting {
            peer,
            service,
            reply,
        })
        .await?;
        rx.await.map_err(|_| LinkError::ManagerClosed)?
    }

    /// Tear down every attempt and the active channel
    pub async fn stop(&self) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| LinkError::ManagerClosed)
    }

    /// Write bytes to the active channel
    pub async fn write(&self, data: &[u8]) -> Result<(), LinkError> {
        let writer = self.current.read().await.clone();
        match writer {
            Some(writer) => writer.write(data).await,
            None => {
                debug!("[LINK] Write of {} bytes with no active connection", data.len());
                Err(LinkError::NoActiveConnection)
            }
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> LinkState {
        self.fsm.read().await.state()
    }

    /// Peer of the active channel, if any
    pub async fn peer(&self) -> Option<PeerId> {
        self.fsm.read().await.peer().cloned()
    }

    async fn send(&self, command: Command) -> Result<(), LinkError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| LinkError::ManagerClosed)
    }
}

/// Manages the single point-to-point connection
pub struct ConnectionManager {
    handle: LinkHandle,
    /// Channel to receive link events
    event_rx: mpsc::UnboundedReceiver<LinkEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the manager task
    pub fn new<T: Transport>(transport: T, config: LinkConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let current = Arc::new(RwLock::new(None));
        let fsm = Arc::new(RwLock::new(LinkStateMachine::new()));

        info!("[LINK] Starting link manager over {}", transport.name());

        let task = ManagerTask {
            transport: Arc::new(transport),
            config,
            acceptor: None,
            initiator: None,
            channel: None,
            current: current.clone(),
            fsm: fsm.clone(),
            next_id: 0,
            events: event_tx,
            reports: report_tx,
        };
        tokio::spawn(task.run(command_rx, report_rx));

        Self {
            handle: LinkHandle {
                commands: command_tx,
                current,
                fsm,
            },
            event_rx,
        }
    }

    /// Receive the next link event
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.event_rx.recv().await
    }

    /// Receive a link event if one is queued
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Get a cloneable handle for driving the link
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    pub async fn start_listening(&self, service: ServiceId) -> Result<(), LinkError> {
        self.handle.start_listening(service).await
    }

    pub async fn start_connecting(&self, peer: PeerId, service: ServiceId) -> Result<(), LinkError> {
        self.handle.start_connecting(peer, service).await
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), LinkError> {
        self.handle.write(data).await
    }

    pub async fn stop(&self) -> Result<(), LinkError> {
        self.handle.stop().await
    }

    pub async fn state(&self) -> LinkState {
        self.handle.state().await
    }
}

/// Serialized owner of the manager state
struct ManagerTask<T: Transport> {
    transport: Arc<T>,
    config: LinkConfig,
    acceptor: Option<AttemptHandle>,
    initiator: Option<AttemptHandle>,
    channel: Option<ChannelHandle>,
    /// Writer of `channel`, shared with every handle
    current: Arc<RwLock<Option<ChannelWriter>>>,
    fsm: Arc<RwLock<LinkStateMachine>>,
    next_id: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    reports: mpsc::UnboundedSender<Report>,
}

impl<T: Transport> ManagerTask<T> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut reports: mpsc::UnboundedReceiver<Report>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle dropped
                    None => break,
                },
                Some(report) = reports.recv() => self.handle_report(report).await,
            }
        }

        self.stop().await;
        info!("[LINK] Manager stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartListening { service, reply } => {
                let result = self.start_listening(service).await;
                let _ = reply.send(result);
            }
            Command::StartConnecting {
                peer,
                service,
                reply,
            } => {
                self.start_connecting(peer, service).await;
                let _ = reply.send(Ok(()));
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    async fn handle_report(&mut self, report: Report) {
        match report {
            Report::Accepted {
                attempt,
                stream,
                peer,
            } => {
                if !self.is_current(&self.acceptor, attempt) {
                    debug!("[LINK] Dropping connection from retired acceptor {}", attempt);
                    return;
                }
                self.on_socket_established(stream, peer, Role::Accepting)
                    .await;
                self.retire_acceptor().await;
            }
            Report::AcceptFailed { attempt, error } => {
                if !self.is_current(&self.acceptor, attempt) {
                    return;
                }
                self.retire_acceptor().await;
                self.emit(LinkEvent::ListenFailed {
                    reason: error.to_string(),
                });
            }
            Report::Connected {
                attempt,
                stream,
                peer,
            } => {
                if !self.is_current(&self.initiator, attempt) {
                    debug!("[LINK] Dropping connection from retired initiator {}", attempt);
                    return;
                }
                self.on_socket_established(stream, peer, Role::Initiating)
                    .await;
                self.retire_initiator().await;
            }
            Report::ConnectFailed {
                attempt,
                peer,
                error,
            } => {
                if !self.is_current(&self.initiator, attempt) {
                    return;
                }
                self.retire_initiator().await;
                self.emit(LinkEvent::ConnectFailed {
                    peer,
                    reason: error.to_string(),
                });
            }
            Report::ChannelEnded { channel } => {
                if self.channel.as_ref().map(|c| c.id) != Some(channel) {
                    return;
                }
                *self.current.write().await = None;
                if let Some(handle) = self.channel.take() {
                    handle.join().await;
                }
                self.transition(LinkInput::ChannelClosed).await;
            }
        }
    }

    async fn start_listening(&mut self, service: ServiceId) -> Result<(), LinkError> {
        info!("[LINK] Start listening on {}", service);

        // An explicit listen must not race a stale outbound attempt
        if let Some(initiator) = self.initiator.take() {
            initiator.cancel().await;
            self.transition(LinkInput::ConnectEnded).await;
        }
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.cancel().await;
            self.transition(LinkInput::ListenEnded).await;
        }

        let id = self.next_id();
        let acceptor = ConnectionAcceptor::start(
            self.transport.as_ref(),
            service,
            &self.config.service_name,
            id,
            self.reports.clone(),
        )
        .await;

        match acceptor {
            Ok(acceptor) => {
                self.acceptor = Some(acceptor.spawn());
                self.transition(LinkInput::ListenStarted).await;
                Ok(())
            }
            Err(e) => {
                warn!("[LINK] {}", e);
                self.emit(LinkEvent::ListenFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn start_connecting(&mut self, peer: PeerId, service: ServiceId) {
        info!("[LINK] Start connecting to {} on {}", peer, service);

        if let Some(initiator) = self.initiator.take() {
            initiator.cancel().await;
            self.transition(LinkInput::ConnectEnded).await;
        }

        let id = self.next_id();
        let initiator = ConnectionInitiator::start(
            self.transport.clone(),
            peer,
            service,
            id,
            self.reports.clone(),
        );
        self.initiator = Some(initiator.spawn());
        self.transition(LinkInput::ConnectStarted).await;
    }

    async fn on_socket_established(&mut self, stream: Box<dyn LinkStream>, peer: PeerId, role: Role) {
        // At most one connection: the previous channel is closed before the
        // new one becomes visible to writers
        if let Some(previous) = self.channel.take() {
            *self.current.write().await = None;
            info!(
                "[LINK] Replacing channel to {} with {}",
                previous.peer(),
                peer
            );
            previous.cancel().await;
        }

        let id = self.next_id();
        let channel = DataChannel::spawn(
            id,
            stream,
            peer.clone(),
            self.config.read_buffer_size,
            self.events.clone(),
            self.reports.clone(),
        );
        *self.current.write().await = Some(channel.writer());
        self.channel = Some(channel);

        self.transition(LinkInput::ChannelOpened(peer.clone())).await;
        info!("[LINK] Connected to {} ({})", peer, role);
        self.emit(LinkEvent::Connected { peer, role });
    }

    async fn stop(&mut self) {
        let acceptor = self.acceptor.take();
        let initiator = self.initiator.take();
        let channel = self.channel.take();
        *self.current.write().await = None;

        if let Some(acceptor) = acceptor {
            acceptor.cancel().await;
        }
        if let Some(initiator) = initiator {
            initiator.cancel().await;
        }
        if let Some(channel) = channel {
            channel.cancel().await;
        }

        self.transition(LinkInput::Stopped).await;
    }

    async fn retire_acceptor(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.join().await;
            self.transition(LinkInput::ListenEnded).await;
        }
    }

    async fn retire_initiator(&mut self) {
        if let Some(initiator) = self.initiator.take() {
            initiator.join().await;
            self.transition(LinkInput::ConnectEnded).await;
        }
    }

    fn is_current(&self, slot: &Option<AttemptHandle>, attempt: u64) -> bool {
        slot.as_ref().map(|a| a.id) == Some(attempt)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn transition(&self, input: LinkInput) {
        let result = self.fsm.write().await.process(input);
        match result {
            TransitionResult::Changed { from, to } => {
                info!("[LINK] State: {} -> {}", from, to);
                self.emit(LinkEvent::StateChanged { from, to });
            }
            TransitionResult::Unchanged(_) => {}
            TransitionResult::Invalid { from, input } => {
                debug!("[LINK] Ignoring {:?} while {}", input, from);
            }
        }
    }

    fn emit(&self, event: LinkEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}
