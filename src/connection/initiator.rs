//! Connecting side of the link: dials a single peer

use super::attempt::AttemptHandle;
use super::events::Report;
use crate::transport::{ClientSocket, Transport};
use btchat_shared::{LinkError, PeerId, ServiceId};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// One outbound connection attempt
pub(crate) struct ConnectionInitiator<T: Transport> {
    id: u64,
    peer: PeerId,
    service: ServiceId,
    transport: Arc<T>,
    reports: mpsc::UnboundedSender<Report>,
}

impl<T: Transport> ConnectionInitiator<T> {
    /// Record the target; no socket work happens until the task runs
    pub fn start(
        transport: Arc<T>,
        peer: PeerId,
        service: ServiceId,
        id: u64,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Self {
        Self {
            id,
            peer,
            service,
            transport,
            reports,
        }
    }

    /// Run the connect in its own task
    pub fn spawn(self) -> AttemptHandle {
        let id = self.id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(cancel_rx));
        AttemptHandle::new(id, cancel_tx, task)
    }

    async fn run(self, mut cancel_rx: oneshot::Receiver<()>) {
        debug!(
            "[CONNECT] Creating socket to {} for service {}",
            self.peer, self.service
        );

        let opened = tokio::select! {
            _ = &mut cancel_rx => {
                info!("[CONNECT] Cancelled before socket was created");
                return;
            }
            opened = self.transport.open_client_socket(&self.peer, self.service) => opened,
        };

        let mut socket = match opened {
            Ok(socket) => socket,
            Err(e) => {
                error!("[CONNECT] Could not create socket to {}: {:#}", self.peer, e);
                self.report(Report::ConnectFailed {
                    attempt: self.id,
                    peer: self.peer.clone(),
                    error: LinkError::SocketCreate {
                        peer: self.peer.clone(),
                        reason: format!("{:#}", e),
                    },
                });
                return;
            }
        };

        // Discovery and connection setup are mutually exclusive on this transport
        self.transport.cancel_discovery().await;

        let result = tokio::select! {
            _ = &mut cancel_rx => None,
            connected = socket.connect() => Some(connected),
        };

        match result {
            None => {
                info!("[CONNECT] Cancelled, closing socket to {}", self.peer);
                if let Err(e) = socket.close() {
                    warn!("[CONNECT] Close of client socket failed: {:#}", e);
                }
            }
            Some(Ok(stream)) => {
                info!("[CONNECT] Connected to {}", self.peer);
                self.report(Report::Connected {
                    attempt: self.id,
                    stream: Box::new(stream),
                    peer: self.peer.clone(),
                });
            }
            Some(Err(e)) => {
                if let Err(close_err) = socket.close() {
                    warn!(
                        "[CONNECT] Unable to close socket to {}: {:#}",
                        self.peer, close_err
                    );
                }
                error!("[CONNECT] Could not connect to {}: {:#}", self.peer, e);
                self.report(Report::ConnectFailed {
                    attempt: self.id,
                    peer: self.peer.clone(),
                    error: LinkError::Connect {
                        peer: self.peer.clone(),
                        reason: format!("{:#}", e),
                    },
                });
            }
        }
    }

    fn report(&self, report: Report) {
        let _ = self.reports.send(report);
    }
}
