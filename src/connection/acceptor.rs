//! Listening side of the link: waits for a single inbound connection

use super::attempt::AttemptHandle;
use super::events::Report;
use crate::transport::{LinkListener, Transport};
use btchat_shared::{LinkError, ServiceId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Owns a listening socket and serves exactly one accepted connection
pub(crate) struct ConnectionAcceptor<L: LinkListener> {
    id: u64,
    service: ServiceId,
    listener: L,
    reports: mpsc::UnboundedSender<Report>,
}

impl<L: LinkListener> ConnectionAcceptor<L> {
    /// Create the listening socket; the acceptor stays inert if this fails
    pub async fn start<T>(
        transport: &T,
        service: ServiceId,
        service_name: &str,
        id: u64,
        reports: mpsc::UnboundedSender<Report>,
    ) -> Result<Self, LinkError>
    where
        T: Transport<Listener = L>,
    {
        debug!("[ACCEPT] Setting up server {} using {}", service_name, service);
        let listener = transport
            .listen(service)
            .await
            .map_err(|e| LinkError::ListenSetup {
                service,
                reason: format!("{:#}", e),
            })?;

        Ok(Self {
            id,
            service,
            listener,
            reports,
        })
    }

    /// Run the accept in its own task
    pub fn spawn(self) -> AttemptHandle {
        let id = self.id;
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(cancel_rx));
        AttemptHandle::new(id, cancel_tx, task)
    }

    async fn run(mut self, mut cancel_rx: oneshot::Receiver<()>) {
        info!("[ACCEPT] Waiting for connection on service {}", self.service);

        let result = tokio::select! {
            _ = &mut cancel_rx => None,
            accepted = self.listener.accept() => Some(accepted),
        };

        // One connection per acceptor; a fresh start is needed to listen again
        if let Err(e) = self.listener.close() {
            warn!("[ACCEPT] Close of listening socket failed: {:#}", e);
        }

        let report = match result {
            None => {
                info!("[ACCEPT] Cancelled");
                return;
            }
            Some(Ok((stream, peer))) => {
                info!("[ACCEPT] Accepted connection from {}", peer);
                Report::Accepted {
                    attempt: self.id,
                    stream: Box::new(stream),
                    peer,
                }
            }
            Some(Err(e)) => {
                error!("[ACCEPT] Accept failed: {:#}", e);
                Report::AcceptFailed {
                    attempt: self.id,
                    error: LinkError::Accept(format!("{:#}", e)),
                }
            }
        };

        // Manager gone means the link is shutting down
        let _ = self.reports.send(report);
    }
}
