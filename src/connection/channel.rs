//! Data channel over an established connection
//!
//! The read half is owned by a dedicated task that emits every chunk it reads
//! as a [`LinkEvent::Received`]. The write half sits behind a mutex so the
//! manager's handle can write concurrently with the read loop. Closing the
//! channel abandons any write still waiting on the peer.

use super::events::{LinkEvent, Report};
use crate::transport::LinkStream;
use btchat_shared::{LinkError, PeerId};
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type BoxedWriter = WriteHalf<Box<dyn LinkStream>>;

/// Cloneable handle for writing to a channel
#[derive(Clone)]
pub struct ChannelWriter {
    id: u64,
    peer: PeerId,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    /// Set once the channel starts closing
    closing: Arc<watch::Sender<bool>>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl ChannelWriter {
    /// Peer at the other end of the channel
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Write the whole buffer to the peer
    ///
    /// A failed write is reported but leaves the channel up; the caller may
    /// retry or stop the link. A write still pending when the channel closes
    /// is abandoned.
    pub async fn write(&self, data: &[u8]) -> Result<(), LinkError> {
        let mut closing = self.closing.subscribe();
        if *closing.borrow() {
            return Err(LinkError::NoActiveConnection);
        }

        tokio::select! {
            _ = closing.changed() => {
                warn!("[CHANNEL] Write to {} abandoned, channel closing", self.peer);
                Err(LinkError::Write("channel closed during write".to_string()))
            }
            result = self.write_locked(data) => result,
        }
    }

    async fn write_locked(&self, data: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NoActiveConnection)?;

        debug!(
            "[CHANNEL] Writing to {}: {}",
            self.peer,
            String::from_utf8_lossy(data)
        );

        if let Err(e) = writer.write_all(data).await {
            error!("[CHANNEL] Error writing to {}: {}", self.peer, e);
            let reason = e.to_string();
            let _ = self.events.send(LinkEvent::WriteFailed {
                reason: reason.clone(),
            });
            return Err(LinkError::Write(reason));
        }
        Ok(())
    }

    /// Shut down and drop the write half; idempotent
    ///
    /// Pending writes are released first so the lock is free.
    async fn close(&self) {
        self.closing.send_replace(true);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("[CHANNEL] Shutdown of channel {} failed: {}", self.id, e);
            }
        }
    }
}

/// Handle owned by the manager for an active channel
pub(crate) struct ChannelHandle {
    pub id: u64,
    writer: ChannelWriter,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    pub fn writer(&self) -> ChannelWriter {
        self.writer.clone()
    }

    pub fn peer(&self) -> &PeerId {
        &self.writer.peer
    }

    /// Close the socket and wait for the read loop to exit
    pub async fn cancel(mut self) {
        info!("[CHANNEL] Cancelling channel to {}", self.writer.peer);
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        self.join().await;
    }

    /// Wait for a read loop that already ended
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("[CHANNEL] Read loop for channel {} panicked", self.id);
            }
        }
    }
}

/// Read loop state for one established connection
pub(crate) struct DataChannel {
    reader: ReadHalf<Box<dyn LinkStream>>,
    writer: ChannelWriter,
    buffer_size: usize,
    reports: mpsc::UnboundedSender<Report>,
}

impl DataChannel {
    /// Take ownership of a connected socket and start its read loop
    pub fn spawn(
        id: u64,
        stream: Box<dyn LinkStream>,
        peer: PeerId,
        buffer_size: usize,
        events: mpsc::UnboundedSender<LinkEvent>,
        reports: mpsc::UnboundedSender<Report>,
    ) -> ChannelHandle {
        let (reader, writer) = tokio::io::split(stream);
        let writer = ChannelWriter {
            id,
            peer,
            writer: Arc::new(Mutex::new(Some(writer))),
            closing: Arc::new(watch::channel(false).0),
            events,
        };

        let channel = DataChannel {
            reader,
            writer: writer.clone(),
            buffer_size,
            reports,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(channel.run(cancel_rx));

        ChannelHandle {
            id,
            writer,
            cancel_tx: Some(cancel_tx),
            task,
        }
    }

    async fn run(mut self, mut cancel_rx: oneshot::Receiver<()>) {
        let peer = self.writer.peer.clone();
        let mut buf = vec![0u8; self.buffer_size];
        info!("[CHANNEL] Read loop started for {}", peer);

        let reason = loop {
            tokio::select! {
                _ = &mut cancel_rx => break "cancelled".to_string(),
                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => break "peer closed connection".to_string(),
                    Ok(n) => {
                        let data = Bytes::copy_from_slice(&buf[..n]);
                        debug!(
                            "[CHANNEL] Received from {}: {}",
                            peer,
                            String::from_utf8_lossy(&data)
                        );
                        let _ = self.writer.events.send(LinkEvent::Received {
                            peer: peer.clone(),
                            data,
                        });
                    }
                    Err(e) => {
                        warn!("[CHANNEL] Error reading from {}: {}", peer, e);
                        break LinkError::ReadLoopTerminated(e.to_string()).to_string();
                    }
                },
            }
        };

        // Both halves must go for the socket to close
        self.writer.close().await;
        drop(self.reader);

        info!("[CHANNEL] Channel to {} closed: {}", peer, reason);
        let _ = self
            .writer
            .events
            .send(LinkEvent::Disconnected { peer, reason });
        let _ = self.reports.send(Report::ChannelEnded {
            channel: self.writer.id,
        });
    }
}
