//! In-memory transport for exercising the link manager without a radio.
//!
//! Every socket the mock hands out records whether it was closed, so tests can
//! assert on teardown. Connected streams are `tokio::io::duplex` pairs; the
//! test keeps the remote end.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use btchat::connection::{ConnectionManager, LinkEvent};
use btchat::shared::{PeerId, ServiceId};
use btchat::transport::{ClientSocket, LinkListener, Transport};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// What the next outbound connect does
pub enum ConnectPlan {
    Succeed,
    Fail(String),
    /// Block until the sender fires (or forever if it is dropped)
    Gate(oneshot::Receiver<()>),
}

struct MockState {
    listen_error: Mutex<Option<String>>,
    open_error: Mutex<Option<String>>,
    connect_plans: Mutex<VecDeque<ConnectPlan>>,
    incoming: Mutex<Option<mpsc::UnboundedSender<(MockStream, PeerId)>>>,
    listeners: Mutex<Vec<Arc<AtomicBool>>>,
    sockets: Mutex<Vec<Arc<AtomicBool>>>,
    connects_started: AtomicUsize,
    discovery_cancels: AtomicUsize,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

/// Transport handed to the manager
pub struct MockTransport {
    state: Arc<MockState>,
}

/// Test-side controls and observations
pub struct MockControl {
    state: Arc<MockState>,
    remotes: mpsc::UnboundedReceiver<MockRemote>,
}

pub fn mock_transport() -> (MockTransport, MockControl) {
    let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
    let state = Arc::new(MockState {
        listen_error: Mutex::new(None),
        open_error: Mutex::new(None),
        connect_plans: Mutex::new(VecDeque::new()),
        incoming: Mutex::new(None),
        listeners: Mutex::new(Vec::new()),
        sockets: Mutex::new(Vec::new()),
        connects_started: AtomicUsize::new(0),
        discovery_cancels: AtomicUsize::new(0),
        remotes: remotes_tx,
    });
    (
        MockTransport {
            state: state.clone(),
        },
        MockControl {
            state,
            remotes: remotes_rx,
        },
    )
}

pub fn peer(s: &str) -> PeerId {
    s.parse().unwrap()
}

/// Local end of a mock connection, owned by the link
pub struct MockStream {
    inner: DuplexStream,
    closed: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by radio",
            )));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transport error",
            )));
        }
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &result {
            self.writes.lock().unwrap().push(buf[..*n].to_vec());
        }
        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Remote end of a mock connection, owned by the test
pub struct MockRemote {
    pub peer: PeerId,
    pub stream: DuplexStream,
    closed: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockRemote {
    /// Whether the link closed its end of the socket
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closed flag that outlives the remote end
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Every write the link performed on its end
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Make reads on the link's end fail with a transport error
    ///
    /// Takes effect on the link's next read, so pair it with a write from the
    /// remote end to wake a read that is already waiting.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Make writes on the link's end fail with a transport error
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

fn stream_pair(peer: PeerId) -> (MockStream, MockRemote) {
    let (local, remote) = tokio::io::duplex(4096);
    let closed = Arc::new(AtomicBool::new(false));
    let fail_reads = Arc::new(AtomicBool::new(false));
    let fail_writes = Arc::new(AtomicBool::new(false));
    let writes = Arc::new(Mutex::new(Vec::new()));
    (
        MockStream {
            inner: local,
            closed: closed.clone(),
            fail_reads: fail_reads.clone(),
            fail_writes: fail_writes.clone(),
            writes: writes.clone(),
        },
        MockRemote {
            peer,
            stream: remote,
            closed,
            fail_reads,
            fail_writes,
            writes,
        },
    )
}

pub struct MockListener {
    incoming: mpsc::UnboundedReceiver<(MockStream, PeerId)>,
    closed: Arc<AtomicBool>,
}

impl Drop for MockListener {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LinkListener for MockListener {
    type Stream = MockStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerId)> {
        self.incoming
            .recv()
            .await
            .ok_or_else(|| anyhow!("listening socket closed"))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.incoming.close();
        Ok(())
    }
}

pub struct MockClientSocket {
    peer: PeerId,
    plan: Option<ConnectPlan>,
    closed: Arc<AtomicBool>,
    state: Arc<MockState>,
}

impl Drop for MockClientSocket {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientSocket for MockClientSocket {
    type Stream = MockStream;

    async fn connect(&mut self) -> Result<Self::Stream> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("socket closed");
        }
        self.state.connects_started.fetch_add(1, Ordering::SeqCst);

        match self.plan.take().unwrap_or(ConnectPlan::Succeed) {
            ConnectPlan::Succeed => {}
            ConnectPlan::Fail(reason) => bail!(reason),
            ConnectPlan::Gate(gate) => {
                if gate.await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }

        let (local, remote) = stream_pair(self.peer.clone());
        let _ = self.state.remotes.send(remote);
        Ok(local)
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Listener = MockListener;
    type Socket = MockClientSocket;

    async fn listen(&self, _service: ServiceId) -> Result<Self::Listener> {
        if let Some(reason) = self.state.listen_error.lock().unwrap().clone() {
            bail!(reason);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.incoming.lock().unwrap() = Some(tx);
        let closed = Arc::new(AtomicBool::new(false));
        self.state.listeners.lock().unwrap().push(closed.clone());
        Ok(MockListener {
            incoming: rx,
            closed,
        })
    }

    async fn open_client_socket(&self, peer: &PeerId, _service: ServiceId) -> Result<Self::Socket> {
        if let Some(reason) = self.state.open_error.lock().unwrap().clone() {
            bail!(reason);
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.state.sockets.lock().unwrap().push(closed.clone());
        let plan = self.state.connect_plans.lock().unwrap().pop_front();
        Ok(MockClientSocket {
            peer: peer.clone(),
            plan,
            closed,
            state: self.state.clone(),
        })
    }

    async fn cancel_discovery(&self) {
        self.state.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl MockControl {
    /// Simulate a peer connecting to the current listener
    pub fn accept_from(&self, from: &str) -> MockRemote {
        let (local, remote) = stream_pair(peer(from));
        let incoming = self.state.incoming.lock().unwrap().clone();
        incoming
            .expect("no listener")
            .send((local, peer(from)))
            .map_err(|_| ())
            .expect("listener closed");
        remote
    }

    pub fn fail_listen(&self, reason: &str) {
        *self.state.listen_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_open(&self, reason: &str) {
        *self.state.open_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn push_connect(&self, plan: ConnectPlan) {
        self.state.connect_plans.lock().unwrap().push_back(plan);
    }

    /// Remote end of the next successful outbound connect
    pub async fn next_remote(&mut self) -> MockRemote {
        tokio::time::timeout(TIMEOUT, self.remotes.recv())
            .await
            .expect("timed out waiting for outbound connection")
            .expect("transport dropped")
    }

    pub fn try_next_remote(&mut self) -> Option<MockRemote> {
        self.remotes.try_recv().ok()
    }

    pub fn sockets_opened(&self) -> usize {
        self.state.sockets.lock().unwrap().len()
    }

    pub fn socket_closed(&self, index: usize) -> bool {
        self.state.sockets.lock().unwrap()[index].load(Ordering::SeqCst)
    }

    pub fn listeners_opened(&self) -> usize {
        self.state.listeners.lock().unwrap().len()
    }

    pub fn listener_closed(&self, index: usize) -> bool {
        self.state.listeners.lock().unwrap()[index].load(Ordering::SeqCst)
    }

    pub fn connects_started(&self) -> usize {
        self.state.connects_started.load(Ordering::SeqCst)
    }

    pub fn discovery_cancels(&self) -> usize {
        self.state.discovery_cancels.load(Ordering::SeqCst)
    }
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for<F>(link: &mut ConnectionManager, mut pred: F) -> LinkEvent
where
    F: FnMut(&LinkEvent) -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match link.recv().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("link manager closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for link event")
}

/// Poll `cond` until it holds
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

/// Drain every event currently queued
pub fn drain(link: &mut ConnectionManager) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Some(event) = link.try_recv() {
        events.push(event);
    }
    events
}
