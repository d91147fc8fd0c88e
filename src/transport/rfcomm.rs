//! RFCOMM transport implementation for Bluetooth connections

use crate::transport::traits::{ClientSocket, LinkListener, Transport};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Listener, Socket, SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Adapter, Address, Session};
use btchat_shared::{link::DEFAULT_RFCOMM_CHANNEL, PeerId, ServiceId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Adapter name (e.g. `hci0`), default adapter when unset
    pub adapter: Option<String>,
    /// RFCOMM channel each service identifier is bound to
    pub channels: HashMap<ServiceId, u8>,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            channels: HashMap::from([(ServiceId::default(), DEFAULT_RFCOMM_CHANNEL)]),
        }
    }
}

impl RfcommConfig {
    /// Resolve the RFCOMM channel for a service
    pub fn channel_for(&self, service: ServiceId) -> Result<u8> {
        self.channels
            .get(&service)
            .copied()
            .ok_or_else(|| anyhow!("no RFCOMM channel configured for service {}", service))
    }
}

/// Listening RFCOMM socket
pub struct RfcommListener {
    inner: Option<Listener>,
}

#[async_trait]
impl LinkListener for RfcommListener {
    type Stream = RfcommStream;

    async fn accept(&mut self) -> Result<(Self::Stream, PeerId)> {
        let listener = self.inner.as_ref().ok_or_else(|| anyhow!("listener closed"))?;
        let (stream, sa) = listener.accept().await?;
        let peer: PeerId = sa.addr.to_string().parse()?;
        Ok((stream, peer))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Unconnected RFCOMM socket targeting a peer channel
pub struct RfcommClientSocket {
    inner: Option<Socket>,
    target: RfcommAddr,
}

#[async_trait]
impl ClientSocket for RfcommClientSocket {
    type Stream = RfcommStream;

    async fn connect(&mut self) -> Result<Self::Stream> {
        let socket = self
            .inner
            .take()
            .ok_or_else(|| anyhow!("socket to {} already closed", self.target.addr))?;
        info!(
            "[BT] Connecting to {} channel {}",
            self.target.addr, self.target.channel
        );
        let stream = socket
            .connect(self.target)
            .await
            .map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;
        info!("[BT] Connected to {}", self.target.addr);
        Ok(stream)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// RFCOMM transport backed by BlueZ
pub struct RfcommTransport {
    config: RfcommConfig,
    adapter: Adapter,
    _session: Session,
}

impl RfcommTransport {
    /// Open a BlueZ session and select the configured adapter
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = match &config.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("[BT] Using adapter {}", adapter.name());
        Ok(Self {
            config,
            adapter,
            _session: session,
        })
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    type Listener = RfcommListener;
    type Socket = RfcommClientSocket;

    async fn listen(&self, service: ServiceId) -> Result<Self::Listener> {
        if !self.adapter.is_powered().await? {
            bail!("Bluetooth adapter {} is powered off", self.adapter.name());
        }
        let channel = self.config.channel_for(service)?;
        let local = self.adapter.address().await?;

        let listener = Listener::bind(RfcommAddr::new(local, channel))
            .await
            .with_context(|| format!("bind RFCOMM channel {}", channel))?;
        info!(
            "[BT] Listening for service {} on {} channel {}",
            service, local, channel
        );
        Ok(RfcommListener {
            inner: Some(listener),
        })
    }

    async fn open_client_socket(&self, peer: &PeerId, service: ServiceId) -> Result<Self::Socket> {
        let addr: Address = peer
            .as_str()
            .parse()
            .map_err(|_| anyhow!("peer {} is not a Bluetooth address", peer))?;
        let channel = self.config.channel_for(service)?;
        let socket = Socket::new()?;
        debug!("[BT] Socket for {} channel {} allocated", addr, channel);
        Ok(RfcommClientSocket {
            inner: Some(socket),
            target: RfcommAddr::new(addr, channel),
        })
    }

    async fn cancel_discovery(&self) {
        // BlueZ stops scanning once every discovery session is dropped; this
        // process holds none, so a running scan belongs to someone else.
        match self.adapter.is_discovering().await {
            Ok(true) => warn!(
                "[BT] Adapter {} is discovering, connection setup may be slow",
                self.adapter.name()
            ),
            Ok(false) => {}
            Err(e) => debug!("[BT] Could not query discovery state: {}", e),
        }
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btchat_shared::Uuid;

    #[test]
    fn test_default_config() {
        let config = RfcommConfig::default();
        assert!(config.adapter.is_none());
        assert_eq!(
            config.channel_for(ServiceId::default()).unwrap(),
            DEFAULT_RFCOMM_CHANNEL
        );
    }

    #[test]
    fn test_unknown_service_has_no_channel() {
        let config = RfcommConfig::default();
        let other = ServiceId::new(Uuid::from_u128(1));
        assert!(config.channel_for(other).is_err());
    }

    #[test]
    fn test_custom_channel() {
        let service = ServiceId::new(Uuid::from_u128(7));
        let config = RfcommConfig {
            channels: HashMap::from([(service, 5)]),
            ..Default::default()
        };
        assert_eq!(config.channel_for(service).unwrap(), 5);
    }
}
