//! Link configuration

use crate::transport::{RfcommConfig, TcpSimConfig};
use btchat_shared::{link, ServiceId, SERVICE_NAME};

/// Transport backing the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Use real RFCOMM Bluetooth (requires BlueZ)
    #[default]
    Rfcomm,
    /// Use TCP simulation (for development)
    TcpSimulation,
}

/// Configuration for the link manager and its transport
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Service both ends agree on out of band
    pub service: ServiceId,
    /// Name of the advertised service record
    pub service_name: String,
    /// Maximum bytes handed out per inbound frame
    pub read_buffer_size: usize,
    /// Capacity of the command queue feeding the manager task
    pub command_capacity: usize,
    pub mode: TransportMode,
    pub rfcomm: RfcommConfig,
    pub tcp: TcpSimConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service: ServiceId::default(),
            service_name: SERVICE_NAME.into(),
            read_buffer_size: link::READ_BUFFER_SIZE,
            command_capacity: link::EVENT_QUEUE_CAPACITY,
            mode: TransportMode::default(),
            rfcomm: RfcommConfig::default(),
            tcp: TcpSimConfig::default(),
        }
    }
}
