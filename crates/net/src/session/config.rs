use std::path::PathBuf;
use std::time::Duration;

use crate::net::{
    BrokerPorts, CONNECTION_TIMEOUT, DEAD_GRACE, DEFAULT_MAX_CONNECTIONS, PING_THRESHOLD,
    SYNC_BATCH_SIZE,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub max_connections: u8,
    pub custom_info: String,
    pub listening: bool,
    pub ports: BrokerPorts,
    pub broadcast_interval: Duration,
    pub sweep_interval: Duration,
    pub ping_threshold: Duration,
    pub dead_grace: Duration,
    pub connection_timeout: Duration,
    pub sync_batch_size: usize,
    pub idle_sleep: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "server".into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            custom_info: String::new(),
            listening: true,
            ports: BrokerPorts::default(),
            broadcast_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_millis(50),
            ping_threshold: PING_THRESHOLD,
            dead_grace: DEAD_GRACE,
            connection_timeout: CONNECTION_TIMEOUT,
            sync_batch_size: SYNC_BATCH_SIZE,
            idle_sleep: Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    pub ports: BrokerPorts,
    pub connect_timeout: Duration,
    pub connection_timeout: Duration,
    pub download_dir: PathBuf,
    pub idle_sleep: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "client".into(),
            ports: BrokerPorts::default(),
            connect_timeout: Duration::from_secs(3),
            connection_timeout: CONNECTION_TIMEOUT,
            download_dir: PathBuf::from("."),
            idle_sleep: Duration::from_millis(1),
        }
    }
}
