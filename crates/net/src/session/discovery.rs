use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::net::ServerAnnouncement;

#[derive(Debug, Clone, PartialEq)]
pub struct InfoServer {
    pub address: IpAddr,
    pub port: u16,
    pub name: String,
    pub connected: u8,
    pub max_connections: u8,
    pub custom_info: String,
    pub last_seen: Instant,
}

impl InfoServer {
    pub fn from_announcement(announcement: ServerAnnouncement, seen: Instant) -> Option<Self> {
        let address = announcement.address.parse().ok()?;
        Some(Self {
            address,
            port: announcement.port,
            name: announcement.name,
            connected: announcement.connected,
            max_connections: announcement.max_connections,
            custom_info: announcement.custom_info,
            last_seen: seen,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn is_full(&self) -> bool {
        self.connected >= self.max_connections
    }
}

#[derive(Debug, Default)]
pub struct ServerDirectory {
    servers: Vec<InfoServer>,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_or_update(&mut self, info: InfoServer) {
        match self.servers.iter_mut().find(|s| s.addr() == info.addr()) {
            Some(existing) => *existing = info,
            None => {
                log::info!("Discovered server {:?} at {}", info.name, info.addr());
                self.servers.push(info);
            }
        }
    }

    pub fn available(&self, now: Instant, max_age: Option<Duration>) -> Vec<InfoServer> {
        self.servers
            .iter()
            .filter(|s| max_age.is_none_or(|age| now.saturating_duration_since(s.last_seen) <= age))
            .cloned()
            .collect()
    }

    pub fn find(&self, addr: SocketAddr) -> Option<&InfoServer> {
        self.servers.iter().find(|s| s.addr() == addr)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn clear(&mut self) {
        self.servers.clear();
    }
}
