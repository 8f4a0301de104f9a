use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::protocol::{BROADCAST_PORT, MASTER_PORT};
use crate::sync::lock;

const RELAY_IDLE_SLEEP: Duration = Duration::from_millis(2);
const MAX_DATAGRAM: usize = 65_507;
const ANNOUNCE: &[u8] = b"port";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerPorts {
    pub discovery: u16,
    pub master: u16,
}

impl Default for BrokerPorts {
    fn default() -> Self {
        Self {
            discovery: BROADCAST_PORT,
            master: MASTER_PORT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerRole {
    Master,
    Slave,
}

#[derive(Debug)]
pub struct BrokerSocket {
    socket: UdpSocket,
    send_lock: Mutex<()>,
    port: u16,
}

impl BrokerSocket {
    fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        let port = socket.local_addr()?.port();
        Ok(Self {
            socket,
            send_lock: Mutex::new(()),
            port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn send_to(&self, bytes: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let _guard = lock(&self.send_lock);
        self.socket.send_to(bytes, addr)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

struct Relay {
    running: Arc<AtomicBool>,
    roster: Arc<Mutex<Vec<u16>>>,
    handle: Option<JoinHandle<()>>,
}

/// Per-peer UDP endpoint that still sees LAN broadcasts when several peers
/// share one host.
///
/// Every broker owns an ephemeral port. The first broker on the host also
/// binds the discovery port and becomes the master: it re-sends every
/// datagram arriving there to each registered port on localhost. Later
/// brokers fail that bind, become slaves and register their port with the
/// master.
pub struct UdpPortBroker {
    socket: Arc<BrokerSocket>,
    role: BrokerRole,
    ports: BrokerPorts,
    relay: Option<Relay>,
}

impl UdpPortBroker {
    pub fn bind(ports: BrokerPorts) -> io::Result<Self> {
        let socket = Arc::new(BrokerSocket::new(UdpSocket::bind((
            Ipv4Addr::UNSPECIFIED,
            0,
        ))?)?);

        match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, ports.discovery)) {
            Ok(discovery) => {
                let relay = Relay::spawn(discovery, ports.master, socket.port())?;
                log::info!(
                    "UDP broker on port {} is master for discovery port {}",
                    socket.port(),
                    ports.discovery
                );
                Ok(Self {
                    socket,
                    role: BrokerRole::Master,
                    ports,
                    relay: Some(relay),
                })
            }
            Err(e) => {
                log::debug!("Discovery port {} taken ({e}), registering as slave", ports.discovery);
                socket.send_to(ANNOUNCE, SocketAddr::from((Ipv4Addr::LOCALHOST, ports.master)))?;
                log::info!("UDP broker on port {} is slave", socket.port());
                Ok(Self {
                    socket,
                    role: BrokerRole::Slave,
                    ports,
                    relay: None,
                })
            }
        }
    }

    pub fn socket(&self) -> &Arc<BrokerSocket> {
        &self.socket
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn role(&self) -> BrokerRole {
        self.role
    }

    pub fn ports(&self) -> BrokerPorts {
        self.ports
    }

    pub fn roster(&self) -> Vec<u16> {
        self.relay
            .as_ref()
            .map(|r| lock(&r.roster).clone())
            .unwrap_or_default()
    }

    pub fn shutdown(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            relay.stop();
        }
    }
}

impl Drop for UdpPortBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Relay {
    fn spawn(discovery: UdpSocket, master_port: u16, own_port: u16) -> io::Result<Self> {
        let collector = UdpSocket::bind((Ipv4Addr::LOCALHOST, master_port))?;
        discovery.set_nonblocking(true)?;
        collector.set_nonblocking(true)?;

        let running = Arc::new(AtomicBool::new(true));
        let roster = Arc::new(Mutex::new(vec![own_port]));
        let handle = thread::Builder::new().name("udp-broker".into()).spawn({
            let running = running.clone();
            let roster = roster.clone();
            move || relay_loop(&discovery, &collector, &running, &roster)
        })?;

        Ok(Self {
            running,
            roster,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn relay_loop(
    discovery: &UdpSocket,
    collector: &UdpSocket,
    running: &AtomicBool,
    roster: &Mutex<Vec<u16>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::SeqCst) {
        let mut idle = true;

        loop {
            match collector.recv_from(&mut buf) {
                Ok((_, from)) => {
                    idle = false;
                    let mut ports = lock(roster);
                    if !ports.contains(&from.port()) {
                        ports.push(from.port());
                        log::debug!("Broker roster gained port {}", from.port());
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("Broker roster receive failed: {e}");
                    break;
                }
            }
        }

        loop {
            match discovery.recv_from(&mut buf) {
                Ok((len, _)) => {
                    idle = false;
                    let ports = lock(roster).clone();
                    for port in ports {
                        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
                        if let Err(e) = collector.send_to(&buf[..len], target) {
                            log::debug!("Relay to port {port} failed: {e}");
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("Broker discovery receive failed: {e}");
                    break;
                }
            }
        }

        if idle {
            thread::sleep(RELAY_IDLE_SLEEP);
        }
    }
    log::debug!("UDP broker relay stopped");
}
