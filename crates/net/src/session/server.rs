use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::SessionLinks;
use super::config::ServerConfig;
use super::file::{FileTransfer, PacketSink};
use crate::error::NetError;
use crate::net::{
    BrokerRole, BrokerSocket, CheckServerRequest, CommandType, ConnectRequest, Connection,
    ConnectionId, ConnectionInfo, ConnectionTable, CustomCommandHeader, NetworkStats, Ping,
    ServerAnnouncement, StreamState, TransportKind, UdpPortBroker, WireReader, bare,
    decode_object, encode_custom_command, encode_delete_objects, encode_new_objects,
    encode_update_objects, local_ip,
};
use crate::replication::{Command, ObjectRegistry};
use crate::sync::lock;

const MAX_DATAGRAM: usize = 65_507;
const MAX_OBJECTS_PER_MESSAGE: usize = u8::MAX as usize;

pub type NewConnectionHandler = Box<dyn FnMut(&ConnectionInfo, &mut ObjectRegistry) + Send>;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        id: ConnectionId,
        name: String,
        addr: SocketAddr,
    },
    ClientRemoved {
        id: ConnectionId,
        name: String,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outgoing {
    Peer(ConnectionId, Vec<u8>),
    AllPeers {
        bytes: Vec<u8>,
        except: Option<ConnectionId>,
    },
    Datagram(SocketAddr, Vec<u8>),
    Close(ConnectionId),
}

/// Sender of a message being dispatched. Unknown UDP senders get a
/// throwaway record that is dropped unless their message registers them.
enum Peer {
    Known(ConnectionId),
    Temporary(Connection),
}

pub(crate) struct ServerShared {
    connections: Mutex<ConnectionTable>,
    listening: AtomicBool,
    custom_info: Mutex<String>,
    events: Mutex<VecDeque<ServerEvent>>,
    injected: Mutex<VecDeque<Outgoing>>,
    on_new_connection: Mutex<Option<NewConnectionHandler>>,
    stats: Mutex<NetworkStats>,
}

impl ServerShared {
    pub(crate) fn new(custom_info: String, listening: bool) -> Self {
        Self {
            connections: Mutex::new(ConnectionTable::new()),
            listening: AtomicBool::new(listening),
            custom_info: Mutex::new(custom_info),
            events: Mutex::new(VecDeque::new()),
            injected: Mutex::new(VecDeque::new()),
            on_new_connection: Mutex::new(None),
            stats: Mutex::new(NetworkStats::default()),
        }
    }

    fn push_event(&self, event: ServerEvent) {
        lock(&self.events).push_back(event);
    }
}

/// Message handling of the server, free of sockets. Everything it wants
/// sent lands in an outbox the session thread flushes in order.
pub(crate) struct ServerCore {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    registry: Arc<Mutex<ObjectRegistry>>,
    links: SessionLinks,
    outbox: VecDeque<Outgoing>,
    udp_port: u16,
    local_ip: IpAddr,
    clock: Instant,
    last_broadcast: Instant,
    last_sweep: Instant,
}

impl ServerCore {
    pub(crate) fn new(
        config: ServerConfig,
        shared: Arc<ServerShared>,
        registry: Arc<Mutex<ObjectRegistry>>,
        links: SessionLinks,
        udp_port: u16,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            shared,
            registry,
            links,
            outbox: VecDeque::new(),
            udp_port,
            local_ip: local_ip(),
            clock: now,
            last_broadcast: now,
            last_sweep: now,
        }
    }

    fn connections(&self) -> MutexGuard<'_, ConnectionTable> {
        lock(&self.shared.connections)
    }

    fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    fn clock_ms(&self) -> i32 {
        self.clock.elapsed().as_millis() as i32
    }

    pub(crate) fn take_outbox(&mut self) -> VecDeque<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn absorb_injected(&mut self) {
        let injected = std::mem::take(&mut *lock(&self.shared.injected));
        self.outbox.extend(injected);
    }

    fn report(&self, from: SocketAddr, error: NetError) {
        log::warn!("Message from {from} rejected: {error}");
        self.shared.push_event(ServerEvent::Error {
            message: format!("{from}: {error}"),
        });
    }

    pub(crate) fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        lock(&self.shared.stats).record_received(bytes.len());
        let known = self.connections().find_udp(from);
        let peer = match known {
            Some(id) => Peer::Known(id),
            None if self.is_listening() => Peer::Temporary(Connection::udp(from)),
            None => return,
        };
        if let Err(e) = self.dispatch(peer, bytes) {
            self.report(from, e);
        }
    }

    pub(crate) fn handle_frame(&mut self, id: ConnectionId, bytes: &[u8]) {
        lock(&self.shared.stats).record_received(bytes.len());
        let from = self.connections().get(id).map(|c| c.addr);
        if let Err(e) = self.dispatch(Peer::Known(id), bytes) {
            let from = from.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
            self.report(from, e);
        }
    }

    fn dispatch(&mut self, peer: Peer, bytes: &[u8]) -> Result<(), NetError> {
        let mut reader = WireReader::new(bytes);
        let command = CommandType::read(&mut reader)?;
        if let Peer::Known(id) = &peer {
            if let Some(connection) = self.connections().get_mut(*id) {
                connection.touch();
            }
        }

        match command {
            // Our own or another server's announcement, relayed by the broker.
            CommandType::Broadcast => Ok(()),
            CommandType::NewConnection => self.receive_new_connection(peer, &mut reader),
            CommandType::EndConnection => {
                if let Peer::Known(id) = peer {
                    self.end_connection(id);
                }
                Ok(())
            }
            CommandType::CustomCommand => self.receive_custom_command(&peer, &mut reader),
            CommandType::Ping => self.receive_ping(&peer, &mut reader),
            CommandType::File => {
                if let Peer::Known(id) = peer {
                    self.outbox.push_back(Outgoing::AllPeers {
                        bytes: bytes.to_vec(),
                        except: Some(id),
                    });
                }
                Ok(())
            }
            CommandType::CheckServer => {
                let request = CheckServerRequest::decode(&mut reader)?;
                if !self.is_listening() {
                    return Ok(());
                }
                let host = request
                    .reply_to
                    .and_then(|host| host.parse::<IpAddr>().ok())
                    .or_else(|| self.peer_addr(&peer).map(|addr| addr.ip()));
                if let Some(host) = host {
                    let target = SocketAddr::new(host, self.config.ports.discovery);
                    let announcement = self.announcement().encode();
                    self.outbox
                        .push_back(Outgoing::Datagram(target, announcement));
                }
                Ok(())
            }
            other => Err(NetError::UnexpectedCommand(other)),
        }
    }

    fn peer_addr(&self, peer: &Peer) -> Option<SocketAddr> {
        match peer {
            Peer::Known(id) => self.connections().get(*id).map(|c| c.addr),
            Peer::Temporary(connection) => Some(connection.addr),
        }
    }

    fn is_colocated(&self, addr: SocketAddr) -> bool {
        let port = self.links.colocated_client_port.load(Ordering::SeqCst);
        port != 0
            && addr.port() == port
            && (addr.ip().is_loopback() || addr.ip() == self.local_ip)
    }

    fn receive_new_connection(
        &mut self,
        peer: Peer,
        reader: &mut WireReader<'_>,
    ) -> Result<(), NetError> {
        if !self.is_listening() {
            if let Peer::Known(id) = peer {
                if let Some(connection) = self.connections().get_mut(id) {
                    if !connection.accepted {
                        connection.shutdown();
                    }
                }
            }
            log::debug!("Ignoring connection request while not listening");
            return Ok(());
        }

        let request = ConnectRequest::decode(reader)?;
        // Objects spawned so far reach current peers through the regular
        // announcement; the newcomer gets them in its sync.
        self.flush_new_objects();

        let max = self.config.max_connections;
        let mut table = self.connections();
        let current = table.connected_count();
        let id = match peer {
            Peer::Known(id) => {
                let Some(connection) = table.get_mut(id) else {
                    return Ok(());
                };
                if connection.kind() == TransportKind::Udp && connection.alive {
                    return Err(NetError::ConnectionExists(connection.addr));
                }
                let already_counted = connection.alive && connection.accepted;
                if !already_counted && current >= max as usize {
                    let addr = connection.addr;
                    drop(table);
                    self.outbox.push_back(Outgoing::Close(id));
                    return Err(self.deny(addr, current, max));
                }
                if connection.kind() == TransportKind::Tcp {
                    connection.addr.set_port(request.udp_port);
                }
                connection.name = request.name;
                connection.alive = true;
                connection.accepted = true;
                id
            }
            Peer::Temporary(mut connection) => {
                if current >= max as usize {
                    let addr = connection.addr;
                    drop(table);
                    self.outbox
                        .push_back(Outgoing::Datagram(addr, bare(CommandType::EndConnection)));
                    return Err(self.deny(addr, current, max));
                }
                connection.name = request.name;
                connection.alive = true;
                connection.accepted = true;
                connection.touch();
                table.insert(connection)
            }
        };

        let stream_addr = table
            .get(id)
            .filter(|c| c.kind() == TransportKind::Tcp)
            .map(|c| c.addr);
        if let Some(addr) = stream_addr {
            if let Some(stale) = table.find_udp(addr).filter(|stale| *stale != id) {
                table.remove(stale);
                log::debug!("TCP connection {id} replaces UDP record {stale} for {addr}");
            }
        }

        let local_host = table.get(id).is_some_and(|c| self.is_colocated(c.addr));
        let Some(info) = table.get_mut(id).map(|c| {
            c.local_host = local_host;
            c.info(id, Instant::now())
        }) else {
            return Ok(());
        };
        drop(table);

        log::info!(
            "{:?} connected from {} over {}",
            info.name,
            info.addr,
            info.transport
        );
        self.shared.push_event(ServerEvent::ClientConnected {
            id,
            name: info.name.clone(),
            addr: info.addr,
        });

        if !info.local_host {
            self.sync_new_peer(id);
        }
        self.run_new_connection_handler(&info);
        Ok(())
    }

    fn deny(&self, addr: SocketAddr, current: usize, max: u8) -> NetError {
        self.shared.push_event(ServerEvent::ConnectionDenied {
            addr,
            reason: "server full".into(),
        });
        NetError::ServerFull {
            current: current.min(u8::MAX as usize) as u8,
            max,
        }
    }

    fn sync_new_peer(&mut self, id: ConnectionId) {
        let batch_size = self.config.sync_batch_size.clamp(1, MAX_OBJECTS_PER_MESSAGE);
        let registry = lock(&self.registry);
        let snapshot = registry.snapshot();
        for batch in snapshot.chunks(batch_size) {
            self.outbox
                .push_back(Outgoing::Peer(id, encode_new_objects(batch)));
        }
        log::debug!("Synced {} objects to {id}", snapshot.len());
    }

    fn run_new_connection_handler(&self, info: &ConnectionInfo) {
        let mut handler = lock(&self.shared.on_new_connection);
        if let Some(handler) = handler.as_mut() {
            let mut registry = lock(&self.registry);
            handler(info, &mut registry);
        }
    }

    pub(crate) fn end_connection(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections().get_mut(id) {
            if connection.alive {
                log::info!("{:?} ended its connection", connection.name);
            }
            connection.shutdown();
        }
    }

    fn receive_custom_command(
        &mut self,
        peer: &Peer,
        reader: &mut WireReader<'_>,
    ) -> Result<(), NetError> {
        let header = CustomCommandHeader::decode(reader)?;
        let registered = match peer {
            Peer::Known(id) => self
                .connections()
                .get(*id)
                .filter(|c| c.accepted)
                .map(|c| c.name.clone()),
            Peer::Temporary(_) => None,
        };
        if registered.as_deref() != Some(header.sender.as_str()) {
            return Err(NetError::AuthenticationFailed {
                claimed: header.sender,
                registered: registered.unwrap_or_default(),
            });
        }

        let object_bytes = reader.remaining();
        let state = decode_object(reader)?;
        let consumed = object_bytes.len() - reader.remaining_len();

        let mut command = Command::new(header.code, state);
        lock(&self.registry).dispatch_command(&mut command)?;

        self.flush_new_objects();
        if !command.is_handled() {
            return Err(NetError::CommandUndecided {
                object: command.target(),
                code: header.code,
            });
        }
        if command.is_validated() {
            let reflected =
                encode_custom_command(&self.config.name, header.code, &object_bytes[..consumed]);
            self.outbox.push_back(Outgoing::AllPeers {
                bytes: reflected,
                except: None,
            });
        } else {
            log::debug!(
                "Command {} on {} rejected",
                header.code,
                command.target()
            );
        }
        Ok(())
    }

    fn receive_ping(&mut self, peer: &Peer, reader: &mut WireReader<'_>) -> Result<(), NetError> {
        let ping = Ping::decode(reader)?;
        if ping.reflect {
            let reply = Ping {
                clock_ms: self.clock_ms(),
                reflect: false,
            }
            .encode();
            let out = match peer {
                Peer::Known(id) => Outgoing::Peer(*id, reply),
                Peer::Temporary(connection) => Outgoing::Datagram(connection.addr, reply),
            };
            self.outbox.push_back(out);
        }
        Ok(())
    }

    pub(crate) fn flush_new_objects(&mut self) {
        let mut registry = lock(&self.registry);
        let ids = registry.drain_new_objects();
        if ids.is_empty() {
            return;
        }
        for batch in registry.announcement(&ids).chunks(MAX_OBJECTS_PER_MESSAGE) {
            self.outbox.push_back(Outgoing::AllPeers {
                bytes: encode_new_objects(batch),
                except: None,
            });
        }
        registry.mark_flushed(&ids);
    }

    fn flush_deleted_objects(&mut self) {
        let ids = lock(&self.registry).drain_deleted();
        if !ids.is_empty() {
            self.outbox.push_back(Outgoing::AllPeers {
                bytes: encode_delete_objects(&ids),
                except: None,
            });
        }
    }

    pub(crate) fn push_updates(&mut self) {
        let mut registry = lock(&self.registry);
        let ids = registry.dirty_ids();
        if ids.is_empty() {
            return;
        }
        for batch in registry.states(&ids).chunks(MAX_OBJECTS_PER_MESSAGE) {
            self.outbox.push_back(Outgoing::AllPeers {
                bytes: encode_update_objects(batch),
                except: None,
            });
        }
        registry.mark_flushed(&ids);
    }

    fn sweep(&mut self, now: Instant) {
        let sweep = self
            .connections()
            .sweep(now, self.config.ping_threshold, self.config.dead_grace);
        if !sweep.ping.is_empty() {
            let ping = Ping {
                clock_ms: self.clock_ms(),
                reflect: true,
            }
            .encode();
            for id in sweep.ping {
                self.outbox.push_back(Outgoing::Peer(id, ping.clone()));
            }
        }
        if let Some((id, mut connection)) = sweep.removed {
            connection.shutdown();
            log::info!("Removed connection {:?} ({id})", connection.name);
            self.shared.push_event(ServerEvent::ClientRemoved {
                id,
                name: connection.name,
            });
        }
    }

    fn announcement(&self) -> ServerAnnouncement {
        ServerAnnouncement {
            address: self.local_ip.to_string(),
            port: self.udp_port,
            name: self.config.name.clone(),
            connected: self.connections().connected_count().min(u8::MAX as usize) as u8,
            max_connections: self.config.max_connections,
            custom_info: lock(&self.shared.custom_info).clone(),
        }
    }

    pub(crate) fn housekeeping(&mut self, now: Instant) {
        self.flush_new_objects();
        self.flush_deleted_objects();
        if self.links.replication_due.swap(false, Ordering::SeqCst) {
            self.push_updates();
        }

        if now.saturating_duration_since(self.last_sweep) >= self.config.sweep_interval {
            self.last_sweep = now;
            self.sweep(now);
        }

        if now.saturating_duration_since(self.last_broadcast) >= self.config.broadcast_interval {
            self.last_broadcast = now;
            if self.is_listening() {
                let target = SocketAddr::from((Ipv4Addr::BROADCAST, self.config.ports.discovery));
                let announcement = self.announcement().encode();
                self.outbox
                    .push_back(Outgoing::Datagram(target, announcement));
            }
        }
    }
}

struct ServerWorker {
    core: ServerCore,
    shared: Arc<ServerShared>,
    socket: Arc<BrokerSocket>,
    listener: TcpListener,
    running: Arc<AtomicBool>,
    idle_sleep: std::time::Duration,
    buf: Vec<u8>,
}

impl ServerWorker {
    fn run(mut self) {
        log::info!("Server thread started on port {}", self.socket.port());
        while self.running.load(Ordering::SeqCst) {
            let mut busy = self.accept_streams();
            busy |= self.pump_datagrams();
            busy |= self.pump_streams();

            self.core.absorb_injected();
            self.core.housekeeping(Instant::now());
            self.flush();
            self.flush_streams();

            if !busy {
                thread::sleep(self.idle_sleep);
            }
        }
        self.close_all();
        log::info!("Server thread stopped");
    }

    fn accept_streams(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    accepted = true;
                    if !self.shared.listening.load(Ordering::SeqCst) {
                        log::debug!("Closing TCP connection from {addr}, not listening");
                        continue;
                    }
                    if let Err(e) = stream
                        .set_nonblocking(true)
                        .and_then(|_| stream.set_nodelay(true))
                    {
                        log::warn!("Cannot configure stream from {addr}: {e}");
                        continue;
                    }
                    let id = lock(&self.shared.connections).insert(Connection::tcp(stream, addr));
                    log::debug!("New TCP connection {id} from {addr}");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("TCP accept failed: {e}");
                    break;
                }
            }
        }
        accepted
    }

    fn pump_datagrams(&mut self) -> bool {
        let mut received = false;
        loop {
            match self.socket.recv_from(&mut self.buf) {
                Ok(Some((len, from))) => {
                    received = true;
                    self.core.handle_datagram(from, &self.buf[..len]);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("UDP receive failed: {e}");
                    break;
                }
            }
        }
        received
    }

    fn pump_streams(&mut self) -> bool {
        let ids = lock(&self.shared.connections).ids_of(TransportKind::Tcp);
        let mut received = false;
        for id in ids {
            let result = {
                let mut table = lock(&self.shared.connections);
                match table.get_mut(id) {
                    Some(connection) if connection.alive => connection.receive_frames(),
                    _ => continue,
                }
            };
            match result {
                Ok((state, frames)) => {
                    received |= !frames.is_empty();
                    for frame in frames {
                        self.core.handle_frame(id, &frame);
                    }
                    if state == StreamState::Closed {
                        self.core.end_connection(id);
                    }
                }
                Err(e) => {
                    log::warn!("Stream {id} failed: {e}");
                    self.core.end_connection(id);
                }
            }
        }
        received
    }

    fn flush(&mut self) {
        let outbox = self.core.take_outbox();
        if outbox.is_empty() {
            return;
        }
        let mut table = lock(&self.shared.connections);
        let mut stats = lock(&self.shared.stats);
        for out in outbox {
            match out {
                Outgoing::Peer(id, bytes) => {
                    if send_to_peer(&mut table, &self.socket, id, &bytes) {
                        stats.record_sent(bytes.len());
                    }
                }
                Outgoing::AllPeers { bytes, except } => {
                    let targets: Vec<ConnectionId> = table
                        .iter()
                        .filter(|(id, c)| c.alive && c.accepted && Some(*id) != except)
                        .map(|(id, _)| id)
                        .collect();
                    for id in targets {
                        if send_to_peer(&mut table, &self.socket, id, &bytes) {
                            stats.record_sent(bytes.len());
                        }
                    }
                }
                Outgoing::Datagram(addr, bytes) => match self.socket.send_to(&bytes, addr) {
                    Ok(_) => stats.record_sent(bytes.len()),
                    Err(e) => log::debug!("Datagram to {addr} failed: {e}"),
                },
                Outgoing::Close(id) => {
                    send_to_peer(&mut table, &self.socket, id, &bare(CommandType::EndConnection));
                    if let Some(connection) = table.get_mut(id) {
                        connection.shutdown();
                    }
                }
            }
        }
    }

    fn flush_streams(&mut self) {
        let mut table = lock(&self.shared.connections);
        for id in table.ids_of(TransportKind::Tcp) {
            let Some(connection) = table.get_mut(id).filter(|c| c.alive) else {
                continue;
            };
            if let Err(e) = connection.flush_pending() {
                log::warn!("Dropping stream {id} ({:?}): {e}", connection.name);
                connection.shutdown();
            }
        }
    }

    fn close_all(&mut self) {
        self.core.absorb_injected();
        self.flush();
        let mut table = lock(&self.shared.connections);
        let goodbye = bare(CommandType::EndConnection);
        for id in table.ids() {
            if table.get(id).is_some_and(|c| c.alive && c.accepted) {
                send_to_peer(&mut table, &self.socket, id, &goodbye);
            }
            if let Some(connection) = table.get_mut(id) {
                connection.shutdown();
            }
        }
    }
}

fn send_to_peer(
    table: &mut ConnectionTable,
    socket: &BrokerSocket,
    id: ConnectionId,
    bytes: &[u8],
) -> bool {
    let Some(connection) = table.get_mut(id) else {
        return false;
    };
    if connection.kind() == TransportKind::Tcp && !connection.alive {
        return false;
    }
    match connection.send(socket, bytes) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Send to {:?} failed: {e}", connection.name);
            if connection.kind() == TransportKind::Tcp {
                connection.shutdown();
            }
            false
        }
    }
}

struct ServerSink {
    shared: Arc<ServerShared>,
    target: Option<ConnectionId>,
}

impl PacketSink for ServerSink {
    fn send_packet(&self, bytes: Vec<u8>) -> io::Result<()> {
        let out = match self.target {
            Some(id) => Outgoing::Peer(id, bytes),
            None => Outgoing::AllPeers {
                bytes,
                except: None,
            },
        };
        lock(&self.shared.injected).push_back(out);
        Ok(())
    }
}

pub struct ServerSession {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    broker: UdpPortBroker,
    links: SessionLinks,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ServerSession {
    pub fn start(
        config: ServerConfig,
        registry: Arc<Mutex<ObjectRegistry>>,
        links: SessionLinks,
    ) -> Result<Self, NetError> {
        let broker = UdpPortBroker::bind(config.ports)?;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, broker.port()))?;
        listener.set_nonblocking(true)?;

        lock(&registry).set_server_role(true);
        let shared = Arc::new(ServerShared::new(config.custom_info.clone(), config.listening));
        let running = Arc::new(AtomicBool::new(true));
        let worker = ServerWorker {
            core: ServerCore::new(
                config.clone(),
                shared.clone(),
                registry,
                links.clone(),
                broker.port(),
            ),
            shared: shared.clone(),
            socket: broker.socket().clone(),
            listener,
            running: running.clone(),
            idle_sleep: config.idle_sleep,
            buf: vec![0u8; MAX_DATAGRAM],
        };
        let handle = thread::Builder::new()
            .name("lanplay-server".into())
            .spawn(move || worker.run())?;
        links.server_running.store(true, Ordering::SeqCst);

        log::info!(
            "Server {:?} started on port {} (max {} clients)",
            config.name,
            broker.port(),
            config.max_connections
        );
        Ok(Self {
            config,
            shared,
            broker,
            links,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn port(&self) -> u16 {
        self.broker.port()
    }

    pub fn max_connections(&self) -> u8 {
        self.config.max_connections
    }

    pub fn broker_role(&self) -> BrokerRole {
        self.broker.role()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_listening(&self, listening: bool) {
        self.shared.listening.store(listening, Ordering::SeqCst);
        log::info!("Server {}", if listening { "listening" } else { "closed to new clients" });
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    pub fn set_custom_info(&self, info: impl Into<String>) {
        *lock(&self.shared.custom_info) = info.into();
    }

    pub fn custom_info(&self) -> String {
        lock(&self.shared.custom_info).clone()
    }

    pub fn set_new_connection_handler<F>(&self, handler: F)
    where
        F: FnMut(&ConnectionInfo, &mut ObjectRegistry) + Send + 'static,
    {
        *lock(&self.shared.on_new_connection) = Some(Box::new(handler));
    }

    pub fn connections(&self) -> Vec<ConnectionInfo> {
        lock(&self.shared.connections).infos(Instant::now())
    }

    pub fn connected_count(&self) -> usize {
        lock(&self.shared.connections).connected_count()
    }

    pub fn not_responding(&self) -> Vec<ConnectionInfo> {
        lock(&self.shared.connections).not_responding(Instant::now(), self.config.connection_timeout)
    }

    pub fn close_connection(&self, id: ConnectionId) {
        lock(&self.shared.injected).push_back(Outgoing::Close(id));
    }

    pub fn drain_events(&self) -> Vec<ServerEvent> {
        lock(&self.shared.events).drain(..).collect()
    }

    pub fn stats(&self) -> NetworkStats {
        *lock(&self.shared.stats)
    }

    pub fn send_file(
        &self,
        path: impl Into<PathBuf>,
        target: Option<ConnectionId>,
    ) -> io::Result<FileTransfer> {
        let sink = Arc::new(ServerSink {
            shared: self.shared.clone(),
            target,
        });
        FileTransfer::start(path, sink)
    }

    pub fn stop_broker(&mut self) {
        self.broker.shutdown();
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            self.links.server_running.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.close();
    }
}
