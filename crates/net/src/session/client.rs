use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::SessionLinks;
use super::config::ClientConfig;
use super::discovery::{InfoServer, ServerDirectory};
use super::file::{FileReceiver, FileTransfer, PacketSink, ReceivedFile, executable_dir};
use crate::error::NetError;
use crate::net::{
    BrokerRole, BrokerSocket, CheckServerRequest, CommandType, ConnectRequest, Connection,
    ConnectionId, ConnectionInfo, CustomCommandHeader, FileMessage, NetworkStats, Ping,
    ServerAnnouncement, StreamState, TransportKind, UdpPortBroker, WireReader, bare,
    decode_delete_objects, decode_new_objects, decode_object, decode_update_objects,
    encode_command_state, is_local_address, local_ip,
};
use crate::replication::{Command, ObjectRegistry, ReplicatedState};
use crate::sync::lock;

const MAX_DATAGRAM: usize = 65_507;

pub(crate) struct ClientShared {
    server: Mutex<Option<Connection>>,
    files: Mutex<HashMap<String, FileReceiver>>,
    stats: Mutex<NetworkStats>,
}

impl ClientShared {
    fn new() -> Self {
        Self {
            server: Mutex::new(None),
            files: Mutex::new(HashMap::new()),
            stats: Mutex::new(NetworkStats::default()),
        }
    }
}

#[derive(Clone)]
struct ServerLink {
    shared: Arc<ClientShared>,
    socket: Arc<BrokerSocket>,
}

impl ServerLink {
    fn send(&self, bytes: &[u8]) -> Result<(), NetError> {
        let mut server = lock(&self.shared.server);
        let connection = server
            .as_mut()
            .filter(|c| c.alive)
            .ok_or(NetError::NotConnected)?;
        if let Err(e) = connection.send(&self.socket, bytes) {
            if connection.kind() == TransportKind::Tcp {
                connection.shutdown();
            }
            return Err(e.into());
        }
        lock(&self.shared.stats).record_sent(bytes.len());
        Ok(())
    }

    fn flush_pending(&self) {
        let mut server = lock(&self.shared.server);
        let Some(connection) = server.as_mut().filter(|c| c.alive) else {
            return;
        };
        if let Err(e) = connection.flush_pending() {
            log::warn!("Dropping stream to {:?}: {e}", connection.name);
            connection.shutdown();
        }
    }
}

impl PacketSink for ServerLink {
    fn send_packet(&self, bytes: Vec<u8>) -> io::Result<()> {
        self.send(&bytes).map_err(|e| match e {
            NetError::Io(io) => io,
            other => io::Error::new(io::ErrorKind::NotConnected, other.to_string()),
        })
    }
}

pub(crate) struct ClientCore {
    download_dir: PathBuf,
    shared: Arc<ClientShared>,
    registry: Arc<Mutex<ObjectRegistry>>,
    directory: Arc<Mutex<ServerDirectory>>,
    links: SessionLinks,
    outbox: Vec<Vec<u8>>,
    clock: Instant,
}

impl ClientCore {
    pub(crate) fn new(
        download_dir: PathBuf,
        shared: Arc<ClientShared>,
        registry: Arc<Mutex<ObjectRegistry>>,
        directory: Arc<Mutex<ServerDirectory>>,
        links: SessionLinks,
    ) -> Self {
        Self {
            download_dir,
            shared,
            registry,
            directory,
            links,
            outbox: Vec::new(),
            clock: Instant::now(),
        }
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn handle_datagram(&mut self, from: SocketAddr, bytes: &[u8]) {
        let from_server = lock(&self.shared.server)
            .as_ref()
            .is_some_and(|c| c.kind() == TransportKind::Udp && c.addr == from);
        let result = if from_server {
            self.handle_server_message(bytes)
        } else {
            self.handle_discovery(bytes)
        };
        if let Err(e) = result {
            log::warn!("Message from {from} rejected: {e}");
        }
    }

    fn handle_discovery(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        let mut reader = WireReader::new(bytes);
        if CommandType::read(&mut reader)? != CommandType::Broadcast {
            return Ok(());
        }
        let announcement = ServerAnnouncement::decode(&mut reader)?;
        match InfoServer::from_announcement(announcement, Instant::now()) {
            Some(info) => lock(&self.directory).add_or_update(info),
            None => log::debug!("Ignoring announcement with an unparsable address"),
        }
        Ok(())
    }

    /// True when this process also runs the server we are connected to, in
    /// which case object traffic already happened in the shared registry.
    fn shares_server_state(&self) -> bool {
        self.links.server_running.load(Ordering::SeqCst)
            && lock(&self.shared.server)
                .as_ref()
                .is_some_and(|c| c.local_host)
    }

    pub(crate) fn handle_server_message(&mut self, bytes: &[u8]) -> Result<(), NetError> {
        lock(&self.shared.stats).record_received(bytes.len());
        if let Some(server) = lock(&self.shared.server).as_mut() {
            server.touch();
        }

        let mut reader = WireReader::new(bytes);
        let command = CommandType::read(&mut reader)?;
        match command {
            CommandType::CustomCommand => {
                if self.shares_server_state() {
                    return Ok(());
                }
                let header = CustomCommandHeader::decode(&mut reader)?;
                let state = decode_object(&mut reader)?;
                let mut command = Command::new(header.code, state);
                lock(&self.registry).dispatch_command(&mut command)
            }
            CommandType::NewObject => {
                if self.shares_server_state() {
                    return Ok(());
                }
                let entries = decode_new_objects(&mut reader)?;
                let mut registry = lock(&self.registry);
                if let Some((type_name, _)) =
                    entries.iter().find(|(name, _)| !registry.has_factory(name))
                {
                    return Err(NetError::UnknownType(type_name.clone()));
                }
                for (type_name, state) in entries {
                    let id = registry.instantiate_remote(&type_name, &state)?;
                    log::debug!("Instantiated {type_name} {id}");
                }
                Ok(())
            }
            CommandType::UpdateObjects => {
                if self.shares_server_state() {
                    return Ok(());
                }
                let states = decode_update_objects(&mut reader)?;
                let mut registry = lock(&self.registry);
                for state in states {
                    match registry.apply_update(state.object_id(), &state, false) {
                        Ok(_) => {}
                        Err(NetError::UnknownObject(id)) => {
                            log::debug!("Update for unknown object {id}");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            }
            CommandType::DeleteObject => {
                if self.shares_server_state() {
                    return Ok(());
                }
                let ids = decode_delete_objects(&mut reader)?;
                let mut registry = lock(&self.registry);
                for id in ids {
                    registry.despawn(id);
                }
                Ok(())
            }
            CommandType::Ping => {
                let ping = Ping::decode(&mut reader)?;
                if ping.reflect {
                    let reply = Ping {
                        clock_ms: self.clock.elapsed().as_millis() as i32,
                        reflect: false,
                    };
                    self.outbox.push(reply.encode());
                }
                Ok(())
            }
            CommandType::File => self.receive_file(&mut reader),
            CommandType::EndConnection => {
                if let Some(server) = lock(&self.shared.server).as_mut() {
                    log::info!("Server {:?} ended the connection", server.name);
                    server.shutdown();
                }
                Ok(())
            }
            CommandType::Broadcast => Ok(()),
            other => Err(NetError::UnexpectedCommand(other)),
        }
    }

    fn receive_file(&mut self, reader: &mut WireReader<'_>) -> Result<(), NetError> {
        match FileMessage::decode(reader)? {
            FileMessage::Start {
                name,
                size,
                origin_path,
            } => {
                let local_server = lock(&self.shared.server)
                    .as_ref()
                    .is_some_and(|c| c.local_host);
                let receiver = if local_server && origin_path == executable_dir() {
                    log::info!("Already have {name}, not writing it");
                    FileReceiver::skipped(&name, size)
                } else {
                    log::info!("Receiving {name} ({size} bytes)");
                    FileReceiver::create(&self.download_dir, &name, size)
                };
                lock(&self.shared.files).insert(name, receiver);
            }
            FileMessage::Chunk {
                name,
                failed,
                bytes,
            } => match lock(&self.shared.files).get_mut(&name) {
                Some(receiver) => receiver.on_chunk(failed, &bytes),
                None => log::debug!("Chunk for unannounced file {name}"),
            },
        }
        Ok(())
    }
}

struct ClientWorker {
    core: ClientCore,
    link: ServerLink,
    running: Arc<AtomicBool>,
    idle_sleep: std::time::Duration,
    buf: Vec<u8>,
}

impl ClientWorker {
    fn run(mut self) {
        log::info!("Client thread started on port {}", self.link.socket.port());
        while self.running.load(Ordering::SeqCst) {
            let mut busy = self.pump_datagrams();
            busy |= self.pump_stream();

            for reply in self.core.take_outbox() {
                if let Err(e) = self.link.send(&reply) {
                    log::debug!("Reply to server failed: {e}");
                }
            }
            self.link.flush_pending();

            if !busy {
                thread::sleep(self.idle_sleep);
            }
        }
        log::info!("Client thread stopped");
    }

    fn pump_datagrams(&mut self) -> bool {
        let mut received = false;
        loop {
            match self.link.socket.recv_from(&mut self.buf) {
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

    fn pump_stream(&mut self) -> bool {
        let result = {
            let mut server = lock(&self.link.shared.server);
            match server.as_mut() {
                Some(c) if c.alive && c.kind() == TransportKind::Tcp => c.receive_frames(),
                _ => return false,
            }
        };
        match result {
            Ok((state, frames)) => {
                let received = !frames.is_empty();
                for frame in frames {
                    if let Err(e) = self.core.handle_server_message(&frame) {
                        log::warn!("Message from server rejected: {e}");
                    }
                }
                if state == StreamState::Closed {
                    log::info!("Server closed the stream");
                    if let Some(server) = lock(&self.link.shared.server).as_mut() {
                        server.shutdown();
                    }
                }
                received
            }
            Err(e) => {
                log::warn!("Server stream failed: {e}");
                if let Some(server) = lock(&self.link.shared.server).as_mut() {
                    server.shutdown();
                }
                false
            }
        }
    }
}

pub struct ClientSession {
    config: ClientConfig,
    link: ServerLink,
    broker: UdpPortBroker,
    links: SessionLinks,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClientSession {
    pub fn start(
        config: ClientConfig,
        registry: Arc<Mutex<ObjectRegistry>>,
        directory: Arc<Mutex<ServerDirectory>>,
        links: SessionLinks,
    ) -> Result<Self, NetError> {
        let broker = UdpPortBroker::bind(config.ports)?;
        links
            .colocated_client_port
            .store(broker.port(), Ordering::SeqCst);

        let shared = Arc::new(ClientShared::new());
        let link = ServerLink {
            shared: shared.clone(),
            socket: broker.socket().clone(),
        };
        let running = Arc::new(AtomicBool::new(true));
        let worker = ClientWorker {
            core: ClientCore::new(
                config.download_dir.clone(),
                shared,
                registry,
                directory,
                links.clone(),
            ),
            link: link.clone(),
            running: running.clone(),
            idle_sleep: config.idle_sleep,
            buf: vec![0u8; MAX_DATAGRAM],
        };
        let handle = thread::Builder::new()
            .name("lanplay-client".into())
            .spawn(move || worker.run())?;

        log::info!("Client {:?} started on port {}", config.name, broker.port());
        Ok(Self {
            config,
            link,
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

    pub fn broker_role(&self) -> BrokerRole {
        self.broker.role()
    }

    pub fn connect(&self, server: &InfoServer, transport: TransportKind) -> Result<(), NetError> {
        if server.is_full() {
            return Err(NetError::ServerFull {
                current: server.connected,
                max: server.max_connections,
            });
        }
        self.connect_addr(&server.name, server.addr(), transport)
    }

    pub fn connect_addr(
        &self,
        server_name: &str,
        addr: SocketAddr,
        transport: TransportKind,
    ) -> Result<(), NetError> {
        let mut connection = match transport {
            TransportKind::Udp => Connection::udp(addr),
            TransportKind::Tcp => {
                let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout)?;
                stream.set_nonblocking(true)?;
                stream.set_nodelay(true)?;
                Connection::tcp(stream, addr)
            }
        };
        connection.name = server_name.to_owned();
        connection.alive = true;
        connection.accepted = true;
        connection.local_host = is_local_address(addr.ip());

        let request = ConnectRequest {
            name: self.config.name.clone(),
            udp_port: self.port(),
        }
        .encode();

        let mut slot = lock(&self.link.shared.server);
        if let Some(mut previous) = slot.take() {
            if previous.alive {
                let _ = previous.send(&self.link.socket, &bare(CommandType::EndConnection));
            }
            previous.shutdown();
        }
        connection.send(&self.link.socket, &request)?;
        lock(&self.link.shared.stats).record_sent(request.len());
        *slot = Some(connection);

        log::info!("Connected to {server_name:?} at {addr} over {transport}");
        Ok(())
    }

    pub fn disconnect(&self) {
        let mut slot = lock(&self.link.shared.server);
        if let Some(mut connection) = slot.take() {
            if connection.alive {
                let _ = connection.send(&self.link.socket, &bare(CommandType::EndConnection));
                log::info!("Disconnected from {:?}", connection.name);
            }
            connection.shutdown();
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.link.shared.server)
            .as_ref()
            .is_some_and(|c| c.alive)
    }

    pub fn server(&self) -> Option<ConnectionInfo> {
        lock(&self.link.shared.server)
            .as_ref()
            .map(|c| c.info(ConnectionId::detached(), Instant::now()))
    }

    pub fn is_server_silent(&self) -> bool {
        lock(&self.link.shared.server).as_ref().is_some_and(|c| {
            c.alive && c.since_last_contact(Instant::now()) >= self.config.connection_timeout
        })
    }

    pub fn send_command(&self, code: u16, state: &ReplicatedState<'_>) -> Result<(), NetError> {
        self.link
            .send(&encode_command_state(&self.config.name, code, state))
    }

    pub fn ping_server(&self) -> Result<(), NetError> {
        let ping = Ping {
            clock_ms: 0,
            reflect: true,
        };
        self.link.send(&ping.encode())
    }

    pub fn check_server_existence(&self, address: IpAddr) -> Result<(), NetError> {
        let target = SocketAddr::new(address, self.config.ports.discovery);
        let request = CheckServerRequest {
            reply_to: (!is_local_address(address)).then(|| local_ip().to_string()),
        };
        self.link.socket.send_to(&request.encode(), target)?;
        Ok(())
    }

    pub fn received_files(&self) -> Vec<ReceivedFile> {
        lock(&self.link.shared.files)
            .values()
            .map(FileReceiver::status)
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.is_connected()
            && lock(&self.link.shared.files)
                .values()
                .all(FileReceiver::is_complete)
    }

    pub fn send_file(&self, path: impl Into<PathBuf>) -> io::Result<FileTransfer> {
        FileTransfer::start(path, Arc::new(self.link.clone()))
    }

    pub fn stats(&self) -> NetworkStats {
        *lock(&self.link.shared.stats)
    }

    pub fn stop_broker(&mut self) {
        self.broker.shutdown();
    }

    pub fn close(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.disconnect();
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.links.colocated_client_port.store(0, Ordering::SeqCst);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{encode_delete_objects, encode_new_objects, encode_update_objects};
    use crate::replication::{NetworkObject, ObjectCore, ObjectId, Spawner, Value};

    struct Beacon {
        core: ObjectCore,
        commands: u32,
    }

    impl Beacon {
        fn build(mut core: ObjectCore) -> Result<Self, NetError> {
            core.register(0i32)?;
            Ok(Self { core, commands: 0 })
        }
    }

    impl NetworkObject for Beacon {
        fn core(&self) -> &ObjectCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ObjectCore {
            &mut self.core
        }

        fn receive_command(&mut self, command: &mut Command, _spawner: &mut Spawner<'_>) {
            self.commands += 1;
            command.accept();
        }
    }

    const SERVER: ([u8; 4], u16) = ([10, 0, 0, 1], 4000);

    fn client_core(local_host: bool, server_running: bool) -> (ClientCore, Arc<Mutex<ObjectRegistry>>) {
        let mut registry = ObjectRegistry::new();
        registry.register_factory("beacon", Beacon::build);
        let registry = Arc::new(Mutex::new(registry));

        let shared = Arc::new(ClientShared::new());
        let mut connection = Connection::udp(SocketAddr::from(SERVER));
        connection.alive = true;
        connection.local_host = local_host;
        *shared.server.lock().unwrap() = Some(connection);

        let links = SessionLinks::default();
        links.server_running.store(server_running, Ordering::SeqCst);
        let core = ClientCore::new(
            std::env::temp_dir(),
            shared,
            registry.clone(),
            Arc::new(Mutex::new(ServerDirectory::new())),
            links,
        );
        (core, registry)
    }

    fn new_beacons(ids: &[u16]) -> Vec<u8> {
        let states: Vec<ReplicatedState<'static>> = ids
            .iter()
            .map(|id| {
                ReplicatedState::new(ObjectId::new(*id))
                    .with(*id as i32)
                    .unwrap()
            })
            .collect();
        let entries: Vec<(&str, ReplicatedState<'_>)> =
            states.iter().map(|s| ("beacon", s.clone())).collect();
        encode_new_objects(&entries)
    }

    #[test]
    fn test_new_objects_instantiated_under_server_ids() {
        let (mut core, registry) = client_core(false, false);
        core.handle_server_message(&new_beacons(&[3, 8])).unwrap();

        let registry = registry.lock().unwrap();
        assert_eq!(registry.ids(), vec![ObjectId::new(3), ObjectId::new(8)]);
        let beacon = registry.get::<Beacon>(ObjectId::new(8)).unwrap();
        assert_eq!(beacon.core().fields().get(0), Some(&Value::Int32(8)));
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        let (mut core, registry) = client_core(false, false);
        let state = ReplicatedState::new(ObjectId::new(1));
        let bytes = encode_new_objects(&[("mystery", state)]);
        assert!(matches!(
            core.handle_server_message(&bytes),
            Err(NetError::UnknownType(_))
        ));
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_type_rejects_whole_message() {
        let (mut core, registry) = client_core(false, false);
        let known = ReplicatedState::new(ObjectId::new(1))
            .with(1i32)
            .unwrap();
        let bytes = encode_new_objects(&[
            ("beacon", known),
            ("mystery", ReplicatedState::new(ObjectId::new(2))),
        ]);
        assert!(matches!(
            core.handle_server_message(&bytes),
            Err(NetError::UnknownType(name)) if name == "mystery"
        ));
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn test_colocated_client_skips_object_traffic() {
        let (mut core, registry) = client_core(true, true);
        core.handle_server_message(&new_beacons(&[1])).unwrap();
        assert!(registry.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commands_applied_when_not_colocated() {
        let (mut core, registry) = client_core(false, false);
        core.handle_server_message(&new_beacons(&[1])).unwrap();
        let command = encode_command_state("server", 0, &ReplicatedState::new(ObjectId::new(1)));
        core.handle_server_message(&command).unwrap();

        let registry = registry.lock().unwrap();
        assert_eq!(registry.get::<Beacon>(ObjectId::new(1)).unwrap().commands, 1);
    }

    #[test]
    fn test_updates_and_deletes() {
        let (mut core, registry) = client_core(false, false);
        core.handle_server_message(&new_beacons(&[1, 2])).unwrap();

        let update = ReplicatedState::new(ObjectId::new(2)).with(-5i32).unwrap();
        let missing = ReplicatedState::new(ObjectId::new(9)).with(0i32).unwrap();
        core.handle_server_message(&encode_update_objects(&[update, missing]))
            .unwrap();
        core.handle_server_message(&encode_delete_objects(&[ObjectId::new(1)]))
            .unwrap();

        let registry = registry.lock().unwrap();
        assert_eq!(registry.ids(), vec![ObjectId::new(2)]);
        let beacon = registry.get::<Beacon>(ObjectId::new(2)).unwrap();
        assert_eq!(beacon.core().fields().get(0), Some(&Value::Int32(-5)));
    }

    #[test]
    fn test_ping_reflection_queued() {
        let (mut core, _) = client_core(false, false);
        let ping = Ping {
            clock_ms: 1,
            reflect: true,
        };
        core.handle_server_message(&ping.encode()).unwrap();
        let outbox = core.take_outbox();
        assert_eq!(outbox.len(), 1);

        let mut reader = WireReader::new(&outbox[0]);
        assert_eq!(CommandType::read(&mut reader).unwrap(), CommandType::Ping);
        assert!(!Ping::decode(&mut reader).unwrap().reflect);

        let echo = Ping {
            clock_ms: 1,
            reflect: false,
        };
        core.handle_server_message(&echo.encode()).unwrap();
        assert!(core.take_outbox().is_empty());
    }

    #[test]
    fn test_end_connection_marks_server_dead() {
        let (mut core, _) = client_core(false, false);
        core.handle_server_message(&bare(CommandType::EndConnection))
            .unwrap();
        assert!(!core.shared.server.lock().unwrap().as_ref().unwrap().alive);
    }

    #[test]
    fn test_other_senders_feed_discovery() {
        let (mut core, _) = client_core(false, false);
        let announcement = ServerAnnouncement {
            address: "10.0.0.7".into(),
            port: 4100,
            name: "lobby".into(),
            connected: 0,
            max_connections: 4,
            custom_info: String::new(),
        };
        core.handle_datagram(SocketAddr::from(([127, 0, 0, 1], 53001)), &announcement.encode());

        let directory = core.directory.lock().unwrap();
        assert_eq!(directory.len(), 1);
        assert!(directory.find("10.0.0.7:4100".parse().unwrap()).is_some());
    }
}
