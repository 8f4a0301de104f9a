use std::io::Write;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lanplay::net::ConnectRequest;
use lanplay::{
    Application, BrokerPorts, ClientConfig, Marker, MARKER_TYPE, NetError, NetworkObject,
    ObjectId, ServerConfig, ServerEvent, TransportKind,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(42000);

fn next_ports() -> BrokerPorts {
    let base = PORT_COUNTER.fetch_add(10, Ordering::SeqCst);
    BrokerPorts {
        discovery: base,
        master: base + 1,
    }
}

fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn server_app(ports: BrokerPorts, max_connections: u8, markers: usize) -> Application {
    let mut app = Application::new();
    Marker::register(&mut app.objects());
    app.start_server(ServerConfig {
        name: "host".into(),
        max_connections,
        ports,
        ..ServerConfig::default()
    })
    .unwrap();
    for i in 0..markers {
        app.spawn_on_server(MARKER_TYPE, Marker::with(format!("m{i}"), i as f32, 0.0, 1))
            .unwrap()
            .unwrap();
    }
    app
}

fn client_app(ports: BrokerPorts, name: &str) -> Application {
    let mut app = Application::new();
    Marker::register(&mut app.objects());
    app.start_client(ClientConfig {
        name: name.into(),
        ports,
        download_dir: std::env::temp_dir(),
        ..ClientConfig::default()
    })
    .unwrap();
    app
}

fn server_addr(app: &Application) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, app.server().unwrap().port()))
}

fn connect_and_sync(transport: TransportKind) {
    let ports = next_ports();
    let server = server_app(ports, 4, 25);
    let client = client_app(ports, "alice");

    client
        .client()
        .unwrap()
        .connect_addr("host", server_addr(&server), transport)
        .unwrap();

    assert!(wait_until(2000, || client.objects().len() == 25));
    assert!(wait_until(2000, || server.server().unwrap().connected_count() == 1));

    let connections = server.server().unwrap().connections();
    assert_eq!(connections[0].name, "alice");
    assert_eq!(connections[0].transport, transport);

    let events = server.server().unwrap().drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientConnected { name, .. } if name == "alice")));

    let objects = client.objects();
    let first = objects.get::<Marker>(ObjectId::new(1)).unwrap();
    assert_eq!(first.label(), "m0");
}

#[test]
fn test_udp_client_receives_world() {
    connect_and_sync(TransportKind::Udp);
}

#[test]
fn test_tcp_client_receives_world() {
    connect_and_sync(TransportKind::Tcp);
}

#[test]
fn test_command_round_trip() {
    let ports = next_ports();
    let server = server_app(ports, 4, 1);
    let client = client_app(ports, "bob");
    let session = client.client().unwrap();
    session
        .connect_addr("host", server_addr(&server), TransportKind::Udp)
        .unwrap();
    assert!(wait_until(2000, || client.objects().len() == 1));

    let target = ObjectId::new(1);
    session
        .send_command(Marker::MOVE_TO, &Marker::move_command(target, 12.0, -3.0).unwrap())
        .unwrap();

    let moved = |app: &Application| {
        app.objects()
            .get::<Marker>(target)
            .is_some_and(|m| m.position() == (12.0, -3.0))
    };
    assert!(wait_until(2000, || moved(&server)));
    assert!(wait_until(2000, || moved(&client)));

    // Out of bounds: the server refuses and nothing changes anywhere.
    session
        .send_command(Marker::MOVE_TO, &Marker::move_command(target, 999.0, 0.0).unwrap())
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(moved(&server));
    assert!(moved(&client));
}

#[test]
fn test_spawn_and_despawn_replicate() {
    let ports = next_ports();
    let server = server_app(ports, 4, 0);
    let client = client_app(ports, "carol");
    client
        .client()
        .unwrap()
        .connect_addr("host", server_addr(&server), TransportKind::Tcp)
        .unwrap();
    assert!(wait_until(2000, || server.server().unwrap().connected_count() == 1));

    let id = server
        .spawn_on_server(MARKER_TYPE, Marker::with("late", 5.0, 5.0, 2))
        .unwrap()
        .unwrap();
    assert!(wait_until(2000, || client.objects().contains(id)));

    assert!(server.despawn_on_server(id));
    assert!(wait_until(2000, || !client.objects().contains(id)));
}

#[test]
fn test_server_update_reaches_client() {
    let ports = next_ports();
    let server = server_app(ports, 4, 1);
    let client = client_app(ports, "dave");
    client
        .client()
        .unwrap()
        .connect_addr("host", server_addr(&server), TransportKind::Udp)
        .unwrap();
    assert!(wait_until(2000, || client.objects().len() == 1));

    let target = ObjectId::new(1);
    server
        .objects()
        .get_mut::<Marker>(target)
        .unwrap()
        .set_position(-7.0, 8.0)
        .unwrap();

    assert!(wait_until(2000, || {
        client
            .objects()
            .get::<Marker>(target)
            .is_some_and(|m| m.position() == (-7.0, 8.0))
    }));
    assert!(!server.objects().get::<Marker>(target).unwrap().core().is_dirty());
}

#[test]
fn test_full_server_turns_client_away() {
    let ports = next_ports();
    let server = server_app(ports, 1, 0);
    let first = client_app(ports, "first");
    let second = client_app(ports, "second");

    first
        .client()
        .unwrap()
        .connect_addr("host", server_addr(&server), TransportKind::Udp)
        .unwrap();
    assert!(wait_until(2000, || server.server().unwrap().connected_count() == 1));

    let session = second.client().unwrap();
    session
        .connect_addr("host", server_addr(&server), TransportKind::Udp)
        .unwrap();
    assert!(wait_until(2000, || !session.is_connected()));
    assert_eq!(server.server().unwrap().connected_count(), 1);
    assert!(server
        .server()
        .unwrap()
        .drain_events()
        .iter()
        .any(|e| matches!(e, ServerEvent::ConnectionDenied { .. })));
}

#[test]
fn test_disconnect_removes_client() {
    let ports = next_ports();
    let server = server_app(ports, 4, 0);
    let client = client_app(ports, "erin");
    let session = client.client().unwrap();
    session
        .connect_addr("host", server_addr(&server), TransportKind::Udp)
        .unwrap();
    assert!(wait_until(2000, || server.server().unwrap().connected_count() == 1));

    session.disconnect();
    assert!(!session.is_connected());
    assert!(wait_until(2000, || server.server().unwrap().connected_count() == 0));
    assert!(matches!(
        session.ping_server(),
        Err(NetError::NotConnected)
    ));
}

#[test]
fn test_check_server_existence_fills_directory() {
    let ports = next_ports();
    let server = server_app(ports, 4, 0);
    let client = client_app(ports, "frank");
    let port = server.server().unwrap().port();

    let found = wait_until(3000, || {
        let _ = client.check_server_existence(IpAddr::V4(Ipv4Addr::LOCALHOST));
        thread::sleep(Duration::from_millis(20));
        client
            .available_servers(None)
            .iter()
            .any(|s| s.port == port && s.name == "host")
    });
    assert!(found);
}

#[test]
fn test_second_server_refused() {
    let ports = next_ports();
    let mut server = server_app(ports, 4, 0);
    assert!(matches!(
        server.start_server(ServerConfig {
            ports,
            ..ServerConfig::default()
        }),
        Err(NetError::AlreadyRunning("server"))
    ));
}

#[test]
fn test_colocated_client_shares_registry() {
    let ports = next_ports();
    let mut app = server_app(ports, 4, 3);
    app.start_client(ClientConfig {
        name: "host-player".into(),
        ports,
        ..ClientConfig::default()
    })
    .unwrap();
    let addr = server_addr(&app);
    app.client()
        .unwrap()
        .connect_addr("host", addr, TransportKind::Udp)
        .unwrap();

    assert!(wait_until(2000, || app.server().unwrap().connected_count() == 1));
    let connection = &app.server().unwrap().connections()[0];
    assert!(connection.local_host);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(app.objects().len(), 3);
}

#[test]
fn test_stream_peer_that_never_reads_is_dropped() {
    let ports = next_ports();
    let server = server_app(ports, 4, 0);
    let padding = "x".repeat(60_000);
    for i in 0..400 {
        server
            .spawn_on_server(MARKER_TYPE, Marker::with(format!("{i}{padding}"), 0.0, 0.0, 1))
            .unwrap()
            .unwrap();
    }

    let mut mute = TcpStream::connect(server_addr(&server)).unwrap();
    let request = ConnectRequest {
        name: "mute".into(),
        udp_port: 9,
    }
    .encode();
    mute.write_all(&(request.len() as u32).to_be_bytes()).unwrap();
    mute.write_all(&request).unwrap();

    let session = server.server().unwrap();
    let mut events = Vec::new();
    let started = Instant::now();
    let removed = wait_until(5000, || {
        let call = Instant::now();
        let _ = session.connections();
        assert!(call.elapsed() < Duration::from_millis(500));
        events.extend(session.drain_events());
        events
            .iter()
            .any(|e| matches!(e, ServerEvent::ClientRemoved { name, .. } if name == "mute"))
    });
    assert!(removed, "stalled peer still connected after {:?}", started.elapsed());
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::ClientConnected { name, .. } if name == "mute")));
    drop(mute);
}

#[test]
fn test_silent_server_reported_by_client() {
    let ports = next_ports();
    let mut app = Application::new();
    app.start_client(ClientConfig {
        name: "gina".into(),
        ports,
        connection_timeout: Duration::from_millis(100),
        ..ClientConfig::default()
    })
    .unwrap();

    let ghost = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let addr = ghost.local_addr().unwrap();
    app.client()
        .unwrap()
        .connect_addr("ghost", addr, TransportKind::Udp)
        .unwrap();

    assert!(wait_until(2000, || {
        app.not_responding()
            .iter()
            .any(|c| c.name == "ghost" && c.addr == addr)
    }));
}
