mod config;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;

use config::Args;
use lanplay::{
    ARENA_HALF_EXTENT, Application, ClientSession, InfoServer, Marker, NetworkObject, ObjectId,
};

const STEP: Duration = Duration::from_millis(500);
const POLL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut app = Application::new();
    Marker::register(&mut app.objects());
    app.start_client(args.client_config())?;

    match args.server {
        Some(addr) => {
            let session = app.client().context("client not running")?;
            session.connect_addr(&addr.to_string(), addr, args.transport())?;
        }
        None => {
            let server = discover(&app, &args)?;
            log::info!(
                "Joining {:?} at {} ({}/{} players) {}",
                server.name,
                server.addr(),
                server.connected,
                server.max_connections,
                server.custom_info
            );
            let session = app.client().context("client not running")?;
            session.connect(&server, args.transport())?;
        }
    }

    play(&app, &args)?;

    if let Some(session) = app.client() {
        let stats = session.stats();
        log::info!(
            "Sent {} packets ({} bytes), received {} packets ({} bytes)",
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received
        );
        for file in session.received_files() {
            log::info!(
                "File {}: {:.0}%{}",
                file.name,
                file.completion * 100.0,
                if file.failed { " (failed)" } else { "" }
            );
        }
    }
    app.shutdown_all();
    Ok(())
}

fn discover(app: &Application, args: &Args) -> Result<InfoServer> {
    let deadline = Instant::now() + Duration::from_secs(args.discover_secs);
    log::info!("Looking for servers for {}s", args.discover_secs);
    while Instant::now() < deadline {
        if let Some(address) = args.probe {
            app.check_server_existence(address)?;
        }
        let servers = app.available_servers(Some(Duration::from_secs(3)));
        if let Some(server) = servers.into_iter().find(|s| !s.is_full()) {
            return Ok(server);
        }
        thread::sleep(POLL * 4);
    }
    bail!("no server found within {}s", args.discover_secs)
}

fn own_marker(app: &Application, name: &str) -> Option<ObjectId> {
    let objects = app.objects();
    objects
        .iter_of::<Marker>()
        .find(|m| m.label() == name)
        .or_else(|| objects.iter_of::<Marker>().next())
        .map(|m| m.core().id())
}

fn play(app: &Application, args: &Args) -> Result<()> {
    let session: &ClientSession = app.client().context("client not running")?;
    let started = Instant::now();
    let duration = Duration::from_secs(args.duration_secs);

    let mut transfer = match &args.send_file {
        Some(path) => Some(
            session
                .send_file(path.clone())
                .with_context(|| format!("cannot send {}", path.display()))?,
        ),
        None => None,
    };
    let mut asked_companion = false;
    let mut last_step = Instant::now();
    let mut step = 0u32;

    while started.elapsed() < duration {
        if !session.is_connected() {
            bail!("lost the server");
        }
        if session.is_server_silent() {
            log::warn!("Server has been silent, pinging");
            session.ping_server()?;
        }

        if last_step.elapsed() >= STEP {
            last_step = Instant::now();
            if let Some(target) = own_marker(app, &args.name) {
                step += 1;
                let angle = step as f32 * 0.4;
                let radius = ARENA_HALF_EXTENT / 4.0;
                session.send_command(
                    Marker::MOVE_TO,
                    &Marker::move_command(target, radius * angle.cos(), radius * angle.sin())?,
                )?;

                if args.spawn && !asked_companion {
                    session.send_command(
                        Marker::SPAWN_COMPANION,
                        &Marker::spawn_companion_command(target),
                    )?;
                    asked_companion = true;
                }

                let objects = app.objects();
                if let Some(marker) = objects.get::<Marker>(target) {
                    let (x, y) = marker.position();
                    log::info!(
                        "{} at ({x:.1}, {y:.1}), {} objects known, ready: {}",
                        marker.label(),
                        objects.len(),
                        session.is_ready()
                    );
                }
            }
        }

        if let Some(t) = &transfer {
            if !t.is_transferring() {
                log::info!(
                    "Upload of {} {}",
                    t.name(),
                    if t.has_failed() { "failed" } else { "finished" }
                );
                transfer = None;
            }
        }
        thread::sleep(POLL);
    }

    session.disconnect();
    Ok(())
}
