mod config;
mod simulation;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::Args;
use lanplay::session::FileTransfer;
use lanplay::{
    Application, ConnectionInfo, MARKER_TYPE, Marker, ObjectRegistry, ServerEvent,
};
use tui::{ObjectRow, ServerView, TuiState};

const FRAME: Duration = Duration::from_millis(16);

struct Host {
    app: Application,
    started: Instant,
    still: bool,
    share: Option<PathBuf>,
    transfers: Vec<FileTransfer>,
}

impl Host {
    fn tick(&mut self) -> Vec<ServerEvent> {
        if !self.still {
            simulation::wander(&mut self.app.objects(), self.started.elapsed().as_secs_f32());
        }

        let Some(server) = self.app.server() else {
            return Vec::new();
        };
        let events = server.drain_events();
        if let Some(path) = &self.share {
            for event in &events {
                if let ServerEvent::ClientConnected { id, .. } = event {
                    match server.send_file(path.clone(), Some(*id)) {
                        Ok(transfer) => self.transfers.push(transfer),
                        Err(e) => log::error!("Cannot share {}: {e}", path.display()),
                    }
                }
            }
        }
        self.transfers.retain(|t| t.is_transferring());
        events
    }
}

fn describe(event: &ServerEvent) -> (bool, String) {
    match event {
        ServerEvent::ClientConnected { id, name, addr } => {
            (false, format!("{name:?} connected from {addr} as {id}"))
        }
        ServerEvent::ClientRemoved { id, name } => (false, format!("{name:?} ({id}) removed")),
        ServerEvent::ConnectionDenied { addr, reason } => {
            (true, format!("Connection denied to {addr}: {reason}"))
        }
        ServerEvent::Error { message } => (true, message.clone()),
    }
}

fn give_marker(info: &ConnectionInfo, registry: &mut ObjectRegistry) {
    static NEXT_COLOR: AtomicU8 = AtomicU8::new(1);
    let color = NEXT_COLOR.fetch_add(1, Ordering::Relaxed);
    match registry.spawn_on_server(MARKER_TYPE, Marker::with(info.name.clone(), 0.0, 0.0, color)) {
        Ok(_) => log::info!("Marker created for {:?}", info.name),
        Err(e) => log::warn!("No marker for {:?}: {e}", info.name),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut app = Application::new();
    Marker::register(&mut app.objects());
    app.set_new_connection_callback(give_marker);
    app.start_server(args.server_config())?;
    for i in 0..args.markers {
        let angle = i as f32;
        app.spawn_on_server(
            MARKER_TYPE,
            Marker::with(format!("npc{i}"), angle.cos() * 20.0, angle.sin() * 20.0, 0),
        )?;
    }

    let mut host = Host {
        app,
        started: Instant::now(),
        still: args.still,
        share: args.share,
        transfers: Vec::new(),
    };

    if args.headless {
        if let Some(server) = host.app.server() {
            log::info!("Server {:?} running on port {}", server.name(), server.port());
        }
        loop {
            for event in host.tick() {
                match describe(&event) {
                    (false, text) => log::info!("{text}"),
                    (true, text) => log::warn!("{text}"),
                }
            }
            thread::sleep(FRAME);
        }
    }

    run_with_tui(&mut host)?;
    host.app.shutdown_all();
    Ok(())
}

fn object_rows(registry: &ObjectRegistry) -> Vec<ObjectRow> {
    registry
        .ids()
        .into_iter()
        .map(|id| {
            let summary = match registry.get::<Marker>(id) {
                Some(marker) => {
                    let (x, y) = marker.position();
                    format!("{:<12} ({x:>7.2}, {y:>7.2}) color {}", marker.label(), marker.color())
                }
                None => String::new(),
            };
            ObjectRow {
                id: id.to_string(),
                type_name: registry.type_name(id).unwrap_or("?").to_owned(),
                summary,
            }
        })
        .collect()
}

fn run_with_tui(host: &mut Host) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut tui_state = TuiState::new();

    if let Some(server) = host.app.server() {
        tui_state.log_info(format!("Server started on port {}", server.port()));
    }

    let mut running = true;
    while running {
        for event in host.tick() {
            match describe(&event) {
                (false, text) => tui_state.log_info(text),
                (true, text) => tui_state.log_warn(text),
            }
        }

        let Some(server) = host.app.server() else {
            break;
        };
        let connections = server.connections();

        if let Some(id) = tui_state.take_pending_close() {
            server.close_connection(id);
            tui_state.log_info(format!("Closing {id}"));
        }

        if event::poll(FRAME)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => running = false,
                        KeyCode::Tab => tui_state.next_tab(),
                        KeyCode::BackTab => tui_state.prev_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up => tui_state.select_prev(),
                        KeyCode::Down => tui_state.select_next(connections.len()),
                        KeyCode::Char('c') => {
                            if tui_state.active_tab() == tui::Tab::Connections {
                                tui_state.request_close(&connections);
                            }
                        }
                        KeyCode::Char('l') => {
                            let listening = !server.is_listening();
                            server.set_listening(listening);
                            tui_state.log_info(if listening {
                                "Accepting new clients"
                            } else {
                                "Refusing new clients"
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        let objects = object_rows(&host.app.objects());
        let view = ServerView {
            name: server.name(),
            port: server.port(),
            role: server.broker_role(),
            listening: server.is_listening(),
            max_connections: server.max_connections(),
            stats: server.stats(),
            connections: &connections,
            objects: &objects,
        };
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &view);
        })?;
    }

    tui_state.log_info("Shutting down...");
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
