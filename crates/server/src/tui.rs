use std::collections::VecDeque;
use std::time::Instant;

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Tabs};

use lanplay::{BrokerRole, ConnectionId, ConnectionInfo, NetworkStats};

const MAX_LOG_LINES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Connections,
    Objects,
    Log,
}

impl Tab {
    const ALL: [Tab; 3] = [Tab::Connections, Tab::Objects, Tab::Log];

    fn title(self) -> &'static str {
        match self {
            Tab::Connections => "Connections",
            Tab::Objects => "Objects",
            Tab::Log => "Log",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

struct LogLine {
    at: Instant,
    level: Level,
    text: String,
}

pub struct ObjectRow {
    pub id: String,
    pub type_name: String,
    pub summary: String,
}

pub struct ServerView<'a> {
    pub name: &'a str,
    pub port: u16,
    pub role: BrokerRole,
    pub listening: bool,
    pub max_connections: u8,
    pub stats: NetworkStats,
    pub connections: &'a [ConnectionInfo],
    pub objects: &'a [ObjectRow],
}

pub struct TuiState {
    started: Instant,
    tab: Tab,
    logs: VecDeque<LogLine>,
    scroll: usize,
    selected: usize,
    pending_close: Option<ConnectionId>,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            tab: Tab::Connections,
            logs: VecDeque::new(),
            scroll: 0,
            selected: 0,
            pending_close: None,
        }
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn prev_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len()];
    }

    pub fn log_info(&mut self, text: impl Into<String>) {
        self.push(Level::Info, text.into());
    }

    pub fn log_warn(&mut self, text: impl Into<String>) {
        self.push(Level::Warn, text.into());
    }

    pub fn log_error(&mut self, text: impl Into<String>) {
        self.push(Level::Error, text.into());
    }

    fn push(&mut self, level: Level, text: String) {
        if self.logs.len() == MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogLine {
            at: Instant::now(),
            level,
            text,
        });
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 5).min(self.logs.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(5);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn select_next(&mut self, count: usize) {
        if count > 0 {
            self.selected = (self.selected + 1).min(count - 1);
        }
    }

    pub fn request_close(&mut self, connections: &[ConnectionInfo]) {
        if let Some(connection) = connections.get(self.selected) {
            self.pending_close = Some(connection.id);
        }
    }

    pub fn take_pending_close(&mut self) -> Option<ConnectionId> {
        self.pending_close.take()
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, view: &ServerView<'_>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state, view);
    render_capacity(frame, chunks[1], view);
    render_network(frame, chunks[2], &view.stats);
    render_tabs(frame, chunks[3], state.tab);
    match state.tab {
        Tab::Connections => render_connections(frame, chunks[4], state, view.connections),
        Tab::Objects => render_objects(frame, chunks[4], view.objects),
        Tab::Log => render_log(frame, chunks[4], state),
    }
    render_help(frame, chunks[5]);
}

fn render_header(frame: &mut Frame, area: Rect, state: &TuiState, view: &ServerView<'_>) {
    let uptime = format_duration(state.started.elapsed().as_secs());
    let title = format!(" {} - Uptime: {} ", view.name, uptime);

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let role = match view.role {
        BrokerRole::Master => "master",
        BrokerRole::Slave => "slave",
    };
    let text = format!(
        "Port: {}  |  Broker: {}  |  {}  |  Objects: {}",
        view.port,
        role,
        if view.listening { "listening" } else { "closed" },
        view.objects.len()
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));
    frame.render_widget(paragraph, area);
}

fn render_capacity(frame: &mut Frame, area: Rect, view: &ServerView<'_>) {
    let connected = view.connections.iter().filter(|c| c.alive).count();
    let max = view.max_connections.max(1);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Green)))
        .gauge_style(Style::default().fg(Color::Green))
        .ratio((connected as f64 / max as f64).min(1.0))
        .label(format!("{}/{} clients", connected, view.max_connections));
    frame.render_widget(gauge, area);
}

fn render_network(frame: &mut Frame, area: Rect, stats: &NetworkStats) {
    let block = Block::default()
        .title(" Network ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let lines = vec![
        Line::from(vec![
            Span::styled("Packets: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{} sent / {} recv", stats.packets_sent, stats.packets_received),
                Style::default().fg(Color::White),
            ),
        ]),
        Line::from(vec![
            Span::styled("Bytes: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!(
                    "{} sent / {} recv",
                    format_bytes(stats.bytes_sent),
                    format_bytes(stats.bytes_received)
                ),
                Style::default().fg(Color::White),
            ),
        ]),
    ];
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_tabs(frame: &mut Frame, area: Rect, active: Tab) {
    let tabs = Tabs::new(Tab::ALL.iter().map(|t| t.title()))
        .block(Block::default().borders(Borders::ALL))
        .select(active.index())
        .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    frame.render_widget(tabs, area);
}

fn render_connections(frame: &mut Frame, area: Rect, state: &TuiState, connections: &[ConnectionInfo]) {
    let lines: Vec<Line> = if connections.is_empty() {
        vec![Line::from(Span::styled(
            "No clients",
            Style::default().fg(Color::DarkGray),
        ))]
    } else {
        connections
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let style = if i == state.selected {
                    Style::default().fg(Color::Black).bg(Color::Cyan)
                } else if !c.alive {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default().fg(Color::White)
                };
                Line::from(Span::styled(
                    format!(
                        "{:<10} {:<16} {:<22} {:<4} {:>6}ms{}",
                        c.id.to_string(),
                        c.name,
                        c.addr.to_string(),
                        c.transport.to_string(),
                        c.since_last_contact.as_millis(),
                        if c.local_host { "  (local)" } else { "" }
                    ),
                    style,
                ))
            })
            .collect()
    };
    let block = Block::default().title(" Clients ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_objects(frame: &mut Frame, area: Rect, objects: &[ObjectRow]) {
    let lines: Vec<Line> = objects
        .iter()
        .map(|o| {
            Line::from(vec![
                Span::styled(format!("{:<6}", o.id), Style::default().fg(Color::Yellow)),
                Span::styled(format!("{:<10}", o.type_name), Style::default().fg(Color::Gray)),
                Span::raw(o.summary.clone()),
            ])
        })
        .collect();
    let block = Block::default().title(" Replicated objects ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let height = area.height.saturating_sub(2) as usize;
    let end = state.logs.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(height);
    let lines: Vec<Line> = state
        .logs
        .range(start..end)
        .map(|line| {
            let color = match line.level {
                Level::Info => Color::White,
                Level::Warn => Color::Yellow,
                Level::Error => Color::Red,
            };
            let at = line.at.duration_since(state.started).as_secs();
            Line::from(vec![
                Span::styled(
                    format!("[{}] ", format_duration(at)),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(line.text.clone(), Style::default().fg(color)),
            ])
        })
        .collect();
    let block = Block::default().title(" Log ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let text = Paragraph::new("q/ESC quit  Tab switch  Up/Down select  c close client  l toggle listening")
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );
    frame.render_widget(text, area);
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
