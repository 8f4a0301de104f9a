use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use super::broker::BrokerSocket;
use super::framing::{FrameBuffer, StreamState, WriteQueue};

pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(1500);
pub const PING_THRESHOLD: Duration = Duration::from_millis(600);
pub const DEAD_GRACE: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => f.write_str("udp"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug)]
enum Transport {
    Udp,
    Tcp {
        stream: TcpStream,
        frames: FrameBuffer,
        outgoing: WriteQueue,
    },
}

#[derive(Debug)]
pub struct Connection {
    pub name: String,
    /// UDP endpoint of the peer. For TCP peers the port is the one the peer
    /// advertised in its connect request.
    pub addr: SocketAddr,
    pub alive: bool,
    pub accepted: bool,
    pub local_host: bool,
    transport: Transport,
    last_contact: Instant,
}

impl Connection {
    pub fn udp(addr: SocketAddr) -> Self {
        Self {
            name: String::new(),
            addr,
            alive: false,
            accepted: false,
            local_host: false,
            transport: Transport::Udp,
            last_contact: Instant::now(),
        }
    }

    pub fn tcp(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            name: String::new(),
            addr,
            alive: true,
            accepted: false,
            local_host: false,
            transport: Transport::Tcp {
                stream,
                frames: FrameBuffer::new(),
                outgoing: WriteQueue::new(),
            },
            last_contact: Instant::now(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self.transport {
            Transport::Udp => TransportKind::Udp,
            Transport::Tcp { .. } => TransportKind::Tcp,
        }
    }

    pub fn touch(&mut self) {
        self.last_contact = Instant::now();
    }

    pub fn touch_at(&mut self, now: Instant) {
        self.last_contact = now;
    }

    pub fn since_last_contact(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_contact)
    }

    pub fn send(&mut self, socket: &BrokerSocket, bytes: &[u8]) -> io::Result<()> {
        match &mut self.transport {
            Transport::Udp => socket.send_to(bytes, self.addr).map(|_| ()),
            Transport::Tcp {
                stream, outgoing, ..
            } => {
                outgoing.push(bytes);
                outgoing.flush_to(stream, Instant::now())
            }
        }
    }

    pub fn flush_pending(&mut self) -> io::Result<()> {
        match &mut self.transport {
            Transport::Tcp {
                stream, outgoing, ..
            } if !outgoing.is_empty() => outgoing.flush_to(stream, Instant::now()),
            _ => Ok(()),
        }
    }

    pub fn receive_frames(&mut self) -> io::Result<(StreamState, Vec<Vec<u8>>)> {
        let Transport::Tcp { stream, frames, .. } = &mut self.transport else {
            return Ok((StreamState::Open, Vec::new()));
        };
        let state = frames.fill_from(stream)?;
        let mut out = Vec::new();
        while let Some(frame) = frames
            .next_frame()
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?
        {
            out.push(frame);
        }
        Ok((state, out))
    }

    pub fn shutdown(&mut self) {
        self.alive = false;
        if let Transport::Tcp {
            stream, outgoing, ..
        } = &mut self.transport
        {
            let _ = outgoing.flush_to(stream, Instant::now());
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn info(&self, id: ConnectionId, now: Instant) -> ConnectionInfo {
        ConnectionInfo {
            id,
            name: self.name.clone(),
            addr: self.addr,
            transport: self.kind(),
            alive: self.alive,
            local_host: self.local_host,
            since_last_contact: self.since_last_contact(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub name: String,
    pub addr: SocketAddr,
    pub transport: TransportKind,
    pub alive: bool,
    pub local_host: bool,
    pub since_last_contact: Duration,
}

/// Handle into a [`ConnectionTable`]. Stale handles of removed connections
/// never resolve to a newer connection in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub(crate) const fn detached() -> Self {
        Self {
            index: u32::MAX,
            generation: 0,
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    connection: Option<Connection>,
}

#[derive(Debug)]
pub struct Sweep {
    pub ping: Vec<ConnectionId>,
    pub removed: Option<(ConnectionId, Connection)>,
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: Connection) -> ConnectionId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.connection = Some(connection);
            return ConnectionId {
                index,
                generation: slot.generation,
            };
        }
        self.slots.push(Slot {
            generation: 0,
            connection: Some(connection),
        });
        ConnectionId {
            index: (self.slots.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.connection.as_ref()
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.connection.as_mut()
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let connection = slot.connection.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.connection.as_ref().map(|c| {
                (
                    ConnectionId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    c,
                )
            })
        })
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn ids_of(&self, kind: TransportKind) -> Vec<ConnectionId> {
        self.iter()
            .filter(|(_, c)| c.kind() == kind)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn find_udp(&self, addr: SocketAddr) -> Option<ConnectionId> {
        self.iter()
            .find(|(_, c)| c.kind() == TransportKind::Udp && c.addr == addr)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connected_count(&self) -> usize {
        self.iter().filter(|(_, c)| c.alive && c.accepted).count()
    }

    pub fn infos(&self, now: Instant) -> Vec<ConnectionInfo> {
        self.iter().map(|(id, c)| c.info(id, now)).collect()
    }

    pub fn not_responding(&self, now: Instant, timeout: Duration) -> Vec<ConnectionInfo> {
        self.iter()
            .filter(|(_, c)| c.alive && c.since_last_contact(now) >= timeout)
            .map(|(id, c)| c.info(id, now))
            .collect()
    }

    /// Live connections silent past `ping_after` are listed for a ping. At
    /// most one dead connection older than `dead_grace` is removed.
    pub fn sweep(&mut self, now: Instant, ping_after: Duration, dead_grace: Duration) -> Sweep {
        let mut ping = Vec::new();
        let mut expired = None;
        for (id, connection) in self.iter() {
            let silent = connection.since_last_contact(now);
            if connection.alive {
                if silent >= ping_after {
                    ping.push(id);
                }
            } else if expired.is_none() && silent >= dead_grace {
                expired = Some(id);
            }
        }
        let removed = expired.and_then(|id| self.remove(id).map(|c| (id, c)));
        Sweep { ping, removed }
    }
}
