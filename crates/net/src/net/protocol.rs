use std::fmt;

use super::codec::{WireReader, WireWriter, decode_object, encode_object};
use crate::error::DecodeError;
use crate::replication::{ObjectId, ReplicatedState};

pub const BROADCAST_PORT: u16 = 53000;
pub const MASTER_PORT: u16 = 53001;

pub const DEFAULT_MAX_CONNECTIONS: u8 = 10;
pub const SYNC_BATCH_SIZE: usize = 10;
pub const FILE_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandType {
    NewConnection = 0,
    EndConnection = 1,
    UpdateObjects = 2,
    NewObject = 3,
    DeleteObject = 4,
    Broadcast = 5,
    CheckServer = 6,
    CustomCommand = 7,
    Ping = 8,
    File = 9,
    ClockSyncro = 10,
}

impl CommandType {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn writer(self) -> WireWriter {
        let mut writer = WireWriter::new();
        writer.write_u16(self.code());
        writer
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Self::try_from(reader.read_u16()?)
    }
}

impl TryFrom<u16> for CommandType {
    type Error = DecodeError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => CommandType::NewConnection,
            1 => CommandType::EndConnection,
            2 => CommandType::UpdateObjects,
            3 => CommandType::NewObject,
            4 => CommandType::DeleteObject,
            5 => CommandType::Broadcast,
            6 => CommandType::CheckServer,
            7 => CommandType::CustomCommand,
            8 => CommandType::Ping,
            9 => CommandType::File,
            10 => CommandType::ClockSyncro,
            other => return Err(DecodeError::UnknownCommand(other)),
        })
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub fn bare(command: CommandType) -> Vec<u8> {
    command.writer().into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub clock_ms: i32,
    pub reflect: bool,
}

impl Ping {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CommandType::Ping.writer();
        writer.write_i32(self.clock_ms);
        writer.write_bool(self.reflect);
        writer.into_bytes()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            clock_ms: reader.read_i32()?,
            reflect: reader.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub name: String,
    pub udp_port: u16,
}

impl ConnectRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CommandType::NewConnection.writer();
        writer.write_str(&self.name);
        writer.write_u16(self.udp_port);
        writer.into_bytes()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            udp_port: reader.read_u16()?,
        })
    }
}

/// Asks servers on a host to announce themselves. Relayed datagrams reach a
/// server from the local broker, so a remote requester names its own host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckServerRequest {
    pub reply_to: Option<String>,
}

impl CheckServerRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CommandType::CheckServer.writer();
        if let Some(host) = &self.reply_to {
            writer.write_str(host);
        }
        writer.into_bytes()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        if reader.is_empty() {
            return Ok(Self { reply_to: None });
        }
        Ok(Self {
            reply_to: Some(reader.read_string()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAnnouncement {
    pub address: String,
    pub port: u16,
    pub name: String,
    pub connected: u8,
    pub max_connections: u8,
    pub custom_info: String,
}

impl ServerAnnouncement {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CommandType::Broadcast.writer();
        writer.write_str(&self.address);
        writer.write_u16(self.port);
        writer.write_str(&self.name);
        writer.write_u8(self.connected);
        writer.write_u8(self.max_connections);
        writer.write_str(&self.custom_info);
        writer.into_bytes()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: reader.read_string()?,
            port: reader.read_u16()?,
            name: reader.read_string()?,
            connected: reader.read_u8()?,
            max_connections: reader.read_u8()?,
            custom_info: reader.read_string()?,
        })
    }
}

pub fn encode_custom_command(sender: &str, code: u16, object: &[u8]) -> Vec<u8> {
    let mut writer = CommandType::CustomCommand.writer();
    writer.write_str(sender);
    writer.write_u16(code);
    writer.write_raw(object);
    writer.into_bytes()
}

pub fn encode_command_state(sender: &str, code: u16, state: &ReplicatedState<'_>) -> Vec<u8> {
    let mut object = WireWriter::new();
    encode_object(&mut object, state);
    encode_custom_command(sender, code, object.as_slice())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomCommandHeader {
    pub sender: String,
    pub code: u16,
}

impl CustomCommandHeader {
    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            sender: reader.read_string()?,
            code: reader.read_u16()?,
        })
    }
}

pub fn encode_new_objects(entries: &[(&str, ReplicatedState<'_>)]) -> Vec<u8> {
    let mut writer = CommandType::NewObject.writer();
    writer.write_u8(entries.len() as u8);
    for (type_name, state) in entries {
        writer.write_str(type_name);
        encode_object(&mut writer, state);
    }
    writer.into_bytes()
}

/// Decodes every entry before returning, so a malformed message yields no
/// objects at all.
pub fn decode_new_objects(
    reader: &mut WireReader<'_>,
) -> Result<Vec<(String, ReplicatedState<'static>)>, DecodeError> {
    let count = reader.read_u8()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let type_name = reader.read_string()?;
        entries.push((type_name, decode_object(reader)?));
    }
    Ok(entries)
}

pub fn encode_update_objects(states: &[ReplicatedState<'_>]) -> Vec<u8> {
    let mut writer = CommandType::UpdateObjects.writer();
    writer.write_u8(states.len() as u8);
    for state in states {
        encode_object(&mut writer, state);
    }
    writer.into_bytes()
}

pub fn decode_update_objects(
    reader: &mut WireReader<'_>,
) -> Result<Vec<ReplicatedState<'static>>, DecodeError> {
    let count = reader.read_u8()? as usize;
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        states.push(decode_object(reader)?);
    }
    Ok(states)
}

pub fn encode_delete_objects(ids: &[ObjectId]) -> Vec<u8> {
    let mut writer = CommandType::DeleteObject.writer();
    for id in ids {
        writer.write_u16(id.raw());
    }
    writer.into_bytes()
}

pub fn decode_delete_objects(reader: &mut WireReader<'_>) -> Result<Vec<ObjectId>, DecodeError> {
    let mut ids = Vec::with_capacity(reader.remaining_len() / 2);
    while !reader.is_empty() {
        ids.push(ObjectId::new(reader.read_u16()?));
    }
    Ok(ids)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileMessage {
    Start {
        name: String,
        size: u32,
        origin_path: String,
    },
    Chunk {
        name: String,
        failed: bool,
        bytes: Vec<u8>,
    },
}

impl FileMessage {
    pub fn name(&self) -> &str {
        match self {
            FileMessage::Start { name, .. } | FileMessage::Chunk { name, .. } => name,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = CommandType::File.writer();
        match self {
            FileMessage::Start {
                name,
                size,
                origin_path,
            } => {
                writer.write_bool(true);
                writer.write_str(name);
                writer.write_u32(*size);
                writer.write_str(origin_path);
            }
            FileMessage::Chunk {
                name,
                failed,
                bytes,
            } => {
                writer.write_bool(false);
                writer.write_str(name);
                writer.write_bool(*failed);
                writer.write_raw(bytes);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let start = reader.read_bool()?;
        let name = reader.read_string()?;
        if start {
            Ok(FileMessage::Start {
                name,
                size: reader.read_u32()?,
                origin_path: reader.read_string()?,
            })
        } else {
            Ok(FileMessage::Chunk {
                name,
                failed: reader.read_bool()?,
                bytes: reader.read_rest().to_vec(),
            })
        }
    }
}
