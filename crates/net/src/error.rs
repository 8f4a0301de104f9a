use std::net::SocketAddr;

use crate::net::CommandType;
use crate::replication::{ObjectId, ValueType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("unknown value type tag {0}")]
    UnknownTypeTag(u8),
    #[error("unknown command code {0}")]
    UnknownCommand(u16),
    #[error("string payload is not valid utf-8")]
    InvalidUtf8,
    #[error("length prefix {0} exceeds the remaining input")]
    LengthOverflow(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Decode(#[from] DecodeError),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ValueType, found: ValueType },
    #[error("no field with id {0}")]
    UnknownField(u8),
    #[error("objects cannot carry more than {0} fields")]
    TooManyFields(usize),
    #[error("no factory registered for type {0:?}")]
    UnknownType(String),
    #[error("no object with id {0}")]
    UnknownObject(ObjectId),
    #[error("object ids exhausted")]
    IdsExhausted,
    #[error("command sender {claimed:?} does not match connection name {registered:?}")]
    AuthenticationFailed { claimed: String, registered: String },
    #[error("command {code} on object {object} was neither accepted nor rejected")]
    CommandUndecided { object: ObjectId, code: u16 },
    #[error("a connection already exists for {0}")]
    ConnectionExists(SocketAddr),
    #[error("server is full ({current}/{max})")]
    ServerFull { current: u8, max: u8 },
    #[error("not connected to a server")]
    NotConnected,
    #[error("unexpected {0} message")]
    UnexpectedCommand(CommandType),
    #[error("a {0} is already running")]
    AlreadyRunning(&'static str),
}
