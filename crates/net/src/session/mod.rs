//! Server and client sessions on top of the wire layer.

mod client;
mod config;
mod discovery;
mod file;
mod server;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16};

pub use client::ClientSession;
pub use config::{ClientConfig, ServerConfig};
pub use discovery::{InfoServer, ServerDirectory};
pub use file::{FileReceiver, FileTransfer, PacketSink, ReceivedFile, executable_dir};
pub use server::{NewConnectionHandler, ServerEvent, ServerSession};

#[derive(Debug, Clone, Default)]
pub struct SessionLinks {
    pub server_running: Arc<AtomicBool>,
    pub colocated_client_port: Arc<AtomicU16>,
    pub replication_due: Arc<AtomicBool>,
}
