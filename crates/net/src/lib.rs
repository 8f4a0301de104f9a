pub mod app;
pub mod demo;
pub mod error;
pub mod net;
pub mod replication;
pub mod session;

mod sync;

pub use app::{Application, UpdateTicker};
pub use demo::{ARENA_HALF_EXTENT, MARKER_TYPE, Marker};
pub use error::{DecodeError, NetError};
pub use net::{
    BROADCAST_PORT, BrokerPorts, BrokerRole, CommandType, ConnectionId, ConnectionInfo,
    MASTER_PORT, NetworkStats, TransportKind, UdpPortBroker, WireReader, WireWriter,
};
pub use replication::{
    Command, Decision, NetworkObject, ObjectCore, ObjectId, ObjectRegistry, Priority,
    ReplicatedState, Spawner, TypedValue, Value, ValueType,
};
pub use session::{
    ClientConfig, ClientSession, InfoServer, ReceivedFile, ServerConfig, ServerDirectory,
    ServerEvent, ServerSession, SessionLinks,
};
