mod broker;
mod codec;
mod connection;
mod framing;
mod protocol;
mod stats;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

pub use broker::{BrokerPorts, BrokerRole, BrokerSocket, UdpPortBroker};
pub use codec::{WireReader, WireWriter, decode_object, decode_value, encode_object, encode_value};
pub use connection::{
    CONNECTION_TIMEOUT, Connection, ConnectionId, ConnectionInfo, ConnectionTable, DEAD_GRACE,
    PING_THRESHOLD, Sweep, TransportKind,
};
pub use framing::{
    FrameBuffer, MAX_FRAME_LEN, MAX_WRITE_BACKLOG, StreamState, WRITE_STALL_LIMIT, WriteQueue,
};
pub use protocol::{
    BROADCAST_PORT, CheckServerRequest, CommandType, ConnectRequest, CustomCommandHeader, DEFAULT_MAX_CONNECTIONS,
    FILE_CHUNK_SIZE, FileMessage, MASTER_PORT, Ping, SYNC_BATCH_SIZE, ServerAnnouncement, bare,
    decode_delete_objects, decode_new_objects, decode_update_objects, encode_command_state,
    encode_custom_command, encode_delete_objects, encode_new_objects, encode_update_objects,
};
pub use stats::NetworkStats;

pub fn local_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub fn is_local_address(ip: IpAddr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || ip == local_ip()
}
