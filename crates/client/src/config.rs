use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use lanplay::{BROADCAST_PORT, BrokerPorts, ClientConfig, MASTER_PORT, TransportKind};

#[derive(Parser, Debug)]
#[command(name = "lanplay-client")]
#[command(about = "LAN game client: finds a server, joins it and drives a marker")]
pub struct Args {
    #[arg(short, long, default_value = "player")]
    pub name: String,

    #[arg(
        short,
        long,
        help = "Server address to join directly (e.g., 192.168.1.20:41234)"
    )]
    pub server: Option<SocketAddr>,

    #[arg(long, help = "Ask this address to announce itself instead of waiting for broadcasts")]
    pub probe: Option<IpAddr>,

    #[arg(long, help = "Use TCP for the session instead of UDP")]
    pub tcp: bool,

    #[arg(long, default_value_t = 5, help = "Seconds to wait for a server to show up")]
    pub discover_secs: u64,

    #[arg(long, default_value_t = 10, help = "Seconds to play before leaving")]
    pub duration_secs: u64,

    #[arg(long, help = "Ask the server for a companion marker once connected")]
    pub spawn: bool,

    #[arg(long, help = "File to push to the other players")]
    pub send_file: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    pub download_dir: PathBuf,

    #[arg(long, default_value_t = BROADCAST_PORT)]
    pub discovery_port: u16,

    #[arg(long, default_value_t = MASTER_PORT)]
    pub master_port: u16,
}

impl Args {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            name: self.name.clone(),
            ports: BrokerPorts {
                discovery: self.discovery_port,
                master: self.master_port,
            },
            download_dir: self.download_dir.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn transport(&self) -> TransportKind {
        if self.tcp {
            TransportKind::Tcp
        } else {
            TransportKind::Udp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_server_over_tcp() {
        let args = Args::parse_from([
            "lanplay-client",
            "--name",
            "zoe",
            "--server",
            "10.0.0.5:4000",
            "--tcp",
        ]);
        assert_eq!(args.server, Some("10.0.0.5:4000".parse().unwrap()));
        assert_eq!(args.transport(), TransportKind::Tcp);
        assert_eq!(args.client_config().name, "zoe");
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["lanplay-client"]);
        assert_eq!(args.transport(), TransportKind::Udp);
        let config = args.client_config();
        assert_eq!(config.ports, BrokerPorts::default());
        assert_eq!(config.download_dir, PathBuf::from("."));
    }
}
