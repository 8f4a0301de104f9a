use clap::Parser;

use lanplay::{BROADCAST_PORT, BrokerPorts, MASTER_PORT, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "lanplay-server")]
#[command(about = "LAN game server with object replication")]
pub struct Args {
    #[arg(short, long, default_value = "lanplay")]
    pub name: String,

    #[arg(short, long, default_value_t = 10)]
    pub max_clients: u8,

    #[arg(long, default_value = "", help = "Free text shown in server announcements")]
    pub info: String,

    #[arg(long, default_value_t = BROADCAST_PORT)]
    pub discovery_port: u16,

    #[arg(long, default_value_t = MASTER_PORT)]
    pub master_port: u16,

    #[arg(long, default_value_t = 3, help = "Demo markers spawned at startup")]
    pub markers: usize,

    #[arg(long, help = "Keep markers still instead of wandering")]
    pub still: bool,

    #[arg(long, help = "File streamed to every client that joins")]
    pub share: Option<std::path::PathBuf>,

    #[arg(long)]
    pub headless: bool,
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            name: self.name.clone(),
            max_connections: self.max_clients,
            custom_info: self.info.clone(),
            ports: BrokerPorts {
                discovery: self.discovery_port,
                master: self.master_port,
            },
            ..ServerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_protocol_ports() {
        let args = Args::parse_from(["lanplay-server", "--name", "arena"]);
        let config = args.server_config();
        assert_eq!(config.name, "arena");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.ports, BrokerPorts::default());
        assert!(config.listening);
    }

    #[test]
    fn test_custom_ports() {
        let args = Args::parse_from([
            "lanplay-server",
            "--discovery-port",
            "6000",
            "--master-port",
            "6001",
            "-m",
            "2",
        ]);
        let config = args.server_config();
        assert_eq!(config.ports.discovery, 6000);
        assert_eq!(config.ports.master, 6001);
        assert_eq!(config.max_connections, 2);
    }
}
