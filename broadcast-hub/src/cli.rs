use std::{net::SocketAddr, time::Duration};

use clap::Parser;

use crate::config::{
    DEFAULT_MAX_CLIENTS, DEFAULT_OUTBOUND_CAPACITY, DEFAULT_SHUTDOWN_GRACE, DEFAULT_WRITE_TIMEOUT,
    HubConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, env = "HUB_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// HTTP route that accepts WebSocket upgrades.
    #[arg(long, env = "HUB_PATH", default_value = "/ws")]
    pub path: String,

    /// Maximum number of simultaneously connected clients.
    #[arg(long, env = "HUB_MAX_CLIENTS", default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,

    /// Events buffered per client before it is disconnected as too slow.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    pub outbound_capacity: usize,

    /// Milliseconds allowed for writing a single frame to a client.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,

    /// Milliseconds to wait for clients to disconnect during shutdown.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_GRACE.as_millis() as u64)]
    pub shutdown_grace_ms: u64,
}

impl From<Cli> for HubConfig {
    fn from(cli: Cli) -> Self {
        Self {
            listen: cli.listen,
            path: cli.path,
            max_clients: cli.max_clients,
            outbound_capacity: cli.outbound_capacity,
            write_timeout: Duration::from_millis(cli.write_timeout_ms),
            shutdown_grace: Duration::from_millis(cli.shutdown_grace_ms),
        }
    }
}
