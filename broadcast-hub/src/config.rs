use std::{net::SocketAddr, time::Duration};

use crate::{
    error::{HubError, Result},
    hub::STATS_PATH,
};

pub const DEFAULT_MAX_CLIENTS: usize = 64;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Room for the welcome event plus at least one event queued behind it.
pub const MIN_OUTBOUND_CAPACITY: usize = 2;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the HTTP listener binds to.
    pub listen: SocketAddr,
    /// Route that upgrades requests to WebSocket connections.
    pub path: String,
    /// Hard cap on simultaneously registered connections.
    pub max_clients: usize,
    /// Events buffered per client before it is treated as a slow consumer.
    pub outbound_capacity: usize,
    /// Upper bound on a single frame write to a peer.
    pub write_timeout: Duration,
    /// How long shutdown waits for connections to deregister.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            path: "/ws".to_string(),
            max_clients: DEFAULT_MAX_CLIENTS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl HubConfig {
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clients == 0 {
            return Err(HubError::InvalidConfig(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if self.outbound_capacity < MIN_OUTBOUND_CAPACITY {
            return Err(HubError::InvalidConfig(format!(
                "outbound_capacity must be at least {MIN_OUTBOUND_CAPACITY}"
            )));
        }
        if !self.path.starts_with('/') {
            return Err(HubError::InvalidConfig(format!(
                "path '{}' must start with '/'",
                self.path
            )));
        }
        if self.path == STATS_PATH {
            return Err(HubError::InvalidConfig(format!(
                "path '{STATS_PATH}' is reserved"
            )));
        }
        Ok(())
    }
}
