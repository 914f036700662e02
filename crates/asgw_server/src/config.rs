//! Server configuration.

use asgw_engine::SyncConfig;

/// Configuration for the gateway.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Longest heartbeat honored, in seconds.
    pub heartbeat_ceiling: u32,
    /// Sleep increment of the heartbeat loop, in seconds.
    pub sleep_granularity: u32,
    /// Whether requests must carry credentials.
    pub require_auth: bool,
    /// Name advertised in the `MS-Server-ActiveSync` header.
    pub server_name: String,
}

impl ServerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            heartbeat_ceiling: 900,
            sleep_granularity: 60,
            require_auth: true,
            server_name: "asgw".to_owned(),
        }
    }

    /// Sets the heartbeat ceiling.
    pub fn with_heartbeat_ceiling(mut self, seconds: u32) -> Self {
        self.heartbeat_ceiling = seconds;
        self
    }

    /// Sets the heartbeat sleep increment.
    pub fn with_sleep_granularity(mut self, seconds: u32) -> Self {
        self.sleep_granularity = seconds;
        self
    }

    /// Disables the credential check.
    pub fn without_auth(mut self) -> Self {
        self.require_auth = false;
        self
    }

    /// The engine limits derived from this configuration.
    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            heartbeat_ceiling: self.heartbeat_ceiling,
            sleep_granularity: self.sleep_granularity,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
