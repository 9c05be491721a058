//! Server configuration.

use std::net::IpAddr;

use lnetd_protocol::DEFAULT_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket on.
    pub bind_addr: String,

    /// TCP port to listen on. The Lustre default of 988 requires
    /// privilege; any port works for userland peers that honor the
    /// `#PORT` NID suffix.
    pub port: u16,

    /// Local addresses advertised in PING replies.
    pub local_addrs: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            local_addrs: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LNETD_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Ok(port) = std::env::var("LNETD_PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        if let Ok(addrs) = std::env::var("LNETD_LOCAL_ADDRS") {
            config.local_addrs = addrs
                .split(',')
                .filter_map(|s| match s.trim().parse() {
                    Ok(addr) => Some(addr),
                    Err(_) => {
                        tracing::warn!("ignoring unparseable local address: {}", s.trim());
                        None
                    }
                })
                .collect();
        }

        config
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
