//! Configuration for a client session
//!
//! Centralized configuration with sensible defaults.

use crate::error::{ClientError, Result};

/// Default server port
pub const DEFAULT_PORT: u16 = 1984;

/// Configuration for one session (and its event side channel)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server Address
    // -------------------------------------------------------------------------
    /// Server host name or IP. The event side channel connects to the same host.
    pub host: String,

    /// Command port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Credentials
    // -------------------------------------------------------------------------
    pub username: String,

    pub password: String,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Connect timeout (milliseconds), 0 waits for the OS default
    pub connect_timeout_ms: u64,

    /// Size of each read from the socket (bytes)
    pub read_chunk_size: usize,

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------
    /// Log every byte chunk sent and received at debug level
    pub trace_wire: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: "admin".to_string(),
            password: "admin".to_string(),
            connect_timeout_ms: 0,
            read_chunk_size: 8 * 1024,
            trace_wire: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` of the command connection
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set both user name and password
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    pub fn trace_wire(mut self, enabled: bool) -> Self {
        self.config.trace_wire = enabled;
        self
    }

    pub fn build(self) -> Result<Config> {
        let config = self.config;
        if config.host.is_empty() {
            return Err(ClientError::Config("host must not be empty".to_string()));
        }
        if config.port == 0 {
            return Err(ClientError::Config("port must not be 0".to_string()));
        }
        if config.read_chunk_size == 0 {
            return Err(ClientError::Config("read chunk size must be positive".to_string()));
        }
        Ok(config)
    }
}
