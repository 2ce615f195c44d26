//! Server configuration.

/// Registry broker configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind, also advertised in the `Host` header of every frame the
    /// server sends.
    pub host: String,

    /// TCP port to listen on. Port 0 picks an ephemeral port.
    pub port: u16,

    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            max_connections: 100,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration for the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}
