//! Server settings, and the defaults shared by the server and client executables.
use std::time::Duration;

/// default address the server binds to and the client connects to
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// default TCP port
pub const DEFAULT_PORT: u16 = 9090;
/// longest request line a session accepts, in bytes, line terminator included
pub const MAX_LINE_LEN: usize = 8 * 1024;
/// environment variable overriding the host
pub const HOST_ENV: &str = "DISTPRIME_HOST";
/// environment variable overriding the port
pub const PORT_ENV: &str = "DISTPRIME_PORT";

/// Settings of a [`PrimeServer`](crate::PrimeServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// host name or IP address to listen on
    pub host: String,
    /// port to listen on
    pub port: u16,
    /// number of worker processes
    pub workers: u32,
    /// if set, at most this many sessions are serviced at once
    pub max_connections: Option<u32>,
    /// if set, the largest interval a `range` or `count` request may cover
    pub max_span: Option<u64>,
    /// if set, sessions silent for this long are closed
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            workers: default_workers(),
            max_connections: None,
            max_span: None,
            idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// the `host:port` string to bind to
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_span: self.max_span,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// the part of the configuration every session needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionLimits {
    pub(crate) max_span: Option<u64>,
    pub(crate) idle_timeout: Option<Duration>,
}

/// one worker per available CPU core
pub fn default_workers() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr(), "127.0.0.1:9090");
        assert!(config.workers >= 1);
        assert_eq!(config.max_connections, None);
        assert_eq!(config.limits().max_span, None);
        assert_eq!(config.idle_timeout, None);
    }
}
