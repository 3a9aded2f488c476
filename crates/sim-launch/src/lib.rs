//! Simulation server process supervision.
//!
//! This crate owns the backend child process for the desktop shell. It
//! knows nothing about environments or the UI; it can:
//!
//! - Probe the server's liveness endpoint with a bounded timeout
//! - Spawn the server and poll until it is accepting requests
//! - Kill the server idempotently, escalating from a termination signal
//!   to a forceful kill after a bounded wait
//! - Drive the graceful-then-forceful shutdown protocol exactly once per
//!   process lifetime
//!
//! The child process handle has exactly one owner ([`ProcessSupervisor`]);
//! no other component terminates it directly.

use std::time::Duration;

pub mod probe;
pub mod shutdown;
pub mod supervisor;

// Re-export key types
pub use probe::probe;
pub use shutdown::ShutdownCoordinator;
pub use supervisor::ProcessSupervisor;

/// Errors from server supervision.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The server process could not be launched.
    #[error("failed to spawn simulation server: {0}")]
    Spawn(#[source] std::io::Error),

    /// The server process exited while we were waiting for it to come alive.
    #[error("simulation server exited during startup with {status}")]
    Exited { status: std::process::ExitStatus },

    /// The probe budget ran out before the server answered.
    #[error("simulation server did not come alive after {attempts} probes ({waited:?})")]
    StartupTimeout { attempts: u32, waited: Duration },

    /// An unexpected probe failure (timeouts and refused connections are
    /// not errors; they simply mean "not alive").
    #[error("liveness probe failed: {0}")]
    Probe(#[from] reqwest::Error),

    #[error("failed to initialize http client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Configuration for supervising the simulation server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL the server is (or will be) reachable at.
    pub base_url: String,
    /// Timeout for a single liveness probe.
    pub probe_timeout: Duration,
    /// Delay between startup probes.
    pub probe_interval: Duration,
    /// Maximum number of startup probes before giving up.
    pub startup_probe_budget: u32,
    /// Timeout for the graceful shutdown request.
    pub graceful_timeout: Duration,
    /// How long to wait for the server to exit before escalating to a
    /// forceful kill.
    pub kill_wait: Duration,
}

impl ServerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            probe_timeout: Duration::from_secs(2),
            probe_interval: Duration::from_millis(500),
            startup_probe_budget: 120,
            graceful_timeout: Duration::from_secs(5),
            kill_wait: Duration::from_secs(5),
        }
    }

    /// Liveness endpoint URL.
    pub fn alive_url(&self) -> String {
        format!("{}/server/alive", self.base_url.trim_end_matches('/'))
    }

    /// Graceful shutdown endpoint URL.
    pub fn shutdown_url(&self) -> String {
        format!("{}/server/shutdown", self.base_url.trim_end_matches('/'))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:5050")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let config = ServerConfig::new("http://127.0.0.1:5050");
        assert_eq!(config.alive_url(), "http://127.0.0.1:5050/server/alive");
        assert_eq!(
            config.shutdown_url(),
            "http://127.0.0.1:5050/server/shutdown"
        );
    }

    #[test]
    fn test_endpoint_urls_trailing_slash() {
        let config = ServerConfig::new("http://127.0.0.1:5050/");
        assert_eq!(config.alive_url(), "http://127.0.0.1:5050/server/alive");
    }

    #[test]
    fn test_default_config_is_loopback() {
        let config = ServerConfig::default();
        assert!(config.base_url.contains("127.0.0.1"));
        assert!(config.startup_probe_budget > 0);
    }
}
