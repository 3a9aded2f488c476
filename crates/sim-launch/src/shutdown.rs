//! The graceful-then-forceful shutdown protocol.
//!
//! Network-based graceful shutdown can fail for many reasons; the
//! forceful kill is the true safety net and is never skipped because of
//! a prior failure. The whole protocol runs at most once per process
//! lifetime, however many teardown triggers fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::{ProcessSupervisor, ServerConfig, ServerError};

/// Coordinates application teardown.
pub struct ShutdownCoordinator {
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    client: reqwest::Client,
    shutdown_url: String,
    graceful_timeout: Duration,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        supervisor: Arc<Mutex<ProcessSupervisor>>,
        config: &ServerConfig,
    ) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ServerError::Client)?;
        Ok(Self {
            supervisor,
            client,
            shutdown_url: config.shutdown_url(),
            graceful_timeout: config.graceful_timeout,
            fired: AtomicBool::new(false),
        })
    }

    /// Run the shutdown protocol.
    ///
    /// Overlapping triggers (window close plus a process signal) collapse
    /// into a single execution; only the call that actually ran the
    /// protocol returns `true`. The host process must not exit before
    /// that call has returned.
    pub async fn shutdown(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            log::debug!("[shutdown] Already shutting down, ignoring trigger");
            return false;
        }

        log::info!("[shutdown] Requesting graceful server shutdown");
        match self
            .client
            .post(&self.shutdown_url)
            .timeout(self.graceful_timeout)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                log::info!("[shutdown] Server responded {status}: {}", body.trim());
            }
            Err(e) => {
                log::warn!("[shutdown] Graceful shutdown request failed: {e}");
            }
        }

        // The forceful kill runs no matter how the graceful request went
        self.supervisor.lock().await.kill().await;
        log::info!("[shutdown] Shutdown complete");
        true
    }
}
