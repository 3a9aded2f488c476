//! The simulation server process and its lifecycle.
//!
//! State machine: Unspawned -> Spawned -> (probing...) -> Running ->
//! Killed. `start` returns only once the server answers its liveness
//! endpoint; Running is the only state in which the rest of the system
//! may use the server.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::{probe, ServerConfig, ServerError};

/// Owns the simulation server child process.
///
/// At most one server is spawned per supervisor; if a server is already
/// alive at the target URL it is adopted by never calling [`start`];
/// that decision belongs to the preflight sequencer.
///
/// [`start`]: ProcessSupervisor::start
pub struct ProcessSupervisor {
    config: ServerConfig,
    client: reqwest::Client,
    child: Option<Child>,
    io_tasks: Vec<JoinHandle<()>>,
}

impl ProcessSupervisor {
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ServerError::Client)?;
        Ok(Self {
            config,
            client,
            child: None,
            io_tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether this supervisor currently owns a child process.
    ///
    /// Note that liveness is derived from probing, not from handle
    /// existence; an adopted server is alive without being spawned here.
    pub fn is_spawned(&self) -> bool {
        self.child.is_some()
    }

    /// Single liveness probe against the configured URL.
    pub async fn probe_once(&self) -> Result<bool, ServerError> {
        probe::probe(
            &self.client,
            &self.config.alive_url(),
            self.config.probe_timeout,
        )
        .await
    }

    /// Spawn the server and poll until it answers its liveness endpoint.
    ///
    /// Returns exactly once on the first successful probe. If the probe
    /// budget runs out or the child dies first, the half-started process
    /// is killed and the error is returned.
    pub async fn start(&mut self, mut command: tokio::process::Command) -> Result<(), ServerError> {
        if self.child.is_some() {
            log::warn!("[supervisor] start called while a server is already owned; ignoring");
            return Ok(());
        }

        log::info!(
            "[supervisor] Spawning simulation server: {:?}",
            command.as_std()
        );

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ServerError::Spawn)?;

        // Captured stdio goes to the log for diagnostics
        if let Some(out) = child.stdout.take() {
            self.io_tasks.push(tokio::spawn(forward_lines(out, "server")));
        }
        if let Some(err) = child.stderr.take() {
            self.io_tasks
                .push(tokio::spawn(forward_lines(err, "server:err")));
        }
        self.child = Some(child);

        let alive_url = self.config.alive_url();
        let started = Instant::now();

        for attempt in 1..=self.config.startup_probe_budget {
            // A dead child will never answer a probe
            let exited = self
                .child
                .as_mut()
                .and_then(|child| child.try_wait().ok().flatten());
            if let Some(status) = exited {
                self.clear();
                return Err(ServerError::Exited { status });
            }

            match probe::probe(&self.client, &alive_url, self.config.probe_timeout).await {
                Ok(true) => {
                    log::info!(
                        "[supervisor] Server alive at {} after {} probe(s) ({:?})",
                        self.config.base_url,
                        attempt,
                        started.elapsed()
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => {
                    self.kill().await;
                    return Err(e);
                }
            }

            tokio::time::sleep(self.config.probe_interval).await;
        }

        // Budget exhausted: the half-started server must not outlive the attempt
        self.kill().await;
        Err(ServerError::StartupTimeout {
            attempts: self.config.startup_probe_budget,
            waited: started.elapsed(),
        })
    }

    /// Kill the owned server process.
    ///
    /// Idempotent: a no-op when no process is owned or it already exited.
    /// Sends a termination signal first, waits a bounded time, then
    /// escalates to a forceful kill. Never blocks indefinitely.
    pub async fn kill(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        for task in self.io_tasks.drain(..) {
            task.abort();
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("[supervisor] Server already exited with {status}");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("[supervisor] Failed to poll server status: {e}");
            }
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                if e != nix::errno::Errno::ESRCH {
                    log::warn!("[supervisor] Failed to signal server {pid}: {e}");
                }
            }

            match tokio::time::timeout(self.config.kill_wait, child.wait()).await {
                Ok(Ok(status)) => {
                    log::info!("[supervisor] Server exited with {status}");
                    return;
                }
                Ok(Err(e)) => {
                    log::warn!("[supervisor] Error waiting for server exit: {e}");
                }
                Err(_) => {
                    log::warn!(
                        "[supervisor] Server unresponsive to SIGTERM after {:?}, killing",
                        self.config.kill_wait
                    );
                }
            }
        }

        if let Err(e) = child.start_kill() {
            log::warn!("[supervisor] Failed to kill server: {e}");
        }
        let _ = tokio::time::timeout(self.config.kill_wait, child.wait()).await;
    }

    fn clear(&mut self) {
        for task in self.io_tasks.drain(..) {
            task.abort();
        }
        self.child = None;
    }
}

/// Forward lines from a captured stream to the log.
async fn forward_lines<R>(reader: R, tag: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::info!("[{tag}] {line}");
    }
}
