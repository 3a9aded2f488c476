//! Desktop shell host for the gridsim simulation server.
//!
//! The shell presents a browser-rendered UI whose real computation
//! happens in the local simulation server. This crate is the supervision
//! core behind that: it guards against second instances, provisions the
//! versioned backend environment, gets the server alive (spawning it or
//! adopting one that is already running), exposes readiness through the
//! preflight event surface, and tears the server down exactly once on
//! exit. Window rendering is a consumer of the event surface, not part of
//! this crate.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::Mutex;

use sim_env::{EnvError, EnvManager, LogHandler, ProgressHandler};
use sim_launch::{ProcessSupervisor, ServerConfig, ServerError, ShutdownCoordinator};

pub mod preflight;
pub mod settings;
pub mod singleton;

use preflight::{BootstrapSequencer, EnvironmentStore, ServerControl};
use semver::Version;
use settings::Settings;
use singleton::AppLock;

/// Options for running the shell host.
pub struct RunOptions {
    pub settings: Settings,
    /// Override for the lock directory (used in tests).
    pub lock_dir: Option<PathBuf>,
}

/// Production [`EnvironmentStore`]: the on-disk environment, with
/// provisioning progress routed through a [`ProgressHandler`].
pub struct DiskEnvironments {
    manager: EnvManager,
    handler: Arc<dyn ProgressHandler>,
}

impl DiskEnvironments {
    pub fn new(manager: EnvManager, handler: Arc<dyn ProgressHandler>) -> Self {
        Self { manager, handler }
    }
}

impl EnvironmentStore for DiskEnvironments {
    async fn check(&self) -> Result<(), EnvError> {
        self.manager.check().await
    }

    async fn installed_version(&self) -> Result<Version, EnvError> {
        self.manager.installed_version().await
    }

    async fn create(&self, version: &Version) -> Result<(), EnvError> {
        self.manager
            .create(version, self.handler.as_ref())
            .await
            .map(|_| ())
    }

    async fn update(&self, version: &Version) -> Result<(), EnvError> {
        self.manager
            .update(version, self.handler.as_ref())
            .await
            .map(|_| ())
    }
}

/// Production [`ServerControl`]: probes and spawns through the shared
/// process supervisor.
pub struct SupervisedServer {
    supervisor: Arc<Mutex<ProcessSupervisor>>,
    server_binary: PathBuf,
    host: String,
    port: u16,
}

impl SupervisedServer {
    pub fn new(
        supervisor: Arc<Mutex<ProcessSupervisor>>,
        server_binary: PathBuf,
        host: String,
        port: u16,
    ) -> Self {
        Self {
            supervisor,
            server_binary,
            host,
            port,
        }
    }
}

impl ServerControl for SupervisedServer {
    async fn probe(&self) -> Result<bool, ServerError> {
        self.supervisor.lock().await.probe_once().await
    }

    async fn start(&self) -> Result<(), ServerError> {
        let mut command = tokio::process::Command::new(&self.server_binary);
        command.args([
            "dashboard",
            "--host",
            &self.host,
            "--port",
            &self.port.to_string(),
        ]);
        self.supervisor.lock().await.start(command).await
    }
}

/// Run the shell host to completion.
///
/// Acquires the single-instance lock (exiting silently when another
/// instance holds it), runs the preflight sequence, then waits for a
/// termination signal and drives the shutdown protocol. The process only
/// returns after the forceful-kill step of shutdown has completed.
pub async fn run(options: RunOptions) -> anyhow::Result<()> {
    let settings = options.settings;
    let desired = sim_env::parse_version(env!("CARGO_PKG_VERSION"))?;

    // Second launches must exit before touching anything else
    let lock = match AppLock::try_acquire(options.lock_dir.as_deref()) {
        Ok(lock) => lock,
        Err(unavailable) => {
            match unavailable.running {
                Some(running) => info!(
                    "[shell] Another instance is already running (pid {}), exiting",
                    running.pid
                ),
                None => info!("[shell] Another instance is already running, exiting"),
            }
            return Ok(());
        }
    };

    let base_url = settings.base_url();
    info!("[shell] Starting gridsim desktop v{desired} ({base_url})");
    if let Err(e) = lock.write_info(&base_url) {
        error!("[shell] Failed to write instance info: {e}");
    }

    let env_root = settings
        .env_root
        .clone()
        .unwrap_or_else(sim_env::environment::default_env_root);
    let manager = EnvManager::new(env_root);
    let server_binary = manager.server_binary();

    let config = ServerConfig::new(base_url.clone());
    let supervisor = Arc::new(Mutex::new(ProcessSupervisor::new(config.clone())?));
    let coordinator = ShutdownCoordinator::new(supervisor.clone(), &config)?;

    let sequencer = BootstrapSequencer::new(
        DiskEnvironments::new(manager, Arc::new(LogHandler)),
        SupervisedServer::new(
            supervisor.clone(),
            server_binary,
            settings.host.clone(),
            settings.port,
        ),
        desired,
        base_url,
    );

    let mut preflight_task = tokio::spawn(sequencer.run());

    let outcome = tokio::select! {
        res = &mut preflight_task => Some(res),
        _ = shutdown_signal() => {
            info!("[shell] Shutdown requested during preflight; letting the sequence settle");
            None
        }
    };

    let failure = match outcome {
        Some(Ok(Ok(ready))) => {
            info!("[shell] Backend ready at {}", ready.url);
            shutdown_signal().await;
            info!("[shell] Shutdown requested");
            None
        }
        Some(Ok(Err(e))) => Some(anyhow::Error::new(e).context("preflight failed")),
        Some(Err(e)) => Some(anyhow::Error::new(e).context("preflight task panicked")),
        None => {
            // Cancelling mid-step is exactly the inconsistent state the
            // design avoids; wait for the terminal outcome before teardown
            let _ = preflight_task.await;
            None
        }
    };

    coordinator.shutdown().await;
    drop(lock);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Resolves when the process is asked to terminate.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
