//! Preflight bootstrap sequencing.
//!
//! Drives the launch-time state machine that takes the shell from a cold
//! start to a ready backend: environment check, provisioning, version
//! alignment, liveness, and spawn-or-adopt. Each transition emits a
//! status event for the splash surface; the terminal outcome is the
//! return value of [`BootstrapSequencer::run`].
//!
//! The sequencer is generic over its two collaborators so the sequencing
//! invariants (liveness-before-spawn, update-exactly-once, fail-fast) can
//! be exercised without disks or processes.

use semver::Version;
use serde::Serialize;
use sim_env::EnvError;
use sim_launch::ServerError;
use tokio::sync::broadcast;

/// Preflight states, in the order a launch can visit them.
///
/// `Ready` and `Failed` are terminal; exactly one of them is reached per
/// launch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightState {
    Idle,
    CheckingEnvironment,
    CreatingEnvironment,
    CheckingVersion,
    UpdatingEnvironment,
    CheckingServerLiveness,
    AdoptingExistingServer,
    StartingServer,
    Ready,
    Failed,
}

/// Events emitted to the presentation layer.
///
/// One-way and fire-and-forget: subscribers may be absent, and emitting
/// never blocks the sequencer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreflightEvent {
    /// A state transition, with a display-ready status message.
    Status {
        state: PreflightState,
        message: String,
    },
    /// Terminal: the backend is ready at `url`.
    Ready { url: String },
    /// Terminal: the launch attempt failed; `error` is display-ready.
    Failed { error: String },
}

/// A preflight failure. The display form is suitable for the end-user
/// error surface (which offers only an exit action).
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error(transparent)]
    Environment(#[from] EnvError),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// The resolved backend, handed to the presentation layer on success.
#[derive(Debug, Clone)]
pub struct ReadyServer {
    pub url: String,
}

/// Environment operations the sequencer drives.
#[allow(async_fn_in_trait)]
pub trait EnvironmentStore {
    /// `Err(EnvError::NotFound)` is the expected "no environment yet"
    /// answer; any other error aborts the launch.
    async fn check(&self) -> Result<(), EnvError>;
    async fn installed_version(&self) -> Result<Version, EnvError>;
    async fn create(&self, version: &Version) -> Result<(), EnvError>;
    async fn update(&self, version: &Version) -> Result<(), EnvError>;
}

/// Server operations the sequencer drives.
#[allow(async_fn_in_trait)]
pub trait ServerControl {
    async fn probe(&self) -> Result<bool, ServerError>;
    /// Spawn the server and return once it answers its liveness endpoint.
    async fn start(&self) -> Result<(), ServerError>;
}

/// Orchestrates the preflight sequence.
///
/// One launch attempt per sequencer: `run` consumes it, so the
/// single-terminal-transition invariant is enforced by ownership.
pub struct BootstrapSequencer<E, S> {
    env: E,
    server: S,
    desired: Version,
    base_url: String,
    state: PreflightState,
    events: broadcast::Sender<PreflightEvent>,
}

impl<E, S> BootstrapSequencer<E, S>
where
    E: EnvironmentStore,
    S: ServerControl,
{
    pub fn new(env: E, server: S, desired: Version, base_url: String) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            env,
            server,
            desired,
            base_url,
            state: PreflightState::Idle,
            events,
        }
    }

    /// Subscribe to progress events. Call before [`run`].
    ///
    /// [`run`]: BootstrapSequencer::run
    pub fn subscribe(&self) -> broadcast::Receiver<PreflightEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PreflightState {
        self.state
    }

    /// Run the preflight sequence to its terminal state.
    ///
    /// Steps are strictly sequential; any failure short-circuits the
    /// remaining steps. The sequencer never probes after a failed
    /// provision and never spawns after a positive probe.
    pub async fn run(mut self) -> Result<ReadyServer, PreflightError> {
        match self.preflight().await {
            Ok(url) => {
                self.state = PreflightState::Ready;
                log::info!("[preflight] Ready: backend at {url}");
                let _ = self.events.send(PreflightEvent::Ready { url: url.clone() });
                Ok(ReadyServer { url })
            }
            Err(e) => {
                self.state = PreflightState::Failed;
                log::error!("[preflight] Failed: {e}");
                let _ = self.events.send(PreflightEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn preflight(&mut self) -> Result<String, PreflightError> {
        self.enter(
            PreflightState::CheckingEnvironment,
            "Checking for simulation environment...".to_string(),
        );
        let exists = match self.env.check().await {
            Ok(()) => true,
            Err(EnvError::NotFound) => false,
            Err(e) => return Err(e.into()),
        };

        if !exists {
            self.enter(
                PreflightState::CreatingEnvironment,
                format!(
                    "Creating simulation environment (v{})...\n(this might take a while)",
                    self.desired
                ),
            );
            self.env.create(&self.desired).await?;
        } else {
            self.enter(
                PreflightState::CheckingVersion,
                "Checking environment version...".to_string(),
            );
            let installed = self.env.installed_version().await?;
            log::debug!(
                "[preflight] installed={installed} desired={}",
                self.desired
            );
            if installed != self.desired {
                self.enter(
                    PreflightState::UpdatingEnvironment,
                    format!(
                        "Updating simulation environment (v{installed} -> v{})...",
                        self.desired
                    ),
                );
                self.env.update(&self.desired).await?;
            }
        }

        self.enter(
            PreflightState::CheckingServerLiveness,
            "Looking for a running simulation server...".to_string(),
        );
        if self.server.probe().await? {
            self.enter(
                PreflightState::AdoptingExistingServer,
                "Connecting to the running simulation server...".to_string(),
            );
        } else {
            self.enter(
                PreflightState::StartingServer,
                "Starting the simulation server...".to_string(),
            );
            self.server.start().await?;
        }

        Ok(self.base_url.clone())
    }

    fn enter(&mut self, state: PreflightState, message: String) {
        self.state = state;
        log::info!("[preflight] {}", message.lines().next().unwrap_or(""));
        // Fire-and-forget: a send error just means nobody is listening
        let _ = self.events.send(PreflightEvent::Status { state, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&PreflightState::CheckingServerLiveness).unwrap();
        assert_eq!(json, "\"checking_server_liveness\"");
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = PreflightEvent::Status {
            state: PreflightState::CreatingEnvironment,
            message: "Creating simulation environment (v3.1.0)...".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"state\":\"creating_environment\""));

        let ready = PreflightEvent::Ready {
            url: "http://127.0.0.1:5050".to_string(),
        };
        let json = serde_json::to_string(&ready).unwrap();
        assert!(json.contains("\"type\":\"ready\""));
        assert!(json.contains("http://127.0.0.1:5050"));
    }
}
