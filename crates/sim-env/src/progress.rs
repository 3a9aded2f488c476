//! Progress reporting for environment operations.
//!
//! Provides [`EnvProgressPhase`] events covering the lifecycle of
//! environment provisioning (checking, creating, updating, ready) and a
//! [`ProgressHandler`] trait that consumers implement to route events to
//! their UI layer.

use semver::Version;
use serde::{Deserialize, Serialize};

/// Progress phases during environment provisioning.
///
/// Serializable for transport over IPC to a webview splash screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum EnvProgressPhase {
    /// Checking whether an environment exists on disk.
    Checking { env_path: String },
    /// Creating a fresh environment at the given version.
    Creating { version: Version },
    /// Upgrading an existing environment in place.
    Updating { installed: Version, desired: Version },
    /// Recreating the environment from scratch (downgrade path).
    Recreating { installed: Version, desired: Version },
    /// A line of output from the provisioning tool.
    ToolOutput { line: String },
    /// Environment is provisioned and verified.
    Ready { env_path: String, version: Version },
    /// An error occurred.
    Error { message: String },
}

/// Trait for receiving environment progress events.
///
/// Implement this to route progress to your UI layer (splash-screen
/// events, logs, etc.).
pub trait ProgressHandler: Send + Sync {
    /// Called for each progress phase during provisioning.
    fn on_progress(&self, phase: EnvProgressPhase);
}

/// Log-only progress handler.
///
/// Writes progress phases to the `log` crate.
pub struct LogHandler;

impl ProgressHandler for LogHandler {
    fn on_progress(&self, phase: EnvProgressPhase) {
        match &phase {
            EnvProgressPhase::Checking { env_path } => {
                log::info!("[env] Checking for environment at {env_path}");
            }
            EnvProgressPhase::Creating { version } => {
                log::info!("[env] Creating environment (v{version})...");
            }
            EnvProgressPhase::Updating { installed, desired } => {
                log::info!("[env] Updating environment (v{installed} -> v{desired})...");
            }
            EnvProgressPhase::Recreating { installed, desired } => {
                log::info!("[env] Recreating environment (v{installed} -> v{desired})...");
            }
            EnvProgressPhase::ToolOutput { line } => {
                log::debug!("[micromamba] {line}");
            }
            EnvProgressPhase::Ready { env_path, version } => {
                log::info!("[env] Ready: env={env_path} version={version}");
            }
            EnvProgressPhase::Error { message } => {
                log::error!("[env] Error: {message}");
            }
        }
    }
}
