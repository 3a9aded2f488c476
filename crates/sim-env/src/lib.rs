//! Versioned simulation runtime environments.
//!
//! This crate owns the on-disk runtime the simulation server executes in.
//! Every release of the desktop shell pins an exact matching environment
//! version, so the environment is checked on every launch and created or
//! upgraded to match the application's own version. It includes:
//!
//! - Existence and version checks against an on-disk version marker
//! - Environment creation and in-place upgrade via `micromamba`
//! - A verified download bootstrap for `micromamba` itself
//! - A progress reporting trait for environment lifecycle events
//!
//! # Progress Reporting
//!
//! All environment operations accept a [`ProgressHandler`] to report phases
//! like creating, updating, and ready. Consumers implement this trait to
//! route progress to their UI (splash events, logs, etc.).
//!
//! ```ignore
//! use sim_env::{EnvManager, LogHandler};
//!
//! let manager = EnvManager::default();
//! manager.create(&version, &LogHandler).await?;
//! ```

pub mod environment;
pub mod micromamba;
pub mod progress;
pub mod version;

// Re-export key types
pub use environment::{EnvError, EnvManager, Environment, VersionMarker};
pub use progress::{EnvProgressPhase, LogHandler, ProgressHandler};
pub use version::{parse_version, VersionDrift};
