//! On-disk simulation environment management.
//!
//! An environment is a conda-style prefix containing the pinned `gridsim`
//! package and its runtime. The version marker file at the environment
//! root is the existence witness: it is written only after a provision
//! fully succeeded, so a directory without one is treated as a partial
//! provision and cleaned up rather than trusted.

use chrono::{DateTime, Utc};
use log::info;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

use crate::micromamba;
use crate::progress::{EnvProgressPhase, ProgressHandler};
use crate::version::{drift, VersionDrift};

/// Name of the version marker file at the environment root.
pub const MARKER_FILE: &str = ".gridsim-env.json";

/// Conda package that provides the simulation server.
const SERVER_PACKAGE: &str = "gridsim";

/// Channel the server package is published on.
const DEFAULT_CHANNEL: &str = "conda-forge";

/// Errors from environment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    /// The environment does not exist on disk. Expected on first launch;
    /// recovered by creating the environment.
    #[error("simulation environment not found")]
    NotFound,

    /// The environment exists but is not usable.
    #[error("simulation environment at {path:?} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    /// Provisioning (create/update) failed.
    #[error("failed to provision simulation environment: {message}")]
    Provision { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Version marker persisted at the environment root.
///
/// Written only after a fully successful provision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMarker {
    pub version: Version,
    pub provisioned_at: DateTime<Utc>,
}

/// A provisioned environment on disk.
#[derive(Debug, Clone)]
pub struct Environment {
    pub root: PathBuf,
    pub version: Version,
}

impl Environment {
    /// Path to the simulation server entry point inside this environment.
    pub fn server_binary(&self) -> PathBuf {
        server_binary_path(&self.root)
    }
}

/// Entry point path for an environment rooted at `root`.
pub fn server_binary_path(root: &Path) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        root.join("Scripts").join("gridsim.exe")
    }
    #[cfg(not(target_os = "windows"))]
    {
        root.join("bin").join("gridsim")
    }
}

/// Default root for the simulation environment.
pub fn default_env_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gridsim")
        .join("env")
}

/// Manages the versioned environment at a fixed root.
///
/// The manager is the only component that mutates the environment
/// directory; everything else only reads the version marker.
pub struct EnvManager {
    root: PathBuf,
    package: String,
    channel: String,
    /// Override for the provisioning tool binary (used in tests).
    tool: Option<PathBuf>,
}

impl Default for EnvManager {
    fn default() -> Self {
        Self::new(default_env_root())
    }
}

impl EnvManager {
    /// Create a manager for the environment at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            package: SERVER_PACKAGE.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            tool: None,
        }
    }

    /// Use a specific provisioning tool binary instead of resolving
    /// micromamba.
    pub fn with_tool(mut self, tool: PathBuf) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the simulation server entry point.
    pub fn server_binary(&self) -> PathBuf {
        server_binary_path(&self.root)
    }

    fn marker_path(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    /// Check that a usable environment exists.
    ///
    /// Returns [`EnvError::NotFound`] when the environment is absent or
    /// only partially provisioned; any other error means the environment
    /// is present but unusable.
    pub async fn check(&self) -> Result<(), EnvError> {
        if !self.root.exists() || !self.marker_path().exists() {
            return Err(EnvError::NotFound);
        }
        // Marker must parse and the entry point must be in place
        self.read_marker().await?;
        if !self.server_binary().exists() {
            return Err(EnvError::Corrupted {
                path: self.root.clone(),
                reason: "server entry point is missing".to_string(),
            });
        }
        Ok(())
    }

    /// Read the installed environment version from the marker.
    pub async fn installed_version(&self) -> Result<Version, EnvError> {
        Ok(self.read_marker().await?.version)
    }

    /// Create the environment at the given version.
    ///
    /// Idempotent: invoking on an already-complete environment at the
    /// same version is a no-op; an interrupted earlier provision is
    /// cleaned up and restarted.
    pub async fn create(
        &self,
        version: &Version,
        handler: &dyn ProgressHandler,
    ) -> Result<Environment, EnvError> {
        if self.check().await.is_ok() {
            let installed = self.installed_version().await?;
            if &installed == version {
                info!(
                    "[env] Environment already provisioned at v{} in {:?}",
                    installed, self.root
                );
                handler.on_progress(EnvProgressPhase::Ready {
                    env_path: self.root.to_string_lossy().to_string(),
                    version: installed.clone(),
                });
                return Ok(Environment {
                    root: self.root.clone(),
                    version: installed,
                });
            }
        }

        handler.on_progress(EnvProgressPhase::Creating {
            version: version.clone(),
        });
        self.provision_fresh(version, handler).await
    }

    /// Bring the environment to the desired version.
    ///
    /// Upgrades are installed in place; a downgrade (installed newer than
    /// desired) recreates the environment from scratch, since the package
    /// tooling does not downgrade reliably in place.
    pub async fn update(
        &self,
        desired: &Version,
        handler: &dyn ProgressHandler,
    ) -> Result<Environment, EnvError> {
        let installed = self.installed_version().await?;
        match drift(&installed, desired) {
            VersionDrift::UpToDate => {
                info!("[env] Environment already at v{}, nothing to update", installed);
                Ok(Environment {
                    root: self.root.clone(),
                    version: installed,
                })
            }
            VersionDrift::Outdated { installed, desired } => {
                handler.on_progress(EnvProgressPhase::Updating {
                    installed: installed.clone(),
                    desired: desired.clone(),
                });

                let args = vec![
                    "install".to_string(),
                    "--yes".to_string(),
                    "--prefix".to_string(),
                    self.root.to_string_lossy().to_string(),
                    "--channel".to_string(),
                    self.channel.clone(),
                    format!("{}={}", self.package, desired),
                ];
                if let Err(e) = self.run_tool(&args, handler).await {
                    // In-place failure leaves the old version intact;
                    // the marker still records it, so state stays consistent
                    handler.on_progress(EnvProgressPhase::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
                self.finish(&desired, handler).await
            }
            VersionDrift::Downgrade { installed, desired } => {
                handler.on_progress(EnvProgressPhase::Recreating {
                    installed,
                    desired: desired.clone(),
                });
                self.provision_fresh(&desired, handler).await
            }
        }
    }

    /// Provision a fresh environment, replacing whatever is at the root.
    async fn provision_fresh(
        &self,
        version: &Version,
        handler: &dyn ProgressHandler,
    ) -> Result<Environment, EnvError> {
        // Remove leftovers from an interrupted provision
        if self.root.exists() {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        if let Some(parent) = self.root.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = vec![
            "create".to_string(),
            "--yes".to_string(),
            "--prefix".to_string(),
            self.root.to_string_lossy().to_string(),
            "--channel".to_string(),
            self.channel.clone(),
            format!("{}={}", self.package, version),
        ];

        if let Err(e) = self.run_tool(&args, handler).await {
            // Never leave a half-provisioned directory that reads as existing
            tokio::fs::remove_dir_all(&self.root).await.ok();
            handler.on_progress(EnvProgressPhase::Error {
                message: e.to_string(),
            });
            return Err(e);
        }

        self.finish(version, handler).await
    }

    /// Verify the entry point and write the marker. The marker is written
    /// last so its presence always implies a complete provision.
    async fn finish(
        &self,
        version: &Version,
        handler: &dyn ProgressHandler,
    ) -> Result<Environment, EnvError> {
        let binary = self.server_binary();
        if !binary.exists() {
            let message = format!("server entry point missing at {:?} after provisioning", binary);
            handler.on_progress(EnvProgressPhase::Error {
                message: message.clone(),
            });
            return Err(EnvError::Provision { message });
        }

        self.write_marker(version).await?;

        info!("[env] Environment ready at {:?} (v{})", self.root, version);
        handler.on_progress(EnvProgressPhase::Ready {
            env_path: self.root.to_string_lossy().to_string(),
            version: version.clone(),
        });

        Ok(Environment {
            root: self.root.clone(),
            version: version.clone(),
        })
    }

    async fn read_marker(&self) -> Result<VersionMarker, EnvError> {
        let raw = tokio::fs::read_to_string(self.marker_path())
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => EnvError::NotFound,
                _ => EnvError::Io(e),
            })?;
        serde_json::from_str(&raw).map_err(|e| EnvError::Corrupted {
            path: self.root.clone(),
            reason: format!("unreadable version marker: {e}"),
        })
    }

    async fn write_marker(&self, version: &Version) -> Result<(), EnvError> {
        let marker = VersionMarker {
            version: version.clone(),
            provisioned_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&marker)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        tokio::fs::write(self.marker_path(), json).await?;
        Ok(())
    }

    /// Run the provisioning tool, forwarding its stdout to the progress
    /// handler and collecting stderr for diagnostics.
    async fn run_tool(
        &self,
        args: &[String],
        handler: &dyn ProgressHandler,
    ) -> Result<(), EnvError> {
        let tool = match &self.tool {
            Some(tool) => tool.clone(),
            None => micromamba::get_micromamba_path().await?,
        };

        info!("[env] Running {:?} {:?}", tool, args);

        let mut child = tokio::process::Command::new(&tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EnvError::Provision {
                message: format!("failed to launch provisioning tool {:?}: {e}", tool),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward_stdout = async {
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        handler.on_progress(EnvProgressPhase::ToolOutput { line });
                    }
                }
            }
        };

        let collect_stderr = async {
            let mut buf = String::new();
            if let Some(mut err) = stderr {
                let _ = err.read_to_string(&mut buf).await;
            }
            buf
        };

        let (_, stderr_text, status) = tokio::join!(forward_stdout, collect_stderr, child.wait());
        let status = status?;

        if !status.success() {
            let message = if stderr_text.trim().is_empty() {
                format!("provisioning tool exited with {status}")
            } else {
                stderr_text.trim().to_string()
            };
            return Err(EnvError::Provision { message });
        }

        Ok(())
    }
}
