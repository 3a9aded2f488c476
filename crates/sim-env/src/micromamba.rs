//! Provisioner tool bootstrapping via direct download.
//!
//! Environments are provisioned with `micromamba`. A system install on
//! PATH is preferred; otherwise the static binary is downloaded from the
//! micromamba GitHub releases, verified against its published SHA-256, and
//! cached in `~/.cache/gridsim/tools/`.

use log::info;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::environment::EnvError;

/// Target micromamba release for the direct download.
pub const MICROMAMBA_TARGET_VERSION: &str = "2.0.5";

/// Cache directory for bootstrapped tools.
fn tools_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gridsim")
        .join("tools")
}

/// Release asset name for the current platform.
///
/// Matches the naming of the `mamba-org/micromamba-releases` assets.
fn release_asset() -> Result<&'static str, EnvError> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Ok("micromamba-linux-64"),
        ("linux", "aarch64") => Ok("micromamba-linux-aarch64"),
        ("macos", "x86_64") => Ok("micromamba-osx-64"),
        ("macos", "aarch64") => Ok("micromamba-osx-arm64"),
        ("windows", "x86_64") => Ok("micromamba-win-64.exe"),
        (os, arch) => Err(EnvError::Provision {
            message: format!("unsupported platform for micromamba: {os}/{arch}"),
        }),
    }
}

/// Expected cached binary path for the pinned micromamba version.
fn cached_binary_path(version: &str) -> PathBuf {
    let name = if cfg!(windows) {
        format!("micromamba-{version}.exe")
    } else {
        format!("micromamba-{version}")
    };
    tools_cache_dir().join(name)
}

/// Check if micromamba is available on PATH.
async fn system_micromamba() -> Option<PathBuf> {
    let output = tokio::process::Command::new("micromamba")
        .arg("--version")
        .output()
        .await
        .ok()?;

    if output.status.success() {
        let version = String::from_utf8_lossy(&output.stdout);
        info!("[micromamba] Using system micromamba ({})", version.trim());
        Some(PathBuf::from("micromamba"))
    } else {
        None
    }
}

/// Download and verify the micromamba binary from GitHub releases.
async fn download_micromamba(version: &str) -> Result<PathBuf, EnvError> {
    let asset = release_asset()?;
    let binary_path = cached_binary_path(version);

    if binary_path.exists() {
        info!("[micromamba] Using cached micromamba at {:?}", binary_path);
        return Ok(binary_path);
    }

    let base_url = format!(
        "https://github.com/mamba-org/micromamba-releases/releases/download/{version}/{asset}"
    );
    let checksum_url = format!("{base_url}.sha256");

    info!("[micromamba] Downloading micromamba {version} from GitHub...");

    tokio::fs::create_dir_all(tools_cache_dir()).await?;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| EnvError::Provision {
            message: format!("failed to build download client: {e}"),
        })?;

    // Checksum first
    let checksum_response =
        client
            .get(&checksum_url)
            .send()
            .await
            .map_err(|e| EnvError::Provision {
                message: format!("failed to download micromamba checksum: {e}"),
            })?;
    if !checksum_response.status().is_success() {
        return Err(EnvError::Provision {
            message: format!(
                "failed to download micromamba checksum: {}",
                checksum_response.status()
            ),
        });
    }
    let checksum_text = checksum_response
        .text()
        .await
        .map_err(|e| EnvError::Provision {
            message: format!("failed to read micromamba checksum: {e}"),
        })?;
    let expected_hash = checksum_text
        .split_whitespace()
        .next()
        .ok_or_else(|| EnvError::Provision {
            message: "invalid micromamba checksum format".to_string(),
        })?
        .to_lowercase();

    // Binary
    let response = client
        .get(&base_url)
        .send()
        .await
        .map_err(|e| EnvError::Provision {
            message: format!("failed to download micromamba: {e}"),
        })?;
    if !response.status().is_success() {
        return Err(EnvError::Provision {
            message: format!("failed to download micromamba: {}", response.status()),
        });
    }
    let bytes = response.bytes().await.map_err(|e| EnvError::Provision {
        message: format!("failed to read micromamba download: {e}"),
    })?;

    // Verify
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let actual_hash = format!("{:x}", hasher.finalize());
    if actual_hash != expected_hash {
        return Err(EnvError::Provision {
            message: format!(
                "micromamba checksum mismatch: expected {expected_hash}, got {actual_hash}"
            ),
        });
    }

    // Write next to the final path, then rename into place
    let temp_path = binary_path.with_file_name(format!("{asset}.partial"));
    tokio::fs::write(&temp_path, &bytes).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(&temp_path, perms).await?;
    }

    tokio::fs::rename(&temp_path, &binary_path).await?;

    info!(
        "[micromamba] Installed micromamba {} at {:?}",
        version, binary_path
    );
    Ok(binary_path)
}

/// Global cache for the micromamba binary path.
/// Avoids repeated lookups once micromamba is resolved.
static MICROMAMBA_PATH: OnceCell<Arc<Result<PathBuf, String>>> = OnceCell::const_new();

/// Get the path to micromamba, bootstrapping it if necessary.
///
/// 1. First checks if micromamba is available on PATH (fast path)
/// 2. If not, downloads the pinned release from GitHub
/// 3. Caches the result for subsequent calls
pub async fn get_micromamba_path() -> Result<PathBuf, EnvError> {
    let result = MICROMAMBA_PATH
        .get_or_init(|| async {
            if let Some(path) = system_micromamba().await {
                return Arc::new(Ok(path));
            }

            info!("[micromamba] micromamba not found on PATH, downloading...");
            match download_micromamba(MICROMAMBA_TARGET_VERSION).await {
                Ok(path) => Arc::new(Ok(path)),
                Err(e) => Arc::new(Err(e.to_string())),
            }
        })
        .await;

    match result.as_ref() {
        Ok(path) => Ok(path.clone()),
        Err(e) => Err(EnvError::Provision { message: e.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tools_cache_dir() {
        let dir = tools_cache_dir();
        assert!(dir.to_string_lossy().contains("gridsim"));
        assert!(dir.to_string_lossy().contains("tools"));
    }

    #[test]
    fn test_cached_binary_path_is_versioned() {
        let path = cached_binary_path("2.0.5");
        assert!(path.to_string_lossy().contains("micromamba-2.0.5"));
    }

    #[test]
    fn test_release_asset_known_platforms() {
        // Should resolve on every platform this crate builds for
        #[cfg(any(
            all(target_arch = "x86_64", target_os = "linux"),
            all(target_arch = "aarch64", target_os = "linux"),
            all(target_arch = "x86_64", target_os = "macos"),
            all(target_arch = "aarch64", target_os = "macos"),
            all(target_arch = "x86_64", target_os = "windows"),
        ))]
        {
            let asset = release_asset().unwrap();
            assert!(asset.starts_with("micromamba-"));
        }
    }
}
