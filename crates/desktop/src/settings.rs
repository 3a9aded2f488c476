//! Shell settings persistence.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/gridsim/settings.json
//! - Linux: ~/.config/gridsim/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\gridsim\settings.json
//!
//! CLI flags override file values; missing fields fall back to the
//! build-time defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default backend host (loopback only; the server is never exposed).
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 5050;

/// Shell settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Host the backend binds to and is probed at.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port the backend binds to and is probed at.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Override for the simulation environment root.
    #[serde(default)]
    pub env_root: Option<PathBuf>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            env_root: None,
        }
    }
}

impl Settings {
    /// Backend base URL derived from host and port.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Get the path to the settings file.
fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gridsim")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if the file doesn't exist.
pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        Settings::default()
    }
}

/// Save settings to disk.
pub fn save_settings(settings: &Settings) -> anyhow::Result<()> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
