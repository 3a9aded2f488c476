//! gridsim desktop entry point.
//!
//! Runs the supervision core: single-instance guard, backend environment
//! preflight, server supervision, and coordinated shutdown.

use std::path::PathBuf;

use clap::Parser;
use desktop::settings::load_settings;
use desktop::RunOptions;

#[derive(Parser, Debug)]
#[command(name = "gridsim-desktop")]
#[command(about = "Desktop shell for the gridsim simulation server")]
struct Args {
    /// Backend host override
    #[arg(long)]
    host: Option<String>,

    /// Backend port override
    #[arg(long)]
    port: Option<u16>,

    /// Simulation environment root override
    #[arg(long)]
    env_root: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let mut settings = load_settings();
    if let Some(host) = args.host {
        settings.host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }
    if let Some(env_root) = args.env_root {
        settings.env_root = Some(env_root);
    }

    desktop::run(RunOptions {
        settings,
        lock_dir: None,
    })
    .await
}
