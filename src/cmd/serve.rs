//! Dashboard server command — `conveyor serve`.

use std::path::Path;

use anyhow::{Context, Result};

use conveyor::config::DashboardConfig;
use conveyor::dashboard::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    port: Option<u16>,
    host: Option<&str>,
    config_path: Option<&Path>,
    open: bool,
    dev: bool,
) -> Result<()> {
    let mut dashboard = match config_path {
        Some(path) => {
            let mut config = DashboardConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            DashboardConfig::load_or_default(&cwd)?
        }
    };
    if let Some(host) = host {
        dashboard.server.host = host.to_string();
    }
    if let Some(port) = port {
        dashboard.server.port = port;
    }

    // Spawn browser open before starting the server (which blocks).
    // Skip in dev mode (no browser inside containers).
    if open && !dev {
        let url = format!("http://{}:{}", dashboard.server.host, dashboard.server.port);
        tokio::spawn(async move {
            // Small delay to let the server start binding
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                eprintln!("Failed to open browser: {}", e);
            }
        });
    }

    start_server(ServerConfig {
        dashboard,
        dev_mode: dev,
    })
    .await
}
