//! Configuration for the dashboard server.
//!
//! Settings are read from an optional `conveyor.toml` in the working
//! directory and layered: built-in defaults → TOML file → environment
//! variables. Every field has a sensible default, so the server runs
//! with no config file at all.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//!
//! [workflow]
//! min_requirement_len = 50
//! log_capacity = 500
//! step_delay_ms = 1200
//!
//! [tracker]
//! base_url = "http://localhost:8001"
//! project_key = "PROJ"
//! timeout_secs = 60
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE: &str = "conveyor.toml";

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Bind address (default: "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port (default: 8000)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// Minimum accepted requirement length in characters (default: 50)
    #[serde(default = "default_min_requirement_len")]
    pub min_requirement_len: usize,
    /// Maximum number of activity-log entries retained in memory (default: 500)
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Artificial pause between step phases, for demo pacing (default: 1200ms)
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

fn default_min_requirement_len() -> usize {
    50
}

fn default_log_capacity() -> usize {
    500
}

fn default_step_delay_ms() -> u64 {
    1200
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            min_requirement_len: default_min_requirement_len(),
            log_capacity: default_log_capacity(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

/// Ticket tracker integration settings.
///
/// When `base_url` is empty the tracker client runs in canned mode and
/// answers every call locally, which keeps the demo self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    /// Base URL of the tracker service, e.g. "http://localhost:8001".
    /// Empty string disables remote calls (default: "")
    #[serde(default)]
    pub base_url: String,
    /// Project key used when creating epics and stories (default: "PROJ")
    #[serde(default = "default_project_key")]
    pub project_key: String,
    /// Request timeout in seconds (default: 60)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_project_key() -> String {
    "PROJ".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            project_key: default_project_key(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The complete conveyor.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DashboardConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSection,
    /// Workflow engine settings
    #[serde(default)]
    pub workflow: WorkflowSection,
    /// Ticket tracker integration
    #[serde(default)]
    pub tracker: TrackerSection,
}

impl DashboardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse conveyor.toml")
    }

    /// Load configuration from `dir/conveyor.toml`, falling back to
    /// defaults if the file doesn't exist. Environment overrides are
    /// applied on top either way.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Layer environment variables over the current values.
    ///
    /// `lookup` abstracts `std::env::var` so tests can inject values
    /// without mutating process state. Recognized variables:
    /// `DASHBOARD_HOST`, `DASHBOARD_PORT`, `MCP_SERVER_URL`,
    /// `API_TIMEOUT`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("DASHBOARD_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DASHBOARD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid DASHBOARD_PORT: {port}"))?;
        }
        if let Some(url) = lookup("MCP_SERVER_URL") {
            self.tracker.base_url = url;
        }
        if let Some(timeout) = lookup("API_TIMEOUT") {
            self.tracker.timeout_secs = timeout
                .parse()
                .with_context(|| format!("Invalid API_TIMEOUT: {timeout}"))?;
        }
        Ok(())
    }

    /// Resolve the bind address from host and port.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}
