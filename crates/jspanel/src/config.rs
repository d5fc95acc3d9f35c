//! Application configuration.
//!
//! Loaded in layers: built-in defaults, then the TOML config file, then
//! `JSPANEL__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::container::RuntimeType;

pub const APP_NAME: &str = "jspanel";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub container: ContainerRuntimeConfig,
    pub scaffold: ScaffoldConfig,
    pub logs: LogsConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Emit JSON log lines instead of the pretty format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the built frontend. Served at `/` when it exists.
    pub static_dir: Option<String>,
    /// Maximum file upload size in megabytes (default: 100).
    pub max_upload_size_mb: usize,
    /// Allowed CORS origins. Empty disables cross-origin access.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: Some("frontend/dist".to_string()),
            max_upload_size_mb: 100,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb as u64 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerRuntimeConfig {
    /// Container runtime type: "docker" or "podman" (auto-detected if not set)
    pub runtime: Option<RuntimeType>,
    /// Custom path to the container runtime binary
    pub binary: Option<String>,
    /// Image for newly created containers
    pub default_image: String,
    /// Host directory holding one data directory per container
    pub data_root: String,
    /// Mount point of the data directory inside the container
    pub workdir: String,
    /// Command for newly created containers
    pub command: Vec<String>,
    /// Seconds to wait on stop/restart before the runtime kills the container
    pub stop_timeout_secs: Option<u32>,
}

impl Default for ContainerRuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            default_image: "node:20".to_string(),
            data_root: "/opt/js-data".to_string(),
            workdir: "/home/container".to_string(),
            command: vec![
                "bash".to_string(),
                "/home/container/entrypoint.sh".to_string(),
            ],
            stop_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldConfig {
    /// Installation root holding the helper scripts copied into new data directories.
    pub source_dir: String,
    /// Heartbeat interval of the synthesized default payload.
    pub heartbeat_secs: u64,
}

impl Default for ScaffoldConfig {
    fn default() -> Self {
        Self {
            source_dir: ".".to_string(),
            heartbeat_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Lines of history sent before following live output.
    pub tail_lines: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self { tail_lines: 200 }
    }
}

impl AppConfig {
    /// Load the config file (if present) and environment overrides on top of defaults.
    pub fn load(config_file: &Path) -> Result<Self> {
        let env_prefix = env_prefix();
        let built = Config::builder()
            .add_source(
                File::from(config_file)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(Environment::with_prefix(env_prefix.as_str()).separator("__"))
            .build()
            .with_context(|| format!("reading config from {}", config_file.display()))?;

        let mut config: AppConfig = built.try_deserialize().context("parsing config")?;
        config.expand_paths()?;
        Ok(config)
    }

    /// Expand `~` and `$VAR` in path settings.
    pub fn expand_paths(&mut self) -> Result<()> {
        self.container.data_root = expand_str_path(&self.container.data_root)?
            .display()
            .to_string();
        self.scaffold.source_dir = expand_str_path(&self.scaffold.source_dir)?
            .display()
            .to_string();
        if let Some(ref dir) = self.server.static_dir {
            self.server.static_dir = Some(expand_str_path(dir)?.display().to_string());
        }
        Ok(())
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

/// Environment variable prefix derived from the application name.
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
