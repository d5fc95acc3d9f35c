//! Shared handler state.

use std::sync::Arc;

use jspanel_files::ToolRunner;

use crate::auth::{AuthError, AuthState};
use crate::config::AppConfig;
use crate::container::ContainerRuntimeApi;
use crate::datadir::DataDirResolver;
use crate::files::FileOperator;
use crate::lifecycle::LifecycleController;
use crate::logs::LogBridge;
use crate::scaffold::Scaffold;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: LifecycleController,
    pub files: FileOperator,
    pub logs: LogBridge,
    pub auth: AuthState,
    /// Allowed CORS origins.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(
        lifecycle: LifecycleController,
        files: FileOperator,
        logs: LogBridge,
        auth: AuthState,
    ) -> Self {
        Self {
            lifecycle,
            files,
            logs,
            auth,
            allowed_origins: Vec::new(),
        }
    }

    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    /// Wire every service from config on top of a runtime and a tool runner.
    pub fn from_config(
        config: &AppConfig,
        runtime: Arc<dyn ContainerRuntimeApi>,
        tools: Arc<dyn ToolRunner>,
    ) -> Result<Self, AuthError> {
        let scaffold = Scaffold::new(&config.scaffold.source_dir, config.scaffold.heartbeat_secs);
        let resolver =
            DataDirResolver::new(runtime.clone(), &config.container.data_root, scaffold);

        let lifecycle =
            LifecycleController::new(runtime.clone(), resolver.clone(), config.container.clone());
        let files = FileOperator::new(resolver, tools)
            .with_max_upload_size(config.server.max_upload_size_bytes());
        let logs = LogBridge::new(runtime, config.logs.tail_lines);
        let auth = AuthState::new(config.auth.clone())?;

        Ok(Self::new(lifecycle, files, logs, auth)
            .with_allowed_origins(config.server.allowed_origins.clone()))
    }
}
