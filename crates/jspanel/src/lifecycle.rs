//! Container lifecycle.
//!
//! Creation, state transitions, settings updates and legacy migration. Any
//! change to a container's configuration is applied by recreating it on the
//! same data directory: stop, remove, create, start. The directory is never
//! removed by any operation here.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::ser::SerializeMap;
use tracing::{debug, info, warn};

use crate::config::ContainerRuntimeConfig;
use crate::container::{
    Container, ContainerConfig, ContainerRecord, ContainerRuntimeApi, split_env_entry,
    validate_container_name,
};
use crate::datadir::{
    ContainerOwnership, DataDirResolver, LABEL_CONTAINER_ID, LABEL_DATA_DIR, LABEL_KIND,
    PANEL_KIND,
};
use crate::error::{PanelError, PanelResult};

pub const ENV_STARTUP_CMD: &str = "STARTUP_CMD";
pub const ENV_TUNNEL_ENABLE: &str = "CF_TUNNEL_ENABLE";
pub const ENV_TUNNEL_TOKEN: &str = "CF_TOKEN";
pub const ENV_CONTAINER_ID: &str = "CONTAINER_ID";

const RECOGNIZED_ENV: [&str; 4] = [
    ENV_STARTUP_CMD,
    ENV_TUNNEL_ENABLE,
    ENV_TUNNEL_TOKEN,
    ENV_CONTAINER_ID,
];

pub const DEFAULT_STARTUP_CMD: &str = "node run.js";

const LOGICAL_ID_ALPHABET: [char; 36] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's',
    't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

/// Generate a logical container ID: UTC timestamp plus a random suffix.
pub fn generate_logical_id() -> String {
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        nanoid::nanoid!(8, &LOGICAL_ID_ALPHABET)
    )
}

/// Parameters for [`LifecycleController::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: String,
    pub startup_cmd: Option<String>,
    pub tunnel_enabled: bool,
    pub tunnel_token: Option<String>,
}

/// A newly created container.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerHandle {
    pub logical_id: String,
    pub data_dir: PathBuf,
    pub runtime_id: String,
}

/// State transition applied to an existing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    /// Forced removal of the runtime object. The data directory stays.
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Delete => "delete",
        }
    }
}

impl FromStr for Action {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "restart" => Ok(Action::Restart),
            "delete" => Ok(Action::Delete),
            other => Err(PanelError::InvalidInput(format!("unknown action '{other}'"))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings change. `None` keeps the container's current value; an empty
/// `tunnel_token` clears the token.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub startup_cmd: Option<String>,
    pub tunnel_enabled: Option<bool>,
    pub tunnel_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyMigrated { logical_id: String, data_dir: PathBuf },
    Migrated { logical_id: String, data_dir: PathBuf },
}

/// A listed container with its ownership.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    #[serde(flatten)]
    pub container: Container,
    pub ownership: ContainerOwnership,
}

/// Container environment as ordered `KEY -> VALUE` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap(pub Vec<(String, String)>);

impl EnvMap {
    /// Build from raw `KEY=VALUE` entries. A repeated key keeps its first position
    /// and its last value.
    pub fn from_entries(entries: &[String]) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let (key, value) = split_env_entry(entry);
            match pairs.iter_mut().find(|(k, _)| k == key) {
                Some(pair) => pair.1 = value.to_string(),
                None => pairs.push((key.to_string(), value.to_string())),
            }
        }
        EnvMap(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }
}

impl Serialize for EnvMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Drives container lifecycles against the runtime.
#[derive(Clone)]
pub struct LifecycleController {
    runtime: Arc<dyn ContainerRuntimeApi>,
    resolver: DataDirResolver,
    config: ContainerRuntimeConfig,
}

impl LifecycleController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        resolver: DataDirResolver,
        config: ContainerRuntimeConfig,
    ) -> Self {
        Self {
            runtime,
            resolver,
            config,
        }
    }

    pub fn resolver(&self) -> &DataDirResolver {
        &self.resolver
    }

    /// All containers, running or not.
    pub async fn list(&self) -> PanelResult<Vec<ContainerSummary>> {
        let containers = self
            .runtime
            .list_containers(true)
            .await
            .map_err(|e| PanelError::runtime("list", "*", e))?;

        Ok(containers
            .into_iter()
            .map(|container| {
                let ownership =
                    ContainerOwnership::from_labels(&container.labels, container.display_name());
                ContainerSummary {
                    container,
                    ownership,
                }
            })
            .collect())
    }

    pub async fn inspect(&self, identity: &str) -> PanelResult<ContainerRecord> {
        self.runtime
            .inspect_container(identity)
            .await
            .map_err(|e| PanelError::runtime("inspect", identity, e))?
            .ok_or_else(|| PanelError::NotFound(identity.to_string()))
    }

    pub async fn get_env(&self, identity: &str) -> PanelResult<EnvMap> {
        let record = self.inspect(identity).await?;
        Ok(EnvMap::from_entries(&record.env))
    }

    /// Create and start a new container backed by `<data_root>/<name>`.
    pub async fn create(&self, request: CreateRequest) -> PanelResult<ContainerHandle> {
        let name = request.name.trim();
        validate_container_name(name).map_err(|e| PanelError::InvalidInput(e.to_string()))?;

        let existing = self
            .runtime
            .inspect_container(name)
            .await
            .map_err(|e| PanelError::runtime("inspect", name, e))?;
        if existing.is_some() {
            return Err(PanelError::Conflict(format!("container '{name}'")));
        }

        let logical_id = generate_logical_id();
        let resolved = self.resolver.resolve_record(name, None).await?;
        if resolved.provisioned.is_none() {
            // Directory left over from an earlier container of the same name.
            self.resolver.scaffold().provision(&resolved.path).await?;
        }
        let data_dir = resolved.path;

        let image = self.config.default_image.clone();
        self.ensure_image(&image, name).await?;

        let startup_cmd = non_empty(request.startup_cmd)
            .unwrap_or_else(|| DEFAULT_STARTUP_CMD.to_string());
        let token = request.tunnel_token.unwrap_or_default();

        let config = ContainerConfig::new(image)
            .name(name)
            .tty(true)
            .workdir(self.config.workdir.clone())
            .volume(data_dir.display().to_string(), &self.config.workdir)
            .env(ENV_STARTUP_CMD, startup_cmd)
            .env(ENV_TUNNEL_ENABLE, flag(request.tunnel_enabled))
            .env(ENV_TUNNEL_TOKEN, token)
            .env(ENV_CONTAINER_ID, &logical_id)
            .label(LABEL_KIND, PANEL_KIND)
            .label(LABEL_CONTAINER_ID, &logical_id)
            .label(LABEL_DATA_DIR, data_dir.display().to_string())
            .command(self.config.command.clone());

        let runtime_id = self
            .runtime
            .create_container(&config)
            .await
            .map_err(|e| PanelError::runtime("create", name, e))?;
        self.runtime
            .start_container(&runtime_id)
            .await
            .map_err(|e| PanelError::runtime("start", name, e))?;

        info!(identity = name, logical_id = %logical_id, data_dir = %data_dir.display(), "Created container");
        Ok(ContainerHandle {
            logical_id,
            data_dir,
            runtime_id,
        })
    }

    /// Apply a state transition. Runtime errors are passed through.
    pub async fn transition(&self, identity: &str, action: Action) -> PanelResult<()> {
        let op = action.as_str();
        let timeout = self.config.stop_timeout_secs;
        let result = match action {
            Action::Start => self.runtime.start_container(identity).await,
            Action::Stop => self.runtime.stop_container(identity, timeout).await,
            Action::Restart => self.runtime.restart_container(identity, timeout).await,
            Action::Delete => self.runtime.remove_container(identity, true).await,
        };
        result.map_err(|e| PanelError::runtime(op, identity, e))?;

        info!(identity, op, "Container transition applied");
        Ok(())
    }

    /// Change startup command or tunnel settings by recreating the container.
    ///
    /// Legacy containers pick up the ownership labels on the way.
    pub async fn update_settings(
        &self,
        identity: &str,
        update: SettingsUpdate,
    ) -> PanelResult<ContainerHandle> {
        let record = self.inspect(identity).await?;
        self.ensure_image(&record.image, identity).await?;
        let resolved = self.resolver.resolve_record(identity, Some(&record)).await?;
        let data_dir = resolved.path;

        let labels = self.migrated_labels(&record, &data_dir);
        let logical_id = logical_id_of(&labels, &record);
        let env = settings_env(&record.env, &update, &logical_id);

        let mut config = self.carried_config(&record, &data_dir, labels);
        config.env = env;

        let runtime_id = self.recreate(identity, &record, &config, &data_dir).await?;
        info!(identity, logical_id = %logical_id, data_dir = %data_dir.display(), "Updated container settings");
        Ok(ContainerHandle {
            logical_id,
            data_dir,
            runtime_id,
        })
    }

    /// Stamp ownership labels onto a legacy container.
    pub async fn migrate(&self, identity: &str) -> PanelResult<MigrationOutcome> {
        let record = self.inspect(identity).await?;

        if let ContainerOwnership::Managed {
            logical_id,
            data_dir,
        } = ContainerOwnership::from_labels(&record.labels, &record.name)
        {
            debug!(identity, "Container already carries ownership labels");
            return Ok(MigrationOutcome::AlreadyMigrated {
                logical_id,
                data_dir,
            });
        }

        self.ensure_image(&record.image, identity).await?;
        let resolved = self.resolver.resolve_record(identity, Some(&record)).await?;
        let data_dir = resolved.path;

        let labels = self.migrated_labels(&record, &data_dir);
        let logical_id = logical_id_of(&labels, &record);
        let config = self
            .carried_config(&record, &data_dir, labels)
            .env_entries(&record.env);

        self.recreate(identity, &record, &config, &data_dir).await?;
        info!(identity, logical_id = %logical_id, data_dir = %data_dir.display(), "Migrated legacy container");
        Ok(MigrationOutcome::Migrated {
            logical_id,
            data_dir,
        })
    }

    async fn ensure_image(&self, image: &str, identity: &str) -> PanelResult<()> {
        let present = self
            .runtime
            .image_exists(image)
            .await
            .map_err(|e| PanelError::runtime("image inspect", identity, e))?;
        if !present {
            info!(image, "Pulling image");
            self.runtime
                .pull_image(image)
                .await
                .map_err(|e| PanelError::runtime("pull", identity, e))?;
        }
        Ok(())
    }

    /// Labels for a recreated container. Adds the ownership labels a legacy
    /// record lacks and keeps everything else.
    fn migrated_labels(&self, record: &ContainerRecord, data_dir: &Path) -> BTreeMap<String, String> {
        let mut labels = record.labels.clone();
        if !labels.contains_key(LABEL_DATA_DIR) {
            labels.insert(LABEL_DATA_DIR.to_string(), data_dir.display().to_string());
            labels
                .entry(LABEL_CONTAINER_ID.to_string())
                .or_insert_with(|| record.name.clone());
            labels
                .entry(LABEL_KIND.to_string())
                .or_insert_with(|| PANEL_KIND.to_string());
        }
        labels
    }

    /// Config carrying over image, binds, working dir, command and tty.
    fn carried_config(
        &self,
        record: &ContainerRecord,
        data_dir: &Path,
        labels: BTreeMap<String, String>,
    ) -> ContainerConfig {
        let name = if record.name.is_empty() {
            record.id.clone()
        } else {
            record.name.clone()
        };

        let mut config = ContainerConfig::new(record.image.clone())
            .name(name)
            .tty(record.tty)
            .labels(labels);

        config = if record.binds.is_empty() {
            config.volume(data_dir.display().to_string(), &self.config.workdir)
        } else {
            config.binds(record.binds.iter().cloned())
        };

        config = config.workdir(
            record
                .working_dir
                .clone()
                .unwrap_or_else(|| self.config.workdir.clone()),
        );

        config.command(if record.command.is_empty() {
            self.config.command.clone()
        } else {
            record.command.clone()
        })
    }

    /// Stop, remove, create, start.
    ///
    /// Not atomic: if create or start fails the old object is already gone and
    /// the error names the intact data directory.
    async fn recreate(
        &self,
        identity: &str,
        record: &ContainerRecord,
        config: &ContainerConfig,
        data_dir: &Path,
    ) -> PanelResult<String> {
        let target = if record.id.is_empty() {
            identity
        } else {
            record.id.as_str()
        };

        if let Err(e) = self
            .runtime
            .stop_container(target, self.config.stop_timeout_secs)
            .await
        {
            debug!(identity, error = %e, "Stop before recreate failed, continuing");
        }

        self.runtime
            .remove_container(target, true)
            .await
            .map_err(|e| PanelError::runtime("remove", identity, e))?;

        let recreate_failed = |message: String| {
            warn!(identity, data_dir = %data_dir.display(), error = %message, "Recreate failed");
            PanelError::RecreateFailed {
                identity: identity.to_string(),
                data_dir: data_dir.to_path_buf(),
                message,
            }
        };

        let runtime_id = self
            .runtime
            .create_container(config)
            .await
            .map_err(|e| recreate_failed(e.to_string()))?;
        self.runtime
            .start_container(&runtime_id)
            .await
            .map_err(|e| recreate_failed(e.to_string()))?;

        Ok(runtime_id)
    }
}

fn logical_id_of(labels: &BTreeMap<String, String>, record: &ContainerRecord) -> String {
    labels
        .get(LABEL_CONTAINER_ID)
        .cloned()
        .unwrap_or_else(|| record.name.clone())
}

fn flag(enabled: bool) -> &'static str {
    if enabled { "1" } else { "0" }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Env for a settings update. Unrecognized entries are kept in order; the
/// recognized keys are rebuilt from the update, then the previous value,
/// then defaults.
fn settings_env(
    previous: &[String],
    update: &SettingsUpdate,
    logical_id: &str,
) -> Vec<(String, String)> {
    let prior = EnvMap::from_entries(previous);

    let mut env: Vec<(String, String)> = prior
        .0
        .iter()
        .filter(|(k, _)| !RECOGNIZED_ENV.contains(&k.as_str()))
        .cloned()
        .collect();

    let startup_cmd = non_empty(update.startup_cmd.clone())
        .or_else(|| non_empty(prior.get(ENV_STARTUP_CMD).map(str::to_string)))
        .unwrap_or_else(|| DEFAULT_STARTUP_CMD.to_string());
    let tunnel_enabled = update
        .tunnel_enabled
        .unwrap_or_else(|| prior.get(ENV_TUNNEL_ENABLE) == Some("1"));
    let token = update
        .tunnel_token
        .clone()
        .or_else(|| prior.get(ENV_TUNNEL_TOKEN).map(str::to_string))
        .unwrap_or_default();

    env.push((ENV_STARTUP_CMD.to_string(), startup_cmd));
    env.push((ENV_TUNNEL_ENABLE.to_string(), flag(tunnel_enabled).to_string()));
    env.push((ENV_TUNNEL_TOKEN.to_string(), token));
    env.push((ENV_CONTAINER_ID.to_string(), logical_id.to_string()));
    env
}
