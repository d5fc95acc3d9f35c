//! Shared test fixtures: an in-memory container runtime and app builders.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use futures::stream;
use tempfile::TempDir;

use jspanel::api::{AppState, create_router};
use jspanel::auth::AuthConfig;
use jspanel::config::AppConfig;
use jspanel::container::{
    Container, ContainerConfig, ContainerError, ContainerRecord, ContainerResult,
    ContainerRuntimeApi, ContainerState, LogStream,
};
use jspanel::datadir::DataDirResolver;
use jspanel::files::FileOperator;
use jspanel::lifecycle::LifecycleController;
use jspanel::logs::LogBridge;
use jspanel::scaffold::Scaffold;
use jspanel_files::{FileResult, ToolOutput, ToolRunner};

pub const TEST_PASSWORD: &str = "correct horse";
pub const TEST_SECRET: &str = "test-secret-test-secret-test-secret!";

#[derive(Default)]
pub struct MockState {
    /// Records keyed by name.
    pub records: BTreeMap<String, ContainerRecord>,
    pub images: HashSet<String>,
    /// Every runtime call as `"<op> <target>"`.
    pub calls: Vec<String>,
    pub fail_create: Option<String>,
    pub fail_start: Option<String>,
    pub log_chunks: Vec<&'static str>,
    pub logs_opened: usize,
    next_id: u32,
}

/// In-memory stand-in for the docker/podman CLI.
#[derive(Default)]
pub struct MockRuntime {
    pub state: Mutex<MockState>,
}

fn no_such(id: &str) -> ContainerError {
    ContainerError::CommandFailed {
        command: "inspect".to_string(),
        message: format!("Error: No such container: {id}"),
    }
}

impl MockRuntime {
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime
            .state
            .lock()
            .unwrap()
            .images
            .insert("node:20".to_string());
        Arc::new(runtime)
    }

    /// Insert a record as if some other tool had created it.
    pub fn insert(&self, record: ContainerRecord) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(record.name.clone(), record);
    }

    pub fn record(&self, name: &str) -> Option<ContainerRecord> {
        self.state.lock().unwrap().records.get(name).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn logs_opened(&self) -> usize {
        self.state.lock().unwrap().logs_opened
    }

    pub fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().fail_create = Some(message.to_string());
    }

    pub fn set_log_chunks(&self, chunks: Vec<&'static str>) {
        self.state.lock().unwrap().log_chunks = chunks;
    }

    pub fn remove_image(&self, image: &str) {
        self.state.lock().unwrap().images.remove(image);
    }

    fn key_for(state: &MockState, id_or_name: &str) -> Option<String> {
        if state.records.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        state
            .records
            .iter()
            .find(|(_, r)| r.id == id_or_name)
            .map(|(k, _)| k.clone())
    }

    fn set_state(&self, op: &str, id: &str, new_state: ContainerState) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op} {id}"));
        if op == "start"
            && let Some(message) = state.fail_start.clone()
        {
            return Err(ContainerError::CommandFailed {
                command: op.to_string(),
                message,
            });
        }
        let key = Self::key_for(&state, id).ok_or_else(|| no_such(id))?;
        if let Some(record) = state.records.get_mut(&key) {
            record.state = new_state;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntimeApi for MockRuntime {
    async fn list_containers(&self, _all: bool) -> ContainerResult<Vec<Container>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .values()
            .map(|r| Container {
                id: r.id.clone(),
                names: vec![format!("/{}", r.name)],
                image: r.image.clone(),
                state: r.state,
                status: r.state.to_string(),
                created: String::new(),
                labels: r.labels.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id_or_name: &str) -> ContainerResult<Option<ContainerRecord>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("inspect {id_or_name}"));
        Ok(Self::key_for(&state, id_or_name).and_then(|k| state.records.get(&k).cloned()))
    }

    async fn create_container(&self, config: &ContainerConfig) -> ContainerResult<String> {
        config.validate()?;
        let mut state = self.state.lock().unwrap();
        let name = config.name.clone().unwrap_or_default();
        state.calls.push(format!("create {name}"));

        if let Some(message) = state.fail_create.clone() {
            return Err(ContainerError::CommandFailed {
                command: "create".to_string(),
                message,
            });
        }
        if state.records.contains_key(&name) {
            return Err(ContainerError::CommandFailed {
                command: "create".to_string(),
                message: format!("name \"{name}\" is already in use"),
            });
        }

        state.next_id += 1;
        let id = format!("mock{:04}", state.next_id);
        let record = ContainerRecord {
            id: id.clone(),
            name: name.clone(),
            image: config.image.clone(),
            state: ContainerState::Created,
            labels: config.labels.clone(),
            env: config
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            binds: config.binds.clone(),
            working_dir: config.workdir.clone(),
            command: config.command.clone(),
            tty: config.tty,
        };
        state.records.insert(name, record);
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> ContainerResult<()> {
        self.set_state("start", container_id, ContainerState::Running)
    }

    async fn stop_container(
        &self,
        container_id: &str,
        _timeout_secs: Option<u32>,
    ) -> ContainerResult<()> {
        self.set_state("stop", container_id, ContainerState::Exited)
    }

    async fn restart_container(
        &self,
        container_id: &str,
        _timeout_secs: Option<u32>,
    ) -> ContainerResult<()> {
        self.set_state("restart", container_id, ContainerState::Running)
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove {container_id}"));
        let key = Self::key_for(&state, container_id).ok_or_else(|| no_such(container_id))?;
        state.records.remove(&key);
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("pull {image}"));
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn stream_logs(&self, container_id: &str, _tail: u32) -> ContainerResult<LogStream> {
        let mut state = self.state.lock().unwrap();
        Self::key_for(&state, container_id).ok_or_else(|| no_such(container_id))?;
        state.logs_opened += 1;
        let chunks: Vec<std::io::Result<Bytes>> = state
            .log_chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Tool runner that never finds its tools.
pub struct NoTools;

#[async_trait]
impl ToolRunner for NoTools {
    async fn run_tool(&self, cmd: &str, _args: &[String], _cwd: &Path) -> FileResult<ToolOutput> {
        Ok(ToolOutput {
            stdout: Vec::new(),
            stderr: format!("{cmd}: not installed"),
            exit_code: Some(127),
        })
    }
}

/// A legacy record: no ownership labels, bind on `<root>/<name>`.
pub fn legacy_record(name: &str, data_root: &Path) -> ContainerRecord {
    ContainerRecord {
        id: format!("legacy-{name}"),
        name: name.to_string(),
        image: "node:20".to_string(),
        state: ContainerState::Running,
        labels: BTreeMap::new(),
        env: vec![
            "PATH=/usr/local/bin:/usr/bin".to_string(),
            "STARTUP_CMD=node old.js".to_string(),
            "CF_TUNNEL_ENABLE=0".to_string(),
        ],
        binds: vec![format!("{}:/home/container", data_root.join(name).display())],
        working_dir: Some("/home/container".to_string()),
        command: vec![
            "bash".to_string(),
            "/home/container/entrypoint.sh".to_string(),
        ],
        tty: true,
    }
}

pub struct TestEnv {
    pub runtime: Arc<MockRuntime>,
    pub lifecycle: LifecycleController,
    pub resolver: DataDirResolver,
    pub files: FileOperator,
    pub logs: LogBridge,
    pub data_root: PathBuf,
    pub config: AppConfig,
    _root: TempDir,
}

pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.container.data_root = root.join("data").display().to_string();
    config.scaffold.source_dir = root.join("install").display().to_string();
    config.server.static_dir = None;
    config.auth = AuthConfig {
        password: Some(TEST_PASSWORD.to_string()),
        jwt_secret: Some(TEST_SECRET.to_string()),
        ..AuthConfig::default()
    };
    config
}

pub fn test_env() -> TestEnv {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("install")).unwrap();
    let config = test_config(root.path());
    let runtime = MockRuntime::new();

    let scaffold = Scaffold::new(&config.scaffold.source_dir, config.scaffold.heartbeat_secs);
    let resolver = DataDirResolver::new(runtime.clone(), &config.container.data_root, scaffold);
    let lifecycle =
        LifecycleController::new(runtime.clone(), resolver.clone(), config.container.clone());
    let files = FileOperator::new(resolver.clone(), Arc::new(NoTools));
    let logs = LogBridge::new(runtime.clone(), config.logs.tail_lines);

    TestEnv {
        data_root: PathBuf::from(&config.container.data_root),
        runtime,
        lifecycle,
        resolver,
        files,
        logs,
        config,
        _root: root,
    }
}

/// Router over a mock runtime.
pub fn test_app() -> (Router, Arc<MockRuntime>, TempDir) {
    let root = TempDir::new().unwrap();
    std::fs::create_dir_all(root.path().join("install")).unwrap();
    let config = test_config(root.path());
    let runtime = MockRuntime::new();

    let state = AppState::from_config(&config, runtime.clone(), Arc::new(NoTools)).unwrap();
    (create_router(state, &config.server), runtime, root)
}
