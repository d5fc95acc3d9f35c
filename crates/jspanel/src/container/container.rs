//! Container types, configuration and CLI output parsing.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::error::{ContainerError, ContainerResult};

/// Deserialize a field that can be either a string or an integer (Unix timestamp).
/// Converts integers to string representation.
fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct StringOrInt;

    impl<'de> Visitor<'de> for StringOrInt {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or an integer")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(String::new())
        }
    }

    deserializer.deserialize_any(StringOrInt)
}

/// Docker prints `Names` as a comma separated string, podman as a list.
fn deserialize_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Names {
        List(Vec<String>),
        Joined(String),
        Missing(()),
    }

    Ok(match Names::deserialize(deserializer)? {
        Names::List(names) => names,
        Names::Joined(joined) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Names::Missing(()) => Vec::new(),
    })
}

/// Docker prints `Labels` as `k=v,k2=v2`, podman as an object (or null).
fn deserialize_labels<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Labels {
        Map(BTreeMap<String, String>),
        Joined(String),
        Missing(()),
    }

    Ok(match Labels::deserialize(deserializer)? {
        Labels::Map(map) => map,
        Labels::Joined(joined) => joined
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect(),
        Labels::Missing(()) => BTreeMap::new(),
    })
}

/// Configuration for creating a new container.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name.
    pub name: Option<String>,
    /// Docker/OCI image to use.
    pub image: String,
    /// Command to run.
    pub command: Vec<String>,
    /// Environment variables, in order.
    pub env: Vec<(String, String)>,
    /// Bind mounts as `host:container[:opts]`, passed through verbatim.
    pub binds: Vec<String>,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// Labels for the container.
    pub labels: BTreeMap<String, String>,
    /// Allocate a TTY.
    pub tty: bool,
}

impl ContainerConfig {
    /// Create a new container config with the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Validate all container configuration fields.
    ///
    /// This should be called before creating a container to ensure all inputs
    /// are safe and well-formed.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;

        if let Some(ref name) = self.name {
            validate_container_name(name)?;
        }

        for (key, _) in &self.env {
            validate_env_var_key(key)?;
        }

        for bind in &self.binds {
            let mut parts = bind.splitn(3, ':');
            let host = parts.next().unwrap_or_default();
            validate_volume_path(host, "host")?;
            match parts.next() {
                Some(container) => validate_container_path(container)?,
                None => {
                    return Err(ContainerError::InvalidInput(format!(
                        "bind '{}' has no container path",
                        bind
                    )));
                }
            }
        }

        for key in self.labels.keys() {
            validate_label_key(key)?;
        }

        if let Some(ref workdir) = self.workdir {
            validate_container_path(workdir)?;
        }

        Ok(())
    }

    /// Set the container name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the command to run.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Set an environment variable, replacing an earlier value for the same key.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Add raw `KEY=VALUE` entries as reported by `inspect`.
    pub fn env_entries<'a>(mut self, entries: impl IntoIterator<Item = &'a String>) -> Self {
        for entry in entries {
            let (key, value) = split_env_entry(entry);
            self = self.env(key, value);
        }
        self
    }

    /// Add a bind mount of `host` at `container`.
    pub fn volume(mut self, host_path: impl AsRef<str>, container_path: impl AsRef<str>) -> Self {
        self.binds
            .push(format!("{}:{}", host_path.as_ref(), container_path.as_ref()));
        self
    }

    /// Add bind mounts verbatim.
    pub fn binds(mut self, binds: impl IntoIterator<Item = String>) -> Self {
        self.binds.extend(binds);
        self
    }

    /// Set the working directory.
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Replace all labels.
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// Split an env entry at the first `=`.
pub fn split_env_entry(entry: &str) -> (&str, &str) {
    entry.split_once('=').unwrap_or((entry, ""))
}

/// Container state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Container is being created.
    Created,
    /// Container is running.
    Running,
    /// Container is paused.
    Paused,
    /// Container is restarting.
    Restarting,
    /// Container is being removed.
    Removing,
    /// Container has exited.
    Exited,
    /// Container is dead.
    Dead,
    /// Unknown state.
    #[default]
    #[serde(other)]
    Unknown,
}

impl ContainerState {
    /// Parse a runtime status string (`running`, `Exited`, ...).
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ContainerState::Created,
            "running" | "up" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" | "stopped" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Container summary from `ps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    /// Container ID.
    #[serde(alias = "Id", alias = "ID")]
    pub id: String,

    /// Container names.
    #[serde(default, deserialize_with = "deserialize_names")]
    pub names: Vec<String>,

    /// Image used.
    #[serde(default)]
    pub image: String,

    /// Container state.
    #[serde(default)]
    pub state: ContainerState,

    /// Status string (e.g., "Up 5 minutes").
    #[serde(default)]
    pub status: String,

    /// Creation timestamp (can be string or Unix timestamp integer from podman).
    #[serde(default, deserialize_with = "deserialize_string_or_int")]
    pub created: String,

    /// Labels.
    #[serde(default, deserialize_with = "deserialize_labels")]
    pub labels: BTreeMap<String, String>,
}

impl Container {
    /// First name without the leading `/` docker adds.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }
}

/// Parse `ps --format json` output.
///
/// Podman prints one JSON array, docker prints one object per line.
pub fn parse_ps_output(stdout: &str) -> ContainerResult<Vec<Container>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(vec![]);
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| ContainerError::Parse(e.to_string()));
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| ContainerError::Parse(e.to_string()))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    image: Option<String>,
    env: Option<Vec<String>>,
    labels: Option<HashMap<String, String>>,
    working_dir: Option<String>,
    cmd: Option<Vec<String>>,
    tty: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectHostConfig {
    binds: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    image_name: Option<String>,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    host_config: InspectHostConfig,
}

/// Full container record from `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContainerRecord {
    pub id: String,
    /// Display name, without the leading `/`.
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: BTreeMap<String, String>,
    /// Raw `KEY=VALUE` entries in runtime order.
    pub env: Vec<String>,
    /// Raw bind specs in runtime order.
    pub binds: Vec<String>,
    pub working_dir: Option<String>,
    pub command: Vec<String>,
    pub tty: bool,
}

impl ContainerRecord {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Value of an env key, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (k, v) = split_env_entry(entry);
            (k == key).then_some(v)
        })
    }
}

impl From<InspectOutput> for ContainerRecord {
    fn from(raw: InspectOutput) -> Self {
        let image = raw
            .config
            .image
            .filter(|i| !i.is_empty())
            .or(raw.image_name)
            .unwrap_or_default();
        Self {
            id: raw.id,
            name: raw.name.trim_start_matches('/').to_string(),
            image,
            state: ContainerState::from_status(&raw.state.status),
            labels: raw.config.labels.unwrap_or_default().into_iter().collect(),
            env: raw.config.env.unwrap_or_default(),
            binds: raw.host_config.binds.unwrap_or_default(),
            working_dir: raw.config.working_dir.filter(|w| !w.is_empty()),
            command: raw.config.cmd.unwrap_or_default(),
            tty: raw.config.tty,
        }
    }
}

/// Parse `inspect` output (a JSON array with one object per container).
pub fn parse_inspect_output(stdout: &str) -> ContainerResult<Option<ContainerRecord>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let records: Vec<InspectOutput> =
        serde_json::from_str(trimmed).map_err(|e| ContainerError::Parse(e.to_string()))?;
    Ok(records.into_iter().next().map(ContainerRecord::from))
}

// ============================================================================
// Input Validation Functions
// ============================================================================

/// Validate a Docker/OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
/// Valid characters: alphanumeric, `.`, `-`, `_`, `/`, `:`, `@`
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };

    if !image.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{}' contains invalid characters; only alphanumeric, '.', '-', '_', '/', ':', '@' are allowed",
            image
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container name.
///
/// Names start with an alphanumeric character and contain only alphanumerics,
/// `-`, `_` and `.`. They double as legacy data directory names.
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "container name cannot be empty".to_string(),
        ));
    };

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(
            "container name exceeds maximum length of 128 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphanumeric() {
        return Err(ContainerError::InvalidInput(
            "container name must start with an alphanumeric character".to_string(),
        ));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !name.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "container name '{}' contains invalid characters; only alphanumeric, '-', '_', '.' are allowed",
            name
        )));
    }

    Ok(())
}

/// Validate an environment variable key.
///
/// Environment variable names should follow POSIX conventions:
/// alphanumeric and underscores, starting with a letter or underscore.
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    let Some(first_char) = key.chars().next() else {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    };

    if key.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "environment variable key exceeds maximum length of 256 characters".to_string(),
        ));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    let valid_chars = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid_chars) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters; only alphanumeric and '_' are allowed",
            key
        )));
    }

    Ok(())
}

fn validate_label_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
        return Err(ContainerError::InvalidInput(format!(
            "invalid label key '{}'",
            key
        )));
    }
    Ok(())
}

/// Validate a volume path (host or container side).
fn validate_volume_path(path: &str, side: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(format!(
            "{} volume path cannot be empty",
            side
        )));
    }

    if path.len() > 4096 {
        return Err(ContainerError::InvalidInput(format!(
            "{} volume path exceeds maximum length of 4096 characters",
            side
        )));
    }

    if path.contains('\0') {
        return Err(ContainerError::InvalidInput(format!(
            "{} volume path cannot contain null bytes",
            side
        )));
    }

    let dangerous_chars = [
        '$', '`', '!', '&', '|', ';', '<', '>', '(', ')', '{', '}', '[', ']', '*', '?', '\\', '"',
        '\'', '\n', '\r',
    ];
    for c in dangerous_chars.iter() {
        if path.contains(*c) {
            return Err(ContainerError::InvalidInput(format!(
                "{} volume path contains dangerous character '{}'",
                side, c
            )));
        }
    }

    Ok(())
}

/// Validate a container-internal path.
fn validate_container_path(path: &str) -> ContainerResult<()> {
    if path.is_empty() {
        return Err(ContainerError::InvalidInput(
            "container path cannot be empty".to_string(),
        ));
    }

    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(
            "container path must be absolute (start with '/')".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(ContainerError::InvalidInput(
            "container path cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}


#[cfg(test)]
mod parse_tests {
    use super::*;

    #[test]
    fn test_parse_ps_docker_json_lines() {
        let stdout = r#"{"ID":"abc123","Names":"demo","Image":"node:20","State":"running","Status":"Up 2 minutes","Labels":"panel.kind=js-panel,panel.container-id=20240101-abcdefgh"}
{"ID":"def456","Names":"old","Image":"node:18","State":"exited","Status":"Exited (0)","Labels":""}"#;
        let containers = parse_ps_output(stdout).unwrap();
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].display_name(), "demo");
        assert_eq!(containers[0].state, ContainerState::Running);
        assert_eq!(
            containers[0].labels.get("panel.container-id").map(String::as_str),
            Some("20240101-abcdefgh")
        );
        assert!(containers[1].labels.is_empty());
    }

    #[test]
    fn test_parse_ps_podman_array() {
        let stdout = r#"[{"Id":"abc","Names":["demo"],"Image":"docker.io/library/node:20","State":"exited","Created":1700000000,"Labels":null}]"#;
        let containers = parse_ps_output(stdout).unwrap();
        assert_eq!(containers[0].names, vec!["demo"]);
        assert_eq!(containers[0].created, "1700000000");
        assert_eq!(containers[0].state, ContainerState::Exited);
    }

    #[test]
    fn test_parse_ps_empty() {
        assert!(parse_ps_output("  \n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_inspect_docker() {
        let stdout = r#"[{
            "Id": "abc123",
            "Name": "/demo",
            "State": {"Status": "running", "Running": true},
            "HostConfig": {"Binds": ["/opt/js-data/demo:/home/container"]},
            "Config": {
                "Image": "node:20",
                "Env": ["STARTUP_CMD=node run.js", "CF_TOKEN=", "PATH=/usr/bin"],
                "Labels": {"panel.kind": "js-panel"},
                "WorkingDir": "/home/container",
                "Cmd": ["bash", "/home/container/entrypoint.sh"],
                "Tty": true
            }
        }]"#;
        let record = parse_inspect_output(stdout).unwrap().unwrap();
        assert_eq!(record.name, "demo");
        assert_eq!(record.state, ContainerState::Running);
        assert_eq!(record.binds, vec!["/opt/js-data/demo:/home/container"]);
        assert_eq!(record.env_value("STARTUP_CMD"), Some("node run.js"));
        assert_eq!(record.env_value("CF_TOKEN"), Some(""));
        assert_eq!(record.env_value("MISSING"), None);
        assert_eq!(record.label("panel.kind"), Some("js-panel"));
        assert_eq!(record.working_dir.as_deref(), Some("/home/container"));
        assert!(record.tty);
    }

    #[test]
    fn test_parse_inspect_null_fields() {
        let stdout = r#"[{"Id":"x","Name":"legacy","ImageName":"node:18","Config":{"Env":null,"Labels":null,"Cmd":null},"HostConfig":{"Binds":null}}]"#;
        let record = parse_inspect_output(stdout).unwrap().unwrap();
        assert_eq!(record.image, "node:18");
        assert!(record.env.is_empty());
        assert!(record.binds.is_empty());
        assert!(record.labels.is_empty());
        assert_eq!(record.state, ContainerState::Unknown);
    }

    #[test]
    fn test_split_env_entry_first_equals() {
        assert_eq!(split_env_entry("A=b=c"), ("A", "b=c"));
        assert_eq!(split_env_entry("FLAG"), ("FLAG", ""));
    }
}
