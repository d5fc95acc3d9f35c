//! Data-directory resolution.
//!
//! Maps a container identity to the host directory bind-mounted into it.
//! Containers created by this panel carry the directory in a label; older
//! containers fall back to `<data_root>/<display-name>`.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::container::{ContainerRecord, ContainerRuntimeApi};
use crate::error::{PanelError, PanelResult};
use crate::scaffold::{ProvisionReport, Scaffold};

/// Marker label identifying containers owned by this panel.
pub const LABEL_KIND: &str = "panel.kind";
/// Stable logical ID, survives recreation.
pub const LABEL_CONTAINER_ID: &str = "panel.container-id";
/// Absolute host path of the data directory.
pub const LABEL_DATA_DIR: &str = "panel.data-dir";
/// Value of [`LABEL_KIND`].
pub const PANEL_KIND: &str = "js-panel";

/// How a container's data directory is owned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContainerOwnership {
    /// Directory and logical ID recorded in labels.
    Managed { logical_id: String, data_dir: PathBuf },
    /// Pre-label container, directory derived from the display name.
    Legacy { display_name: String },
}

impl ContainerOwnership {
    /// Derive ownership from a label set. The directory label is authoritative;
    /// a missing logical ID falls back to the display name.
    pub fn from_labels(labels: &BTreeMap<String, String>, display_name: &str) -> Self {
        match labels.get(LABEL_DATA_DIR).filter(|d| !d.is_empty()) {
            Some(dir) => ContainerOwnership::Managed {
                logical_id: labels
                    .get(LABEL_CONTAINER_ID)
                    .filter(|id| !id.is_empty())
                    .cloned()
                    .unwrap_or_else(|| display_name.to_string()),
                data_dir: PathBuf::from(dir),
            },
            None => ContainerOwnership::Legacy {
                display_name: display_name.to_string(),
            },
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, ContainerOwnership::Managed { .. })
    }
}

/// Result of a resolve.
#[derive(Debug, Clone)]
pub struct ResolvedDir {
    pub path: PathBuf,
    pub ownership: ContainerOwnership,
    /// Set when this resolve created the directory and ran a full provision.
    pub provisioned: Option<ProvisionReport>,
}

/// Resolves container identities to data directories.
#[derive(Clone)]
pub struct DataDirResolver {
    runtime: Arc<dyn ContainerRuntimeApi>,
    data_root: PathBuf,
    scaffold: Scaffold,
}

impl DataDirResolver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        data_root: impl Into<PathBuf>,
        scaffold: Scaffold,
    ) -> Self {
        Self {
            runtime,
            data_root: data_root.into(),
            scaffold,
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn scaffold(&self) -> &Scaffold {
        &self.scaffold
    }

    /// Directory a legacy container named `display_name` uses.
    pub fn legacy_path(&self, display_name: &str) -> PanelResult<PathBuf> {
        let mut components = Path::new(display_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => Ok(self.data_root.join(part)),
            _ => Err(PanelError::InvalidPath(format!(
                "'{display_name}' is not usable as a directory name"
            ))),
        }
    }

    /// Resolve `identity` to its data directory, looking the record up first.
    ///
    /// A record that cannot be fetched is treated as absent.
    pub async fn resolve(&self, identity: &str) -> PanelResult<ResolvedDir> {
        let record = match self.runtime.inspect_container(identity).await {
            Ok(record) => record,
            Err(e) => {
                warn!(identity, error = %e, "Inspect failed, resolving as legacy");
                None
            }
        };
        self.resolve_record(identity, record.as_ref()).await
    }

    /// Resolve using an already fetched record.
    pub async fn resolve_record(
        &self,
        identity: &str,
        record: Option<&ContainerRecord>,
    ) -> PanelResult<ResolvedDir> {
        if let Some(record) = record {
            let ownership = ContainerOwnership::from_labels(&record.labels, &record.name);
            if let ContainerOwnership::Managed { data_dir, .. } = &ownership
                && is_dir(data_dir).await
            {
                let path = data_dir.clone();
                return Ok(ResolvedDir {
                    path,
                    ownership,
                    provisioned: None,
                });
            }
        }

        let display_name = record
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(identity);
        let path = self.legacy_path(display_name)?;

        fs::create_dir_all(&self.data_root).await.map_err(|e| {
            PanelError::io(format!("creating {}", self.data_root.display()), e)
        })?;

        let provisioned = match fs::create_dir(&path).await {
            Ok(()) => {
                info!(identity, data_dir = %path.display(), "Created data directory");
                Some(self.scaffold.provision(&path).await?)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let report = self.scaffold.refresh(&path).await;
                debug!(identity, data_dir = %path.display(), copied = report.copied, "Refreshed data directory");
                None
            }
            Err(e) => {
                return Err(PanelError::io(format!("creating {}", path.display()), e));
            }
        };

        Ok(ResolvedDir {
            path,
            ownership: ContainerOwnership::Legacy {
                display_name: display_name.to_string(),
            },
            provisioned,
        })
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
