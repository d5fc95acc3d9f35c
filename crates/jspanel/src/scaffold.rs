//! Scaffold provisioning for fresh data directories.
//!
//! Helper scripts are copied from the installation root. When the boot
//! script or the application entry file is still missing afterwards, a
//! built-in version is written so the container always has something to run.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{PanelError, PanelResult};

pub const ENTRYPOINT: &str = "entrypoint.sh";
pub const ENTRY_FILE: &str = "run.js";
pub const MANIFEST: &str = "package.json";

struct HelperFile {
    name: &'static str,
    executable: bool,
    /// Re-copied on every resolve of an existing directory.
    always_refresh: bool,
}

const HELPER_FILES: &[HelperFile] = &[
    HelperFile {
        name: ENTRYPOINT,
        executable: true,
        always_refresh: true,
    },
    HelperFile {
        name: "tunnel-on.sh",
        executable: true,
        always_refresh: false,
    },
    HelperFile {
        name: "tunnel-off.sh",
        executable: true,
        always_refresh: false,
    },
    HelperFile {
        name: ENTRY_FILE,
        executable: false,
        always_refresh: false,
    },
];

const BOOT_SCRIPT: &str = r#"#!/bin/bash
cd "$(dirname "$0")" || exit 1

STARTUP_CMD="${STARTUP_CMD:-node run.js}"

if [ "${CF_TUNNEL_ENABLE:-0}" = "1" ] && [ -n "${CF_TOKEN:-}" ] && [ -f ./tunnel-on.sh ]; then
  bash ./tunnel-on.sh || echo "[entrypoint] tunnel failed to start" >&2
fi

echo "[entrypoint] starting: $STARTUP_CMD"
exec bash -c "$STARTUP_CMD"
"#;

const DEFAULT_PAYLOAD: &str = r#"// Default application. Replace this file or change STARTUP_CMD.
const started = new Date();
console.log(`[panel] application started at ${started.toISOString()}`);
console.log('[panel] edit run.js or set a startup command in the panel settings');

const timer = setInterval(() => {
  console.log(`[panel] heartbeat ${new Date().toISOString()}`);
}, __HEARTBEAT_MS__);

function shutdown(signal) {
  console.log(`[panel] received ${signal}, exiting`);
  clearInterval(timer);
  process.exit(0);
}

process.on('SIGTERM', () => shutdown('SIGTERM'));
process.on('SIGINT', () => shutdown('SIGINT'));
"#;

/// What a provisioning pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionReport {
    /// Helper files copied from the installation root.
    pub copied: usize,
    /// Helper files that were not copied, with the reason.
    pub skipped: Vec<String>,
    /// Whether the default application payload was written.
    pub synthesized: bool,
}

/// Populates data directories from the installation root.
#[derive(Debug, Clone)]
pub struct Scaffold {
    source_dir: PathBuf,
    heartbeat_secs: u64,
}

impl Scaffold {
    pub fn new(source_dir: impl Into<PathBuf>, heartbeat_secs: u64) -> Self {
        Self {
            source_dir: source_dir.into(),
            heartbeat_secs: heartbeat_secs.max(1),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Full provisioning of a freshly created directory.
    pub async fn provision(&self, dir: &Path) -> PanelResult<ProvisionReport> {
        let mut report = ProvisionReport::default();

        for helper in HELPER_FILES {
            self.copy_helper(helper, dir, &mut report).await;
        }

        let entrypoint = dir.join(ENTRYPOINT);
        if !exists(&entrypoint).await {
            info!(dir = %dir.display(), "Writing built-in boot script");
            fs::write(&entrypoint, BOOT_SCRIPT)
                .await
                .map_err(|e| PanelError::io(format!("writing {}", entrypoint.display()), e))?;
            set_executable(&entrypoint)
                .await
                .map_err(|e| PanelError::io(format!("chmod {}", entrypoint.display()), e))?;
        }

        if !exists(&dir.join(ENTRY_FILE)).await {
            match self.write_default_payload(dir).await {
                Ok(()) => report.synthesized = true,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to write default payload");
                    report.skipped.push(format!("{ENTRY_FILE}: {e}"));
                }
            }
        }

        debug!(
            dir = %dir.display(),
            copied = report.copied,
            skipped = report.skipped.len(),
            synthesized = report.synthesized,
            "Provisioned data directory"
        );
        Ok(report)
    }

    /// Re-copy the always-refresh helpers into an existing directory.
    pub async fn refresh(&self, dir: &Path) -> ProvisionReport {
        let mut report = ProvisionReport::default();
        for helper in HELPER_FILES.iter().filter(|h| h.always_refresh) {
            self.copy_helper(helper, dir, &mut report).await;
        }
        report
    }

    async fn copy_helper(&self, helper: &HelperFile, dir: &Path, report: &mut ProvisionReport) {
        let source = self.source_dir.join(helper.name);
        if !exists(&source).await {
            debug!(source = %source.display(), "Helper file not present, skipping");
            report.skipped.push(format!("{}: source missing", helper.name));
            return;
        }

        let target = dir.join(helper.name);
        if !helper.always_refresh && exists(&target).await {
            debug!(target = %target.display(), "Helper file already present, keeping it");
            report.skipped.push(format!("{}: already present", helper.name));
            return;
        }

        let result = async {
            fs::copy(&source, &target).await?;
            if helper.executable {
                set_executable(&target).await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        match result {
            Ok(()) => report.copied += 1,
            Err(e) => {
                warn!(file = helper.name, error = %e, "Failed to copy helper file");
                report.skipped.push(format!("{}: {e}", helper.name));
            }
        }
    }

    async fn write_default_payload(&self, dir: &Path) -> std::io::Result<()> {
        let manifest = dir.join(MANIFEST);
        if !exists(&manifest).await {
            let body = serde_json::json!({
                "name": "panel-app",
                "version": "1.0.0",
                "private": true,
                "main": ENTRY_FILE,
                "scripts": { "start": format!("node {ENTRY_FILE}") }
            });
            let text = serde_json::to_string_pretty(&body).map_err(std::io::Error::other)?;
            fs::write(&manifest, text + "\n").await?;
        }

        let payload = DEFAULT_PAYLOAD.replace(
            "__HEARTBEAT_MS__",
            &(self.heartbeat_secs * 1000).to_string(),
        );
        fs::write(dir.join(ENTRY_FILE), payload).await
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn set_executable(path: &Path) -> std::io::Result<()> {
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}
