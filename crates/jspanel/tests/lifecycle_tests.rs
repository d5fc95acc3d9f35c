//! Lifecycle, resolver and log bridge tests against an in-memory runtime.

mod common;

use std::collections::BTreeMap;

use jspanel::PanelError;
use jspanel::container::{ContainerRecord, ContainerState};
use jspanel::datadir::{
    ContainerOwnership, LABEL_CONTAINER_ID, LABEL_DATA_DIR, LABEL_KIND, PANEL_KIND,
};
use jspanel::lifecycle::{Action, CreateRequest, MigrationOutcome, SettingsUpdate};
use jspanel::scaffold::{ENTRY_FILE, ENTRYPOINT, MANIFEST};

use common::{legacy_record, test_env};

fn managed_record(name: &str, logical_id: &str, data_dir: &std::path::Path) -> ContainerRecord {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_KIND.to_string(), PANEL_KIND.to_string());
    labels.insert(LABEL_CONTAINER_ID.to_string(), logical_id.to_string());
    labels.insert(LABEL_DATA_DIR.to_string(), data_dir.display().to_string());
    ContainerRecord {
        id: format!("id-{name}"),
        name: name.to_string(),
        image: "node:20".to_string(),
        state: ContainerState::Running,
        labels,
        env: vec!["STARTUP_CMD=node run.js".to_string()],
        binds: vec![format!("{}:/home/container", data_dir.display())],
        working_dir: Some("/home/container".to_string()),
        command: vec!["bash".to_string(), "/home/container/entrypoint.sh".to_string()],
        tty: true,
    }
}

#[tokio::test]
async fn resolver_returns_labelled_dir_unchanged() {
    let env = test_env();
    let dir = env.data_root.join("elsewhere");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("app.js"), "console.log(1)").unwrap();
    env.runtime.insert(managed_record("web", "20260101000000-abcd1234", &dir));

    let resolved = env.resolver.resolve("web").await.unwrap();
    assert_eq!(resolved.path, dir);
    assert!(resolved.provisioned.is_none());
    assert!(matches!(
        resolved.ownership,
        ContainerOwnership::Managed { ref logical_id, .. } if logical_id == "20260101000000-abcd1234"
    ));

    // Nothing was scaffolded into it.
    let mut names: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["app.js"]);
    assert!(!env.data_root.join("web").exists());
}

#[tokio::test]
async fn resolver_creates_and_provisions_legacy_dir_once() {
    let env = test_env();
    env.runtime.insert(legacy_record("old", &env.data_root));

    let first = env.resolver.resolve("old").await.unwrap();
    assert_eq!(first.path, env.data_root.join("old"));
    assert!(first.provisioned.is_some());
    assert!(matches!(first.ownership, ContainerOwnership::Legacy { .. }));
    assert!(first.path.join(ENTRYPOINT).is_file());
    assert!(first.path.join(ENTRY_FILE).is_file());
    assert!(first.path.join(MANIFEST).is_file());

    std::fs::write(first.path.join(ENTRY_FILE), "custom").unwrap();
    let second = env.resolver.resolve("old").await.unwrap();
    assert_eq!(second.path, first.path);
    assert!(second.provisioned.is_none());
    assert_eq!(
        std::fs::read_to_string(second.path.join(ENTRY_FILE)).unwrap(),
        "custom"
    );
}

#[tokio::test]
async fn resolver_falls_back_when_labelled_dir_is_gone() {
    let env = test_env();
    let missing = env.data_root.join("vanished");
    env.runtime.insert(managed_record("web", "x", &missing));

    let resolved = env.resolver.resolve("web").await.unwrap();
    assert_eq!(resolved.path, env.data_root.join("web"));
    assert!(!missing.exists());
}

#[tokio::test]
async fn resolver_rejects_names_escaping_root() {
    let env = test_env();
    let err = env.resolver.resolve("..").await.unwrap_err();
    assert!(matches!(err, PanelError::InvalidPath(_)));
    assert!(env.resolver.legacy_path("a/b").is_err());
}

#[tokio::test]
async fn create_builds_managed_container() {
    let env = test_env();
    env.runtime.remove_image("node:20");

    let handle = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            startup_cmd: None,
            tunnel_enabled: false,
            tunnel_token: None,
        })
        .await
        .unwrap();

    assert_eq!(handle.data_dir, env.data_root.join("demo"));
    assert!(handle.data_dir.join(ENTRYPOINT).is_file());
    assert!(handle.data_dir.join(ENTRY_FILE).is_file());

    let record = env.runtime.record("demo").unwrap();
    assert_eq!(record.state, ContainerState::Running);
    assert_eq!(record.label(LABEL_KIND), Some(PANEL_KIND));
    assert_eq!(record.label(LABEL_CONTAINER_ID), Some(handle.logical_id.as_str()));
    assert_eq!(
        record.label(LABEL_DATA_DIR),
        Some(handle.data_dir.display().to_string().as_str())
    );
    assert_eq!(record.env_value("STARTUP_CMD"), Some("node run.js"));
    assert_eq!(record.env_value("CF_TUNNEL_ENABLE"), Some("0"));
    assert_eq!(record.env_value("CF_TOKEN"), Some(""));
    assert_eq!(record.env_value("CONTAINER_ID"), Some(handle.logical_id.as_str()));
    assert_eq!(
        record.binds,
        vec![format!("{}:/home/container", handle.data_dir.display())]
    );
    assert!(record.tty);
    assert!(env.runtime.calls().contains(&"pull node:20".to_string()));
}

#[tokio::test]
async fn create_conflicts_with_existing_name() {
    let env = test_env();
    env.runtime.insert(legacy_record("taken", &env.data_root));

    let err = env
        .lifecycle
        .create(CreateRequest {
            name: "taken".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::Conflict(_)));
    assert!(!env.runtime.calls().iter().any(|c| c.starts_with("create")));
}

#[tokio::test]
async fn create_rejects_bad_name() {
    let env = test_env();
    let err = env
        .lifecycle
        .create(CreateRequest {
            name: "bad name".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::InvalidInput(_)));
}

#[tokio::test]
async fn delete_keeps_data_directory() {
    let env = test_env();
    let handle = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    std::fs::write(handle.data_dir.join("notes.txt"), "keep me").unwrap();

    env.lifecycle.transition("demo", Action::Delete).await.unwrap();

    assert!(env.runtime.record("demo").is_none());
    assert_eq!(
        std::fs::read_to_string(handle.data_dir.join("notes.txt")).unwrap(),
        "keep me"
    );
}

#[tokio::test]
async fn recreate_after_delete_keeps_user_files() {
    let env = test_env();
    let install = std::path::PathBuf::from(&env.config.scaffold.source_dir);
    std::fs::write(install.join(ENTRY_FILE), "installer default").unwrap();
    std::fs::write(install.join("tunnel-on.sh"), "installer tunnel").unwrap();

    let first = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(first.data_dir.join(ENTRY_FILE)).unwrap(),
        "installer default"
    );
    std::fs::write(first.data_dir.join(ENTRY_FILE), "USER CODE").unwrap();
    std::fs::write(first.data_dir.join("tunnel-on.sh"), "my tunnel").unwrap();

    env.lifecycle.transition("demo", Action::Delete).await.unwrap();
    let second = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(second.data_dir, first.data_dir);
    assert_ne!(second.logical_id, first.logical_id);
    assert_eq!(
        std::fs::read_to_string(second.data_dir.join(ENTRY_FILE)).unwrap(),
        "USER CODE"
    );
    assert_eq!(
        std::fs::read_to_string(second.data_dir.join("tunnel-on.sh")).unwrap(),
        "my tunnel"
    );
}

#[tokio::test]
async fn update_keeps_identity_and_files_of_managed_container() {
    let env = test_env();
    let handle = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    std::fs::write(handle.data_dir.join("state.bin"), [9u8, 8, 7, 0, 255]).unwrap();
    let before = snapshot(&handle.data_dir);

    let updated = env
        .lifecycle
        .update_settings(
            "demo",
            SettingsUpdate {
                startup_cmd: Some("custom cmd".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let vars = env.lifecycle.get_env("demo").await.unwrap();
    assert_eq!(vars.get("STARTUP_CMD"), Some("custom cmd"));
    assert_eq!(vars.get("CONTAINER_ID"), Some(handle.logical_id.as_str()));

    let record = env.runtime.record("demo").unwrap();
    assert_eq!(record.label(LABEL_CONTAINER_ID), Some(handle.logical_id.as_str()));
    assert_eq!(updated.logical_id, handle.logical_id);
    assert_eq!(updated.data_dir, handle.data_dir);
    assert_eq!(snapshot(&handle.data_dir), before);
}

/// File name to contents for every regular file directly under `dir`.
fn snapshot(dir: &std::path::Path) -> BTreeMap<String, Vec<u8>> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| {
            (
                e.file_name().into_string().unwrap(),
                std::fs::read(e.path()).unwrap(),
            )
        })
        .collect()
}

#[tokio::test]
async fn transition_passes_runtime_error_through() {
    let env = test_env();
    let err = env
        .lifecycle
        .transition("ghost", Action::Stop)
        .await
        .unwrap_err();
    match err {
        PanelError::Runtime { op, identity, .. } => {
            assert_eq!(op, "stop");
            assert_eq!(identity, "ghost");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err_message_contains(
        env.lifecycle.transition("ghost", Action::Start).await,
        "No such container"
    ));
}

fn err_message_contains<T>(result: Result<T, PanelError>, needle: &str) -> bool {
    match result {
        Err(e) => e.to_string().contains(needle),
        Ok(_) => false,
    }
}

#[tokio::test]
async fn update_migrates_legacy_container_in_place() {
    let env = test_env();
    env.runtime.insert(legacy_record("legacy", &env.data_root));
    let dir = env.data_root.join("legacy");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("data.bin"), [0u8, 1, 2, 3]).unwrap();

    let handle = env
        .lifecycle
        .update_settings(
            "legacy",
            SettingsUpdate {
                startup_cmd: Some("node app.js".to_string()),
                tunnel_enabled: None,
                tunnel_token: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(handle.data_dir, dir);
    assert_eq!(handle.logical_id, "legacy");
    assert_eq!(std::fs::read(dir.join("data.bin")).unwrap(), vec![0u8, 1, 2, 3]);

    let record = env.runtime.record("legacy").unwrap();
    assert_eq!(record.label(LABEL_DATA_DIR), Some(dir.display().to_string().as_str()));
    assert_eq!(record.label(LABEL_CONTAINER_ID), Some("legacy"));
    assert_eq!(record.label(LABEL_KIND), Some(PANEL_KIND));
    assert_eq!(record.env_value("STARTUP_CMD"), Some("node app.js"));
    assert_eq!(record.env_value("CF_TUNNEL_ENABLE"), Some("0"));
    assert_eq!(record.env_value("PATH"), Some("/usr/local/bin:/usr/bin"));
    assert_eq!(record.state, ContainerState::Running);
    assert_ne!(record.id, "legacy-legacy");
}

#[tokio::test]
async fn update_keeps_unspecified_settings() {
    let env = test_env();
    env.lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            startup_cmd: Some("npm start".to_string()),
            tunnel_enabled: true,
            tunnel_token: Some("tok".to_string()),
        })
        .await
        .unwrap();

    env.lifecycle
        .update_settings(
            "demo",
            SettingsUpdate {
                tunnel_enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let vars = env.lifecycle.get_env("demo").await.unwrap();
    assert_eq!(vars.get("STARTUP_CMD"), Some("npm start"));
    assert_eq!(vars.get("CF_TUNNEL_ENABLE"), Some("0"));
    assert_eq!(vars.get("CF_TOKEN"), Some("tok"));
}

#[tokio::test]
async fn failed_recreate_reports_intact_data_dir() {
    let env = test_env();
    env.runtime.insert(legacy_record("legacy", &env.data_root));
    env.runtime.fail_create("image pull backoff");

    let err = env
        .lifecycle
        .update_settings("legacy", SettingsUpdate::default())
        .await
        .unwrap_err();
    match err {
        PanelError::RecreateFailed { data_dir, message, .. } => {
            assert_eq!(data_dir, env.data_root.join("legacy"));
            assert!(message.contains("image pull backoff"));
            assert!(data_dir.is_dir());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(env.runtime.record("legacy").is_none());
}

#[tokio::test]
async fn update_unknown_container_is_not_found() {
    let env = test_env();
    let err = env
        .lifecycle
        .update_settings("ghost", SettingsUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::NotFound(_)));
}

#[tokio::test]
async fn migrate_labels_legacy_and_keeps_env() {
    let env = test_env();
    env.runtime.insert(legacy_record("legacy", &env.data_root));

    let outcome = env.lifecycle.migrate("legacy").await.unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            logical_id: "legacy".to_string(),
            data_dir: env.data_root.join("legacy"),
        }
    );

    let record = env.runtime.record("legacy").unwrap();
    assert!(record.label(LABEL_DATA_DIR).is_some());
    assert_eq!(record.env, legacy_record("legacy", &env.data_root).env);

    let again = env.lifecycle.migrate("legacy").await.unwrap();
    assert!(matches!(again, MigrationOutcome::AlreadyMigrated { .. }));
}

#[tokio::test]
async fn list_reports_ownership() {
    let env = test_env();
    env.runtime.insert(legacy_record("old", &env.data_root));
    env.lifecycle
        .create(CreateRequest {
            name: "new".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let summaries = env.lifecycle.list().await.unwrap();
    assert_eq!(summaries.len(), 2);
    for summary in summaries {
        match summary.container.display_name() {
            "old" => assert!(!summary.ownership.is_managed()),
            "new" => assert!(summary.ownership.is_managed()),
            other => panic!("unexpected container {other}"),
        }
    }
}

#[tokio::test]
async fn log_subscription_refused_for_unknown_container() {
    let env = test_env();
    let err = env.logs.subscribe("ghost").await.unwrap_err();
    assert!(matches!(err, PanelError::NotFound(_)));
    assert_eq!(env.runtime.logs_opened(), 0);
}

#[tokio::test]
async fn log_subscription_streams_chunks() {
    let env = test_env();
    env.runtime.insert(legacy_record("old", &env.data_root));
    env.runtime.set_log_chunks(vec!["booting\n", "listening on 3000\n"]);

    let mut sub = env.logs.subscribe("old").await.unwrap();
    assert_eq!(sub.identity(), "old");
    assert_eq!(sub.next_chunk().await.unwrap().as_ref(), b"booting\n");
    assert_eq!(sub.next_chunk().await.unwrap().as_ref(), b"listening on 3000\n");
    assert!(sub.next_chunk().await.is_none());
}

#[tokio::test]
async fn cancelled_subscription_ends() {
    let env = test_env();
    env.runtime.insert(legacy_record("old", &env.data_root));
    env.runtime.set_log_chunks(vec!["a", "b"]);

    let mut sub = env.logs.subscribe("old").await.unwrap();
    sub.cancel();
    assert!(sub.next_chunk().await.is_none());
    assert!(sub.cancellation_token().is_cancelled());
}

#[tokio::test]
async fn file_operator_is_scoped_to_data_dir() {
    let env = test_env();
    let handle = env
        .lifecycle
        .create(CreateRequest {
            name: "demo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    env.files
        .write("demo", "src/index.js", b"console.log('hi')")
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(handle.data_dir.join("src/index.js")).unwrap(),
        "console.log('hi')"
    );

    let listing = env.files.list("demo", "src").await.unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "index.js");

    assert!(env.files.read("demo", "../../etc/passwd").await.is_err());
    assert!(env.files.delete("demo", "").await.is_err());

    let err = env
        .files
        .compress("demo", "", &["src".to_string()], "src.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::ExternalTool { .. }));
}
