mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::ENV_LOCK;
use fleetmon::constants::env as env_keys;
use fleetmon::errors::ProbeErrorKind;
use fleetmon::services::credentials::OsKind;
use fleetmon::services::logger::Logger;
use fleetmon::services::registry::{NewHost, Registry};
use fleetmon::services::security::Security;
use fleetmon::stores::memory_registry::HostStatus;

const TEST_KEY: &str = "8f2d1c0b9a483e5f6a7b8c9d0e1f2a3b4c5d6e7f8091a2b3c4d5e6f708192a3b";

fn new_host(name: &str) -> NewHost {
    NewHost {
        name: name.to_string(),
        address: format!("{}.example.net", name),
        os_kind: OsKind::Linux,
        username: "admin".to_string(),
        password: Some("hunter2".to_string()),
        key_path: None,
        port: None,
    }
}

fn registry_at(path: PathBuf) -> Registry {
    let security = Arc::new(Security::new().expect("security"));
    Registry::with_file_path(security, Logger::new("test"), path)
}

#[tokio::test]
async fn passwords_are_encrypted_at_rest() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");
    let registry = registry_at(path.clone());

    let record = registry.upsert_host(new_host("web-01")).expect("upsert");
    let stored = record.password_enc.expect("password_enc");
    assert_eq!(stored.split(':').count(), 3);

    let raw = std::fs::read_to_string(&path).expect("registry file");
    assert!(raw.contains("password_enc"));
    assert!(!raw.contains("hunter2"));

    let target = registry.resolve_target("web-01").expect("target");
    assert_eq!(target.password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn registry_reloads_hosts_from_disk() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");

    registry_at(path.clone())
        .upsert_host(new_host("db-01"))
        .expect("upsert");

    let reloaded = registry_at(path);
    reloaded.load_from_disk().expect("load");
    let record = reloaded.get_host("db-01").expect("record");
    assert_eq!(record.address, "db-01.example.net");
    let target = reloaded.resolve_target("db-01").expect("target");
    assert_eq!(target.password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn load_tolerates_a_missing_file() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(dir.path().join("absent.json"));

    registry.load_from_disk().expect("load");
    assert!(registry.list_hosts().is_empty());
}

#[tokio::test]
async fn upsert_without_password_keeps_the_stored_secret() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(dir.path().join("registry.json"));

    registry.upsert_host(new_host("web-01")).expect("upsert");
    let mut update = new_host("web-01");
    update.address = "10.1.2.3".to_string();
    update.password = None;
    registry.upsert_host(update).expect("update");

    let target = registry.resolve_target("web-01").expect("target");
    assert_eq!(target.address, "10.1.2.3");
    assert_eq!(target.password.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn record_status_tracks_last_seen() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(dir.path().join("registry.json"));

    registry.upsert_host(new_host("web-01")).expect("upsert");
    assert_eq!(
        registry.get_host("web-01").expect("record").status,
        HostStatus::Unknown
    );

    registry.record_status("web-01", true).expect("online");
    let record = registry.get_host("web-01").expect("record");
    assert_eq!(record.status, HostStatus::Online);
    let seen = record.last_seen.expect("last_seen");

    registry.record_status("web-01", false).expect("offline");
    let record = registry.get_host("web-01").expect("record");
    assert_eq!(record.status, HostStatus::Offline);
    assert_eq!(record.last_seen.as_deref(), Some(seen.as_str()));
}

#[tokio::test]
async fn remove_host_rewrites_the_file() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.json");
    let registry = registry_at(path.clone());

    registry.upsert_host(new_host("web-01")).expect("upsert");
    registry.upsert_host(new_host("db-01")).expect("upsert");

    assert!(registry.remove_host("web-01").expect("remove"));
    let raw = std::fs::read_to_string(&path).expect("registry file");
    assert!(!raw.contains("web-01"));
    assert!(raw.contains("db-01"));
    assert!(!registry.remove_host("ghost").expect("remove unknown"));
}

#[tokio::test]
async fn resolving_an_unknown_host_is_not_found() {
    let _guard = ENV_LOCK.lock().await;
    std::env::set_var(env_keys::ENCRYPTION_KEY, TEST_KEY);
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry_at(dir.path().join("registry.json"));

    let err = registry.resolve_target("ghost").expect_err("unknown host");
    assert_eq!(err.kind, ProbeErrorKind::NotFound);
}
