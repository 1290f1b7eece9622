use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::errors::ProbeError;
use crate::services::credentials::{HostTarget, OsKind};
use crate::services::logger::Logger;
use crate::services::security::Security;
use crate::stores::memory_registry::{HostRecord, HostStatus, MemoryRegistry};
use crate::utils::fs_atomic::atomic_write_text_file;
use crate::utils::paths::resolve_registry_path;

#[derive(Debug, Clone)]
pub struct NewHost {
    pub name: String,
    pub address: String,
    pub os_kind: OsKind,
    pub username: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone)]
pub struct Registry {
    inner: MemoryRegistry,
    security: Arc<Security>,
    logger: Logger,
    file_path: PathBuf,
    queue: Arc<Mutex<()>>,
}

impl Registry {
    pub fn new(security: Arc<Security>, logger: Logger) -> Self {
        Self::with_file_path(security, logger, resolve_registry_path())
    }

    pub fn with_file_path(security: Arc<Security>, logger: Logger, file_path: PathBuf) -> Self {
        Self {
            inner: MemoryRegistry::new(),
            security,
            logger,
            file_path,
            queue: Arc::new(Mutex::new(())),
        }
    }

    pub fn load_from_disk(&self) -> Result<(), ProbeError> {
        if !self.file_path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.file_path)
            .map_err(|err| ProbeError::internal(format!("Failed to load host registry: {}", err)))?;
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|err| ProbeError::internal(format!("Failed to parse host registry: {}", err)))?;
        let entries = parsed
            .get("hosts")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_else(|| parsed.as_array().cloned().unwrap_or_default());
        let records: Vec<HostRecord> = entries
            .iter()
            .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();
        self.inner.load(&records);
        self.logger.debug(
            &format!("Loaded {} hosts from registry", records.len()),
            None,
        );
        Ok(())
    }

    pub fn persist(&self) -> Result<(), ProbeError> {
        let payload = serde_json::json!({
            "version": 1,
            "updated_at": chrono::Utc::now().to_rfc3339(),
            "hosts": self.inner.list(),
        });
        let serialized = serde_json::to_string_pretty(&payload).map_err(|err| {
            ProbeError::internal(format!("Failed to serialize host registry: {}", err))
        })?;
        let _guard = self.queue.lock();
        atomic_write_text_file(&self.file_path, &format!("{}\n", serialized), 0o600).map_err(
            |err| ProbeError::internal(format!("Failed to persist host registry: {}", err)),
        )?;
        Ok(())
    }

    pub fn upsert_host(&self, spec: NewHost) -> Result<HostRecord, ProbeError> {
        let now = chrono::Utc::now().to_rfc3339();
        let existing = self.inner.get(&spec.name);
        let password_enc = match spec.password.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(password) => Some(self.security.encrypt(password)?),
            None => existing.as_ref().and_then(|rec| rec.password_enc.clone()),
        };
        let key_path = spec
            .key_path
            .filter(|p| !p.trim().is_empty())
            .or_else(|| existing.as_ref().and_then(|rec| rec.key_path.clone()));
        let record = HostRecord {
            name: spec.name.clone(),
            address: spec.address,
            os_kind: spec.os_kind,
            username: spec.username,
            password_enc,
            key_path,
            port: spec.port.or(existing.as_ref().and_then(|rec| rec.port)),
            status: existing
                .as_ref()
                .map(|rec| rec.status)
                .unwrap_or(HostStatus::Unknown),
            last_seen: existing.as_ref().and_then(|rec| rec.last_seen.clone()),
            created_at: existing
                .as_ref()
                .map(|rec| rec.created_at.clone())
                .unwrap_or_else(|| now.clone()),
            updated_at: now,
        };
        self.inner.upsert(record.clone());
        self.persist()?;
        self.logger.info(
            "Saved host entry",
            Some(&serde_json::json!({
                "host": record.name,
                "os": record.os_kind.as_str(),
            })),
        );
        Ok(record)
    }

    pub fn get_host(&self, name: &str) -> Option<HostRecord> {
        self.inner.get(name)
    }

    pub fn list_hosts(&self) -> Vec<HostRecord> {
        self.inner.list()
    }

    pub fn remove_host(&self, name: &str) -> Result<bool, ProbeError> {
        let removed = self.inner.forget(name);
        if removed {
            self.persist()?;
            self.logger
                .info("Removed host entry", Some(&serde_json::json!({"host": name})));
        }
        Ok(removed)
    }

    pub fn record_status(&self, name: &str, online: bool) -> Result<(), ProbeError> {
        let Some(mut record) = self.inner.get(name) else {
            return Ok(());
        };
        let now = chrono::Utc::now().to_rfc3339();
        record.status = if online {
            HostStatus::Online
        } else {
            HostStatus::Offline
        };
        if online {
            record.last_seen = Some(now.clone());
        }
        record.updated_at = now;
        self.inner.upsert(record);
        self.persist()
    }

    pub fn resolve_target(&self, name: &str) -> Result<HostTarget, ProbeError> {
        let record = self
            .inner
            .get(name)
            .ok_or_else(|| ProbeError::not_found(format!("Unknown host '{}'", name)))?;
        let password = match record.password_enc.as_deref() {
            Some(ciphertext) => Some(self.security.decrypt(ciphertext)?),
            None => None,
        };
        Ok(HostTarget {
            address: record.address,
            os_kind: record.os_kind,
            username: record.username,
            password,
            key_path: record.key_path,
            port: record.port,
        })
    }

    pub fn host_names(&self) -> Vec<String> {
        self.inner
            .list()
            .into_iter()
            .map(|record| record.name)
            .collect()
    }
}
