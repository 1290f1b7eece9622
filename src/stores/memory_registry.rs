use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::services::credentials::OsKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    Unknown,
}

impl Default for HostStatus {
    fn default() -> Self {
        HostStatus::Unknown
    }
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
            HostStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    pub address: String,
    pub os_kind: OsKind,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_enc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: HostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    hosts: Arc<RwLock<HashMap<String, HostRecord>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self {
            hosts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn upsert(&self, record: HostRecord) {
        self.hosts
            .write()
            .unwrap()
            .insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<HostRecord> {
        self.hosts.read().unwrap().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.hosts.read().unwrap().contains_key(name)
    }

    pub fn list(&self) -> Vec<HostRecord> {
        let mut records: Vec<HostRecord> = self.hosts.read().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn forget(&self, name: &str) -> bool {
        self.hosts.write().unwrap().remove(name).is_some()
    }

    pub fn load(&self, records: &[HostRecord]) {
        let mut hosts = self.hosts.write().unwrap();
        hosts.clear();
        for record in records {
            hosts.insert(record.name.clone(), record.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().unwrap().is_empty()
    }
}
