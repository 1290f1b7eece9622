use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::constants::limits;
use crate::errors::{ProbeError, ProbeErrorKind};
use crate::managers::linux::LinuxManager;
use crate::managers::service_control::{ServiceAction, ServiceController, ServiceReport};
use crate::managers::ssh::SshExecutor;
use crate::managers::windows::WindowsManager;
use crate::managers::winrm::WinRmExecutor;
use crate::managers::{CommandOutput, ConnectionReport, RemoteExecutor};
use crate::metrics::{DetailedMetrics, HealthReport, HealthStatus, MetricsSnapshot};
use crate::services::credentials::{
    CredentialOverride, CredentialResolver, HostTarget, OsKind, ResolvedCredentials,
};
use crate::services::logger::Logger;
use crate::services::registry::{NewHost, Registry};
use crate::services::validation::Validation;
use crate::stores::memory_registry::{HostRecord, HostStatus};

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub host: HostRecord,
    pub connection: ConnectionReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetEntry {
    pub name: String,
    pub address: String,
    pub os_kind: OsKind,
    pub status: HostStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct FleetManager {
    registry: Arc<Registry>,
    resolver: CredentialResolver,
    validation: Validation,
    linux: LinuxManager,
    windows: WindowsManager,
    services: ServiceController,
    ssh: Arc<dyn RemoteExecutor>,
    winrm: Arc<dyn RemoteExecutor>,
    logger: Logger,
}

impl FleetManager {
    pub fn new(registry: Arc<Registry>, logger: Logger) -> Self {
        let ssh: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new(logger.clone()));
        let winrm: Arc<dyn RemoteExecutor> = Arc::new(WinRmExecutor::new(logger.clone()));
        Self::with_executors(registry, logger, ssh, winrm)
    }

    pub fn with_executors(
        registry: Arc<Registry>,
        logger: Logger,
        ssh: Arc<dyn RemoteExecutor>,
        winrm: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            linux: LinuxManager::new(ssh.clone(), logger.clone()),
            windows: WindowsManager::new(winrm.clone(), logger.clone()),
            services: ServiceController::new(logger.clone()),
            registry,
            resolver: CredentialResolver::new(),
            validation: Validation::new(),
            ssh,
            winrm,
            logger: logger.child("fleet"),
        }
    }

    fn executor_for(&self, os_kind: OsKind) -> Arc<dyn RemoteExecutor> {
        match os_kind {
            OsKind::Linux => self.ssh.clone(),
            OsKind::Windows => self.winrm.clone(),
        }
    }

    fn prepare(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<(HostTarget, ResolvedCredentials), ProbeError> {
        let target = self.registry.resolve_target(name)?;
        let credentials = self.resolver.resolve(&target, overrides)?;
        Ok((target, credentials))
    }

    fn note_status(&self, name: &str, online: bool) {
        if let Err(err) = self.registry.record_status(name, online) {
            self.logger.warn(
                "Could not persist host status",
                Some(&json!({"host": name, "error": err.message})),
            );
        }
    }

    fn note_outcome<T>(&self, name: &str, result: &Result<T, ProbeError>) {
        let online = match result {
            Ok(_) => true,
            Err(err) => match err.kind {
                ProbeErrorKind::NetworkFailure | ProbeErrorKind::AuthenticationFailure => false,
                ProbeErrorKind::CommandFailure | ProbeErrorKind::CapabilityUnavailable => true,
                _ => return,
            },
        };
        self.note_status(name, online);
    }

    pub async fn register_host(&self, spec: NewHost) -> Result<RegistrationOutcome, ProbeError> {
        let mut spec = spec;
        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(ProbeError::invalid_input(
                "Host name must be a non-empty string",
            ));
        }
        spec.name = name;
        spec.address = self.validation.ensure_host(&spec.address)?;
        spec.username = self.validation.ensure_username(&spec.username)?;

        let record = self.registry.upsert_host(spec)?;
        let connection = match self
            .test_connection(&record.name, &CredentialOverride::default())
            .await
        {
            Ok(report) => report,
            Err(err) => ConnectionReport::from_probe_error(&err),
        };
        let (metrics, metrics_error) = if connection.success {
            match self
                .basic_metrics(&record.name, &CredentialOverride::default())
                .await
            {
                Ok(snapshot) => (Some(snapshot), None),
                Err(err) => {
                    self.logger.warn(
                        "Initial metrics fetch failed",
                        Some(&json!({"host": record.name, "error": err.message})),
                    );
                    (None, Some(err.message))
                }
            }
        } else {
            (None, None)
        };
        let host = self.registry.get_host(&record.name).unwrap_or(record);
        Ok(RegistrationOutcome {
            host,
            connection,
            metrics,
            metrics_error,
        })
    }

    pub fn list_hosts(&self) -> Vec<HostRecord> {
        self.registry.list_hosts()
    }

    pub fn remove_host(&self, name: &str) -> Result<bool, ProbeError> {
        self.registry.remove_host(name)
    }

    pub async fn test_connection(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<ConnectionReport, ProbeError> {
        let (target, credentials) = self.prepare(name, overrides)?;
        let report = match target.os_kind {
            OsKind::Linux => self.linux.test_connection(&target, &credentials).await,
            OsKind::Windows => self.windows.test_connection(&target, &credentials).await,
        };
        self.note_status(name, report.success);
        Ok(report)
    }

    pub async fn basic_metrics(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<MetricsSnapshot, ProbeError> {
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => self.linux.basic_metrics(&target, &credentials).await,
            OsKind::Windows => self.windows.basic_metrics(&target, &credentials).await,
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn detailed_metrics(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<DetailedMetrics, ProbeError> {
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => self.linux.detailed_metrics(&target, &credentials).await,
            OsKind::Windows => self.windows.detailed_metrics(&target, &credentials).await,
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn list_users(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<Vec<String>, ProbeError> {
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => self.linux.list_users(&target, &credentials).await,
            OsKind::Windows => self.windows.list_users(&target, &credentials).await,
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn create_user(
        &self,
        name: &str,
        overrides: &CredentialOverride,
        username: &str,
        password: &str,
    ) -> Result<(), ProbeError> {
        let username = self.validation.ensure_account_name(username)?;
        if password.trim().is_empty() {
            return Err(ProbeError::invalid_input("Password must not be empty"));
        }
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => {
                self.linux
                    .create_user(&target, &credentials, &username, password)
                    .await
            }
            OsKind::Windows => {
                self.windows
                    .create_user(&target, &credentials, &username, password)
                    .await
            }
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn delete_user(
        &self,
        name: &str,
        overrides: &CredentialOverride,
        username: &str,
    ) -> Result<(), ProbeError> {
        let username = self.validation.ensure_account_name(username)?;
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => {
                self.linux
                    .delete_user(&target, &credentials, &username)
                    .await
            }
            OsKind::Windows => {
                self.windows
                    .delete_user(&target, &credentials, &username)
                    .await
            }
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn execute_command(
        &self,
        name: &str,
        overrides: &CredentialOverride,
        command: &str,
    ) -> Result<CommandOutput, ProbeError> {
        let command = self.validation.ensure_command(command)?;
        let (target, credentials) = self.prepare(name, overrides)?;
        let result = match target.os_kind {
            OsKind::Linux => {
                self.linux
                    .execute_command(&target, &credentials, &command)
                    .await
            }
            OsKind::Windows => {
                self.windows
                    .execute_command(&target, &credentials, &command)
                    .await
            }
        };
        self.note_outcome(name, &result);
        result
    }

    pub async fn control_service(
        &self,
        name: &str,
        overrides: &CredentialOverride,
        service: &str,
        action: ServiceAction,
    ) -> Result<ServiceReport, ProbeError> {
        let service = self.validation.ensure_service_name(service)?;
        let (target, credentials) = self.prepare(name, overrides)?;
        let executor = self.executor_for(target.os_kind);
        let result = self
            .services
            .control(executor.as_ref(), &target, &credentials, &service, action)
            .await;
        self.note_outcome(name, &result);
        result
    }

    pub async fn health_check(
        &self,
        name: &str,
        overrides: &CredentialOverride,
    ) -> Result<HealthReport, ProbeError> {
        let (target, credentials) = self.prepare(name, overrides)?;
        let report = match target.os_kind {
            OsKind::Linux => self.linux.health_check(&target, &credentials).await,
            OsKind::Windows => self.windows.health_check(&target, &credentials).await,
        };
        let reachable = [&report.disk, &report.memory, &report.load]
            .iter()
            .any(|check| check.status != HealthStatus::Unknown);
        if reachable {
            self.note_status(name, true);
        }
        Ok(report)
    }

    pub async fn snapshot_fleet(&self) -> Vec<FleetEntry> {
        let records = self.registry.list_hosts();
        self.logger.info(
            "Probing fleet",
            Some(&json!({"hosts": records.len()})),
        );
        let mut entries: Vec<FleetEntry> = stream::iter(records)
            .map(|record| async move {
                let result = self
                    .basic_metrics(&record.name, &CredentialOverride::default())
                    .await;
                let (metrics, error) = match result {
                    Ok(snapshot) => (Some(snapshot), None),
                    Err(err) => (None, Some(err.message)),
                };
                let refreshed = self.registry.get_host(&record.name).unwrap_or(record);
                FleetEntry {
                    name: refreshed.name,
                    address: refreshed.address,
                    os_kind: refreshed.os_kind,
                    status: refreshed.status,
                    last_seen: refreshed.last_seen,
                    metrics,
                    error,
                }
            })
            .buffer_unordered(limits::FLEET_PROBE_CONCURRENCY)
            .collect()
            .await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
