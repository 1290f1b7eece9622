use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::constants::limits;
use crate::errors::{ProbeError, ProbeErrorKind};
use crate::managers::{CommandOutput, ConnectionReport, ExecRequest, RemoteExecutor, CONNECT_MARKER};
use crate::metrics::windows::{self, RawWindowsDetails, RawWindowsMetrics};
use crate::metrics::{
    DetailedMetrics, HealthCheck, HealthReport, HealthStatus, MetricsSnapshot, ParseError,
};
use crate::services::credentials::{HostTarget, ResolvedCredentials};
use crate::services::logger::Logger;
use crate::utils::text::excerpt;

const CMD_CPU_LOAD: &str = "wmic cpu get loadpercentage /value";
const CMD_CORE_COUNT: &str = "echo %NUMBER_OF_PROCESSORS%";
const CMD_MEMORY: &str = "wmic OS get FreePhysicalMemory,TotalVisibleMemorySize /value";
const CMD_ROOT_DISK: &str =
    r#"wmic logicaldisk where "DeviceID='C:'" get Caption,FreeSpace,Size /value"#;
const CMD_NETWORK: &str = "wmic path Win32_PerfRawData_Tcpip_NetworkInterface get Name,BytesReceivedPersec,BytesSentPersec,PacketsReceivedPersec,PacketsSentPersec /value";
const CMD_BOOT_TIME: &str = "wmic os get LastBootUpTime /value";
const PS_UPTIME: &str = "$boot = (Get-CimInstance Win32_OperatingSystem).LastBootUpTime; $span = (Get-Date) - $boot; 'up {0} days, {1} hours, {2} minutes' -f $span.Days, $span.Hours, $span.Minutes";
const CMD_PROCESSES: &str = "wmic path Win32_PerfFormattedData_PerfProc_Process get Name,IDProcess,PercentProcessorTime,WorkingSet /value";
const CMD_INTERFACES: &str =
    r#"wmic nicconfig where "IPEnabled=TRUE" get Description,IPAddress /value"#;
const CMD_ALL_DISKS: &str = "wmic logicaldisk get Caption,FreeSpace,Size /value";
const CMD_OS_INFO: &str = "wmic os get Caption,Version /value";
const CMD_HOSTNAME: &str = "hostname";
const CMD_LIST_USERS: &str = r#"wmic useraccount where "LocalAccount=TRUE" get Name /value"#;
const CMD_LIST_USERS_FALLBACK: &str = "net user";

const POWERSHELL_PREFIXES: &[&str] = &[
    "Get-", "Set-", "New-", "Remove-", "Invoke-", "Start-", "Stop-", "Restart-", "Test-",
    "Write-", "$",
];

pub(crate) fn looks_like_powershell(command: &str) -> bool {
    let trimmed = command.trim_start();
    POWERSHELL_PREFIXES
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}

pub struct WindowsManager {
    executor: Arc<dyn RemoteExecutor>,
    logger: Logger,
}

impl WindowsManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, logger: Logger) -> Self {
        Self {
            executor,
            logger: logger.child("windows"),
        }
    }

    async fn run(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        command: &str,
    ) -> Result<CommandOutput, ProbeError> {
        self.executor
            .execute(target, credentials, ExecRequest::shell(command))
            .await
    }

    async fn sample(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        request: ExecRequest,
    ) -> Result<Option<String>, ProbeError> {
        let command = request.command.clone();
        let output = self.executor.execute(target, credentials, request).await?;
        if output.success() {
            return Ok(Some(output.stdout));
        }
        self.logger.debug(
            "Metric command failed",
            Some(&json!({
                "command": excerpt(&command, limits::COMMAND_SUBSTRING_LENGTH),
                "exit_code": output.exit_code,
                "stderr": excerpt(&output.stderr, limits::LOG_SUBSTRING_LENGTH),
            })),
        );
        Ok(None)
    }

    pub async fn test_connection(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> ConnectionReport {
        let probe = format!("echo {}", CONNECT_MARKER);
        match self.run(target, credentials, &probe).await {
            Ok(output) if output.stdout.contains(CONNECT_MARKER) => {
                ConnectionReport::ok(format!("WinRM connection to {} succeeded", target.address))
            }
            Ok(output) => ConnectionReport::failed(
                ProbeErrorKind::CommandFailure,
                format!(
                    "Probe command returned unexpected output: {}",
                    excerpt(&output.stdout, limits::LOG_SUBSTRING_LENGTH)
                ),
            ),
            Err(err) => ConnectionReport::from_probe_error(&err),
        }
    }

    pub async fn basic_metrics(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<MetricsSnapshot, ProbeError> {
        self.logger.info(
            "Collecting basic metrics",
            Some(&json!({"host": target.address})),
        );
        let uptime = match self
            .sample(target, credentials, ExecRequest::powershell(PS_UPTIME))
            .await?
        {
            Some(text) if !text.trim().is_empty() => Some(text),
            _ => self
                .sample(target, credentials, ExecRequest::shell(CMD_BOOT_TIME))
                .await?
                .and_then(|raw| windows::parse_uptime_from_boot(&raw, Utc::now()).ok()),
        };
        let raw = RawWindowsMetrics {
            cpu_load: self
                .sample(target, credentials, ExecRequest::shell(CMD_CPU_LOAD))
                .await?,
            core_count: self
                .sample(target, credentials, ExecRequest::shell(CMD_CORE_COUNT))
                .await?,
            memory: self
                .sample(target, credentials, ExecRequest::shell(CMD_MEMORY))
                .await?,
            root_disk: self
                .sample(target, credentials, ExecRequest::shell(CMD_ROOT_DISK))
                .await?,
            network: self
                .sample(target, credentials, ExecRequest::shell(CMD_NETWORK))
                .await?,
            uptime,
        };
        Ok(windows::build_snapshot(&raw, &self.logger))
    }

    pub async fn detailed_metrics(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<DetailedMetrics, ProbeError> {
        self.logger.info(
            "Collecting detailed metrics",
            Some(&json!({"host": target.address})),
        );
        let raw = RawWindowsDetails {
            processes: self
                .sample(target, credentials, ExecRequest::shell(CMD_PROCESSES))
                .await?,
            interfaces: self
                .sample(target, credentials, ExecRequest::shell(CMD_INTERFACES))
                .await?,
            all_disks: self
                .sample(target, credentials, ExecRequest::shell(CMD_ALL_DISKS))
                .await?,
            os_info: self
                .sample(target, credentials, ExecRequest::shell(CMD_OS_INFO))
                .await?,
            hostname: self
                .sample(target, credentials, ExecRequest::shell(CMD_HOSTNAME))
                .await?,
        };
        Ok(windows::build_details(&raw, &self.logger))
    }

    pub async fn list_users(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<Vec<String>, ProbeError> {
        let output = self.run(target, credentials, CMD_LIST_USERS).await?;
        if output.success() {
            let names = windows::parse_account_names(&output.stdout);
            if !names.is_empty() {
                return Ok(names);
            }
        }
        let fallback = self
            .run(target, credentials, CMD_LIST_USERS_FALLBACK)
            .await?
            .ensure_success(CMD_LIST_USERS_FALLBACK)?;
        Ok(windows::parse_net_user_listing(&fallback.stdout))
    }

    pub async fn create_user(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        username: &str,
        password: &str,
    ) -> Result<(), ProbeError> {
        let command = format!(r#"net user "{}" "{}" /add"#, username, password);
        let label = format!(r#"net user "{}" **** /add"#, username);
        self.run(target, credentials, &command)
            .await?
            .ensure_success(&label)?;
        self.logger.info(
            "Created user account",
            Some(&json!({"host": target.address, "username": username})),
        );
        Ok(())
    }

    pub async fn delete_user(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        username: &str,
    ) -> Result<(), ProbeError> {
        let command = format!(r#"net user "{}" /delete"#, username);
        self.run(target, credentials, &command)
            .await?
            .ensure_success(&command)?;
        self.logger.info(
            "Deleted user account",
            Some(&json!({"host": target.address, "username": username})),
        );
        Ok(())
    }

    pub async fn execute_command(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        command: &str,
    ) -> Result<CommandOutput, ProbeError> {
        let request = if looks_like_powershell(command) {
            ExecRequest::powershell(command)
        } else {
            ExecRequest::shell(command)
        };
        let output = self.executor.execute(target, credentials, request).await?;
        output.ensure_success(command)
    }

    pub async fn health_check(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> HealthReport {
        HealthReport {
            disk: self
                .probe_health(target, credentials, CMD_ROOT_DISK, |raw| {
                    let disk = windows::parse_system_disk(raw)?;
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(disk.usage_percent),
                        reading: Some(disk.usage_percent),
                        message: format!("Disk usage: {}%", disk.usage_percent),
                    })
                })
                .await,
            memory: self
                .probe_health(target, credentials, CMD_MEMORY, |raw| {
                    let memory = windows::parse_memory(raw)?;
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(memory.usage_percent),
                        reading: Some(memory.usage_percent),
                        message: format!("Memory usage: {}%", memory.usage_percent),
                    })
                })
                .await,
            load: self
                .probe_health(target, credentials, CMD_CPU_LOAD, |raw| {
                    let load = windows::parse_cpu_load(raw)?;
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(load),
                        reading: Some(load),
                        message: format!("CPU load: {}%", load),
                    })
                })
                .await,
        }
    }

    async fn probe_health<F>(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        command: &str,
        describe: F,
    ) -> HealthCheck
    where
        F: FnOnce(&str) -> Result<HealthCheck, ParseError>,
    {
        match self.run(target, credentials, command).await {
            Ok(output) if output.success() => describe(&output.stdout).unwrap_or_else(|err| {
                HealthCheck::unknown(format!("Unreadable probe output: {}", err))
            }),
            Ok(output) => HealthCheck::unknown(format!(
                "Probe command failed with exit code {}",
                output.exit_code
            )),
            Err(err) => HealthCheck::unknown(err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::looks_like_powershell;

    #[test]
    fn powershell_detection_matches_cmdlet_prefixes() {
        assert!(looks_like_powershell("Get-Service spooler"));
        assert!(looks_like_powershell("  $PSVersionTable.PSVersion"));
        assert!(looks_like_powershell("Restart-Computer -Force"));
        assert!(!looks_like_powershell("dir C:\\"));
        assert!(!looks_like_powershell("wmic cpu get loadpercentage /value"));
        assert!(!looks_like_powershell("echo Get-Started"));
    }
}
