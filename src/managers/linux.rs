use std::sync::Arc;

use serde_json::json;

use crate::constants::limits;
use crate::errors::{ProbeError, ProbeErrorKind};
use crate::managers::ssh::escape_shell_value;
use crate::managers::{CommandOutput, ConnectionReport, ExecRequest, RemoteExecutor, CONNECT_MARKER};
use crate::metrics::linux::{self, RawLinuxDetails, RawLinuxMetrics};
use crate::metrics::units::round1;
use crate::metrics::{DetailedMetrics, HealthCheck, HealthReport, HealthStatus, MetricsSnapshot, ParseError};
use crate::services::credentials::{HostTarget, ResolvedCredentials};
use crate::services::logger::Logger;
use crate::utils::text::excerpt;

const CMD_CPU_TOP: &str = "top -b -n1 | head -n 5";
const CMD_CPU_STAT: &str = "head -n 1 /proc/stat";
const CMD_CORE_COUNT: &str = "nproc";
const CMD_LOAD_AVG: &str = "cat /proc/loadavg";
const CMD_MEMORY: &str = "free -m";
const CMD_ROOT_DISK: &str = "df -h /";
const CMD_NET_DEV: &str = "cat /proc/net/dev";
const CMD_UPTIME: &str = "uptime -p || uptime";
const CMD_ADDRESSES: &str = "ip -o addr show";
const CMD_ALL_DISKS: &str = "df -h";
const CMD_OS_RELEASE: &str = "cat /etc/os-release";
const CMD_KERNEL: &str = "uname -r";
const CMD_HOSTNAME: &str = "hostname";
const CMD_LOAD_AND_CORES: &str = "cat /proc/loadavg; nproc";
const CMD_LIST_USERS: &str = "getent passwd | awk -F: '$3 >= 1000 {print $1}'";

pub struct LinuxManager {
    executor: Arc<dyn RemoteExecutor>,
    logger: Logger,
}

impl LinuxManager {
    pub fn new(executor: Arc<dyn RemoteExecutor>, logger: Logger) -> Self {
        Self {
            executor,
            logger: logger.child("linux"),
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
        command: &str,
    ) -> Result<Option<String>, ProbeError> {
        let output = self.run(target, credentials, command).await?;
        if output.success() {
            return Ok(Some(output.stdout));
        }
        self.logger.debug(
            "Metric command failed",
            Some(&json!({
                "command": excerpt(command, limits::COMMAND_SUBSTRING_LENGTH),
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
                ConnectionReport::ok(format!("SSH connection to {} succeeded", target.address))
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
        let top = self.sample(target, credentials, CMD_CPU_TOP).await?;
        let top_usable = top
            .as_deref()
            .map(|raw| linux::parse_cpu_usage_from_top(raw).is_ok())
            .unwrap_or(false);
        let proc_stat = if top_usable {
            None
        } else {
            self.sample(target, credentials, CMD_CPU_STAT).await?
        };
        let raw = RawLinuxMetrics {
            top,
            proc_stat,
            core_count: self.sample(target, credentials, CMD_CORE_COUNT).await?,
            load_avg: self.sample(target, credentials, CMD_LOAD_AVG).await?,
            memory: self.sample(target, credentials, CMD_MEMORY).await?,
            root_disk: self.sample(target, credentials, CMD_ROOT_DISK).await?,
            net_dev: self.sample(target, credentials, CMD_NET_DEV).await?,
            uptime: self.sample(target, credentials, CMD_UPTIME).await?,
        };
        Ok(linux::build_snapshot(&raw, &self.logger))
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
        let processes_cmd = format!(
            "ps aux --sort=-%cpu | head -n {}",
            limits::TOP_PROCESS_COUNT + 1
        );
        let raw = RawLinuxDetails {
            processes: self.sample(target, credentials, &processes_cmd).await?,
            addresses: self.sample(target, credentials, CMD_ADDRESSES).await?,
            all_disks: self.sample(target, credentials, CMD_ALL_DISKS).await?,
            os_release: self.sample(target, credentials, CMD_OS_RELEASE).await?,
            kernel: self.sample(target, credentials, CMD_KERNEL).await?,
            hostname: self.sample(target, credentials, CMD_HOSTNAME).await?,
        };
        Ok(linux::build_details(&raw, &self.logger))
    }

    pub async fn list_users(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<Vec<String>, ProbeError> {
        let output = self
            .run(target, credentials, CMD_LIST_USERS)
            .await?
            .ensure_success(CMD_LIST_USERS)?;
        Ok(linux::parse_user_list(&output.stdout))
    }

    pub async fn create_user(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        username: &str,
        password: &str,
    ) -> Result<(), ProbeError> {
        let create = format!("sudo useradd -m {}", username);
        self.run(target, credentials, &create)
            .await?
            .ensure_success(&create)?;
        let assignment = escape_shell_value(&format!("{}:{}", username, password));
        let set_password = format!("echo {} | sudo chpasswd", assignment);
        let label = format!("echo '{}:****' | sudo chpasswd", username);
        self.run(target, credentials, &set_password)
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
        let command = format!("sudo userdel -r {}", username);
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
        let output = self.run(target, credentials, command).await?;
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
                    let disk = linux::parse_root_disk(raw)?;
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(disk.usage_percent),
                        reading: Some(disk.usage_percent),
                        message: format!("Disk usage: {}%", disk.usage_percent),
                    })
                })
                .await,
            memory: self
                .probe_health(target, credentials, CMD_MEMORY, |raw| {
                    let memory = linux::parse_memory(raw)?;
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(memory.usage_percent),
                        reading: Some(memory.usage_percent),
                        message: format!("Memory usage: {}%", memory.usage_percent),
                    })
                })
                .await,
            load: self
                .probe_health(target, credentials, CMD_LOAD_AND_CORES, |raw| {
                    let mut lines = raw.lines();
                    let load_avg = linux::parse_load_avg(lines.next().unwrap_or_default())?;
                    let cores = linux::parse_core_count(lines.next().unwrap_or_default())?;
                    if cores == 0 {
                        return Err(ParseError::Layout("core count is zero"));
                    }
                    let percent = round1(load_avg[0] / cores as f64 * 100.0);
                    Ok(HealthCheck {
                        status: HealthStatus::from_usage(percent),
                        reading: Some(load_avg[0]),
                        message: format!("Load average: {} (cores: {})", load_avg[0], cores),
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
            Ok(output) if output.success() => describe(&output.stdout)
                .unwrap_or_else(|err| HealthCheck::unknown(format!("Unreadable probe output: {}", err))),
            Ok(output) => HealthCheck::unknown(format!(
                "Probe command failed with exit code {}",
                output.exit_code
            )),
            Err(err) => HealthCheck::unknown(err.message),
        }
    }
}
