use serde::Serialize;
use serde_json::json;
use tokio::time::{sleep, Duration};

use crate::constants::{limits, network};
use crate::errors::ProbeError;
use crate::managers::{CommandOutput, ExecRequest, RemoteExecutor};
use crate::services::credentials::{HostTarget, OsKind, ResolvedCredentials};
use crate::services::logger::Logger;
use crate::utils::text::{excerpt, first_line};

const CONTAINER_SIGNATURES: &[&str] = &[
    "unrecognized service",
    "command not found",
    "System has not been booted with systemd",
    "Failed to connect to bus",
];

const CMD_WHOAMI: &str = "whoami";
const CMD_SUDO_PROBE: &str = "command -v sudo";
const CMD_SYSTEMCTL_PROBE: &str = "command -v systemctl";
const CMD_INIT_COMM: &str = "cat /proc/1/comm";
const CMD_SYSTEMD_RUNNING: &str = "systemctl is-system-running 2>/dev/null || true";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ProbeError> {
        match value.trim().to_lowercase().as_str() {
            "start" => Ok(ServiceAction::Start),
            "stop" => Ok(ServiceAction::Stop),
            "restart" => Ok(ServiceAction::Restart),
            other => Err(ProbeError::invalid_input(format!(
                "Unknown service action '{}': expected start, stop, or restart",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStrategy {
    Systemd,
    LegacyService,
    WindowsSc,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: String,
    pub action: ServiceAction,
    pub strategy: ServiceStrategy,
    pub active: bool,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinuxPlan {
    escalation: &'static str,
    systemd: bool,
}

#[derive(Debug)]
enum ProbeState {
    Identity,
    Escalation { root: bool },
    InitSystem { escalation: &'static str },
    Ready(LinuxPlan),
}

pub struct ServiceController {
    logger: Logger,
}

impl ServiceController {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("service"),
        }
    }

    pub async fn control(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        service: &str,
        action: ServiceAction,
    ) -> Result<ServiceReport, ProbeError> {
        self.logger.info(
            "Running service action",
            Some(&json!({
                "host": target.address,
                "service": service,
                "action": action.as_str(),
            })),
        );
        match target.os_kind {
            OsKind::Linux => {
                self.control_linux(executor, target, credentials, service, action)
                    .await
            }
            OsKind::Windows => {
                self.control_windows(executor, target, credentials, service, action)
                    .await
            }
        }
    }

    async fn control_linux(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        service: &str,
        action: ServiceAction,
    ) -> Result<ServiceReport, ProbeError> {
        let plan = self.plan_linux(executor, target, credentials).await?;
        let strategy = self
            .execute_linux(executor, target, credentials, plan, service, action)
            .await?;
        sleep(Duration::from_millis(network::SERVICE_RESTART_SETTLE_MS)).await;
        let (active, status) = self
            .linux_status(executor, target, credentials, plan, strategy, service)
            .await?;
        Ok(ServiceReport {
            service: service.to_string(),
            action,
            strategy,
            active,
            status,
        })
    }

    async fn plan_linux(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<LinuxPlan, ProbeError> {
        let mut state = ProbeState::Identity;
        loop {
            state = match state {
                ProbeState::Identity => {
                    let root = self
                        .probe(executor, target, credentials, CMD_WHOAMI)
                        .await?
                        .map(|out| out.trim() == "root")
                        .unwrap_or(false);
                    ProbeState::Escalation { root }
                }
                ProbeState::Escalation { root } => {
                    let escalation = if root {
                        ""
                    } else if self
                        .probe(executor, target, credentials, CMD_SUDO_PROBE)
                        .await?
                        .is_some()
                    {
                        "sudo "
                    } else {
                        ""
                    };
                    ProbeState::InitSystem { escalation }
                }
                ProbeState::InitSystem { escalation } => {
                    let systemd = self.systemd_usable(executor, target, credentials).await?;
                    ProbeState::Ready(LinuxPlan {
                        escalation,
                        systemd,
                    })
                }
                ProbeState::Ready(plan) => {
                    self.logger.debug(
                        "Selected service strategy",
                        Some(&json!({
                            "systemd": plan.systemd,
                            "escalation": !plan.escalation.is_empty(),
                        })),
                    );
                    return Ok(plan);
                }
            };
        }
    }

    async fn systemd_usable(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
    ) -> Result<bool, ProbeError> {
        if self
            .probe(executor, target, credentials, CMD_SYSTEMCTL_PROBE)
            .await?
            .is_none()
        {
            return Ok(false);
        }
        let init = match self
            .probe(executor, target, credentials, CMD_INIT_COMM)
            .await?
        {
            Some(out) => out,
            None => return Ok(false),
        };
        if init.trim() != "systemd" {
            return Ok(false);
        }
        let running = match self
            .probe(executor, target, credentials, CMD_SYSTEMD_RUNNING)
            .await?
        {
            Some(out) => out,
            None => return Ok(false),
        };
        let run_state = running.trim();
        Ok(!run_state.is_empty() && run_state != "offline")
    }

    async fn execute_linux(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        plan: LinuxPlan,
        service: &str,
        action: ServiceAction,
    ) -> Result<ServiceStrategy, ProbeError> {
        if plan.systemd {
            let command = format!(
                "{}systemctl {} {}",
                plan.escalation,
                action.as_str(),
                service
            );
            let output = executor
                .execute(target, credentials, ExecRequest::shell(&command))
                .await?;
            if output.success() {
                return Ok(ServiceStrategy::Systemd);
            }
            self.logger.warn(
                "systemctl action failed, falling back to service command",
                Some(&json!({
                    "service": service,
                    "stderr": excerpt(&output.stderr, limits::LOG_SUBSTRING_LENGTH),
                })),
            );
        }
        let command = format!(
            "{}service {} {}",
            plan.escalation,
            service,
            action.as_str()
        );
        let output = executor
            .execute(target, credentials, ExecRequest::shell(&command))
            .await?;
        if output.success() {
            return Ok(ServiceStrategy::LegacyService);
        }
        let detail = failure_detail(&output);
        if is_container_signature(&detail) {
            return Err(ProbeError::capability_unavailable(format!(
                "Service management is unavailable on {}: {}",
                target.address,
                excerpt(&detail, limits::LOG_SUBSTRING_LENGTH)
            ))
            .with_hint(
                "The host looks like a minimal or containerized environment. Run the service process directly instead."
                    .to_string(),
            ));
        }
        Err(ProbeError::command_failure(format!(
            "Service {} {} failed: {}",
            service,
            action.as_str(),
            excerpt(&detail, limits::LOG_SUBSTRING_LENGTH)
        )))
    }

    async fn linux_status(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        plan: LinuxPlan,
        strategy: ServiceStrategy,
        service: &str,
    ) -> Result<(bool, String), ProbeError> {
        if strategy == ServiceStrategy::Systemd {
            let command = format!("systemctl is-active {} 2>/dev/null || true", service);
            let output = executor
                .execute(target, credentials, ExecRequest::shell(&command))
                .await?;
            let status = first_line(&output.stdout).trim().to_string();
            let status = if status.is_empty() {
                "unknown".to_string()
            } else {
                status
            };
            return Ok((status == "active", status));
        }
        let command = format!("{}service {} status", plan.escalation, service);
        let output = executor
            .execute(target, credentials, ExecRequest::shell(&command))
            .await?;
        let active = output.exit_code == 0;
        let status = if active { "active" } else { "inactive" };
        Ok((active, status.to_string()))
    }

    async fn control_windows(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        service: &str,
        action: ServiceAction,
    ) -> Result<ServiceReport, ProbeError> {
        match action {
            ServiceAction::Start => {
                self.run_sc(executor, target, credentials, "start", service)
                    .await?;
            }
            ServiceAction::Stop => {
                self.run_sc(executor, target, credentials, "stop", service)
                    .await?;
            }
            ServiceAction::Restart => {
                let stop = format!("sc stop {}", service);
                let output = executor
                    .execute(target, credentials, ExecRequest::shell(&stop))
                    .await?;
                if !output.success() {
                    self.logger.debug(
                        "sc stop before restart failed",
                        Some(&json!({
                            "service": service,
                            "stderr": excerpt(&failure_detail(&output), limits::LOG_SUBSTRING_LENGTH),
                        })),
                    );
                }
                sleep(Duration::from_millis(network::SERVICE_RESTART_SETTLE_MS)).await;
                self.run_sc(executor, target, credentials, "start", service)
                    .await?;
            }
        }
        sleep(Duration::from_millis(network::SERVICE_RESTART_SETTLE_MS)).await;
        let query = format!("sc query {}", service);
        let output = executor
            .execute(target, credentials, ExecRequest::shell(&query))
            .await?;
        let state = parse_sc_state(&output.stdout).unwrap_or_else(|| "unknown".to_string());
        let active = state == "running";
        Ok(ServiceReport {
            service: service.to_string(),
            action,
            strategy: ServiceStrategy::WindowsSc,
            active,
            status: state,
        })
    }

    async fn run_sc(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        verb: &str,
        service: &str,
    ) -> Result<CommandOutput, ProbeError> {
        let command = format!("sc {} {}", verb, service);
        let output = executor
            .execute(target, credentials, ExecRequest::shell(&command))
            .await?;
        output.ensure_success(&command)
    }

    async fn probe(
        &self,
        executor: &dyn RemoteExecutor,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        command: &str,
    ) -> Result<Option<String>, ProbeError> {
        let output = executor
            .execute(target, credentials, ExecRequest::shell(command))
            .await?;
        if output.success() {
            Ok(Some(output.stdout))
        } else {
            Ok(None)
        }
    }
}

fn failure_detail(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = output.stdout.trim();
    if !stdout.is_empty() {
        return stdout.to_string();
    }
    format!("exit code {}", output.exit_code)
}

fn is_container_signature(text: &str) -> bool {
    CONTAINER_SIGNATURES.iter().any(|sig| text.contains(sig))
}

fn parse_sc_state(raw: &str) -> Option<String> {
    raw.lines()
        .find(|line| line.trim_start().starts_with("STATE"))
        .and_then(|line| line.split_whitespace().last())
        .map(|word| word.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_signatures_match_real_outputs() {
        assert!(is_container_signature("nginx: unrecognized service"));
        assert!(is_container_signature("sudo: service: command not found"));
        assert!(is_container_signature(
            "System has not been booted with systemd (PID 1 is not systemd). Can't operate."
        ));
        assert!(is_container_signature(
            "Failed to connect to bus: No such file or directory"
        ));
        assert!(!is_container_signature(
            "Job for nginx.service failed because the control process exited with error code."
        ));
    }

    #[test]
    fn sc_state_parses_query_output() {
        let raw = "\r\nSERVICE_NAME: spooler\r\n        TYPE               : 110  WIN32_OWN_PROCESS\r\n        STATE              : 4  RUNNING\r\n                                (STOPPABLE, NOT_PAUSABLE, ACCEPTS_SHUTDOWN)\r\n        WIN32_EXIT_CODE    : 0  (0x0)\r\n";
        assert_eq!(parse_sc_state(raw).as_deref(), Some("running"));

        let stopped = "SERVICE_NAME: spooler\n        STATE              : 1  STOPPED\n";
        assert_eq!(parse_sc_state(stopped).as_deref(), Some("stopped"));
        assert_eq!(parse_sc_state("no such service"), None);
    }

    #[test]
    fn action_parse_accepts_known_verbs() {
        assert_eq!(ServiceAction::parse("start").ok(), Some(ServiceAction::Start));
        assert_eq!(
            ServiceAction::parse(" RESTART ").ok(),
            Some(ServiceAction::Restart)
        );
        assert!(ServiceAction::parse("reload").is_err());
    }
}
