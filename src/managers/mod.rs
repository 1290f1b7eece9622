pub mod fleet;
pub mod linux;
pub mod service_control;
pub mod ssh;
pub mod windows;
pub mod winrm;

use async_trait::async_trait;
use serde::Serialize;

use crate::constants::{env as env_keys, limits, network};
use crate::errors::{ProbeError, ProbeErrorKind};
use crate::services::credentials::{HostTarget, ResolvedCredentials};
use crate::utils::text::excerpt;

pub(crate) const CONNECT_MARKER: &str = "fleetmon-ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Shell,
    PowerShell,
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    pub mode: ExecMode,
    pub timeout_ms: u64,
}

impl ExecRequest {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: ExecMode::Shell,
            timeout_ms: resolve_command_timeout_ms(),
        }
    }

    pub fn powershell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            mode: ExecMode::PowerShell,
            timeout_ms: resolve_command_timeout_ms(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub truncated: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !(self.stdout.trim().is_empty() && !self.stderr.trim().is_empty())
    }

    pub fn ensure_success(self, command: &str) -> Result<CommandOutput, ProbeError> {
        if self.success() {
            return Ok(self);
        }
        let summary = if self.stderr.trim().is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            self.stderr.trim().to_string()
        };
        Err(ProbeError::command_failure(format!(
            "Remote command failed: {}",
            summary
        ))
        .with_details(serde_json::json!({
            "command": excerpt(command, limits::COMMAND_SUBSTRING_LENGTH),
            "exit_code": self.exit_code,
            "stdout": excerpt(&self.stdout, limits::LOG_SUBSTRING_LENGTH),
            "stderr": excerpt(&self.stderr, limits::LOG_SUBSTRING_LENGTH),
        })))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ProbeErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ConnectionReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            failure: None,
            hint: None,
        }
    }

    pub fn failed(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            failure: Some(kind),
            hint: None,
        }
    }

    pub fn from_probe_error(err: &ProbeError) -> Self {
        Self {
            success: false,
            message: err.message.clone(),
            failure: Some(err.kind),
            hint: err.hint.clone(),
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        request: ExecRequest,
    ) -> Result<CommandOutput, ProbeError>;
}

pub(crate) fn resolve_command_timeout_ms() -> u64 {
    std::env::var(env_keys::COMMAND_TIMEOUT_MS)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(network::TIMEOUT_EXEC_DEFAULT_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builders_pick_mode_and_accept_overrides() {
        let shell = ExecRequest::shell("uptime -p");
        assert_eq!(shell.mode, ExecMode::Shell);
        assert_eq!(shell.command, "uptime -p");

        let ps = ExecRequest::powershell("Get-Date").with_timeout_ms(5_000);
        assert_eq!(ps.mode, ExecMode::PowerShell);
        assert_eq!(ps.timeout_ms, 5_000);
    }

    #[test]
    fn stderr_without_stdout_counts_as_failure() {
        let quiet_error = CommandOutput {
            stderr: "cat: /proc/missing: No such file or directory".to_string(),
            ..CommandOutput::default()
        };
        assert!(!quiet_error.success());

        let noisy_success = CommandOutput {
            stdout: "total 0".to_string(),
            stderr: "ls: warning\n".to_string(),
            ..CommandOutput::default()
        };
        assert!(noisy_success.success());

        let plain = CommandOutput::default();
        assert!(plain.success());
    }

    #[test]
    fn ensure_success_reports_the_label_not_the_payload() {
        let output = CommandOutput {
            stderr: "chpasswd: cannot lock /etc/passwd".to_string(),
            exit_code: 1,
            ..CommandOutput::default()
        };
        let err = output
            .ensure_success("echo 'deploy:****' | sudo chpasswd")
            .expect_err("failure");
        let details = err.details.expect("details");
        assert_eq!(
            details.get("command").and_then(|v| v.as_str()),
            Some("echo 'deploy:****' | sudo chpasswd")
        );
        assert_eq!(details.get("exit_code").and_then(|v| v.as_i64()), Some(1));
    }
}
