#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use fleetmon::errors::ProbeError;
use fleetmon::managers::{CommandOutput, ExecMode, ExecRequest, RemoteExecutor};
use fleetmon::services::credentials::{HostTarget, OsKind, ResolvedCredentials};

pub static ENV_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

pub struct StubExecutor {
    responses: HashMap<String, CommandOutput>,
    errors: HashMap<String, ProbeError>,
    pub calls: Mutex<Vec<(ExecMode, String)>>,
}

impl StubExecutor {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            errors: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(mut self, command: &str, stdout: &str) -> Self {
        self.responses.insert(
            command.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: 0,
                truncated: false,
                duration_ms: 1,
            },
        );
        self
    }

    pub fn respond_failure(mut self, command: &str, stderr: &str, exit_code: i32) -> Self {
        self.responses.insert(
            command.to_string(),
            CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code,
                truncated: false,
                duration_ms: 1,
            },
        );
        self
    }

    pub fn fail_with(mut self, command: &str, err: ProbeError) -> Self {
        self.errors.insert(command.to_string(), err);
        self
    }

    pub fn recorded_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn recorded_mode(&self, command: &str) -> Option<ExecMode> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .find(|(_, recorded)| recorded == command)
            .map(|(mode, _)| *mode)
    }
}

#[async_trait]
impl RemoteExecutor for StubExecutor {
    async fn execute(
        &self,
        _target: &HostTarget,
        _credentials: &ResolvedCredentials,
        request: ExecRequest,
    ) -> Result<CommandOutput, ProbeError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((request.mode, request.command.clone()));
        if let Some(err) = self.errors.get(&request.command) {
            return Err(err.clone());
        }
        match self.responses.get(&request.command) {
            Some(output) => Ok(output.clone()),
            None => Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("{}: command not found", request.command),
                exit_code: 127,
                truncated: false,
                duration_ms: 1,
            }),
        }
    }
}

pub fn linux_target(address: &str) -> HostTarget {
    HostTarget {
        address: address.to_string(),
        os_kind: OsKind::Linux,
        username: "admin".to_string(),
        password: Some("secret".to_string()),
        key_path: None,
        port: Some(22),
    }
}

pub fn windows_target(address: &str) -> HostTarget {
    HostTarget {
        address: address.to_string(),
        os_kind: OsKind::Windows,
        username: "administrator".to_string(),
        password: Some("secret".to_string()),
        key_path: None,
        port: Some(5985),
    }
}

pub fn linux_credentials() -> ResolvedCredentials {
    ResolvedCredentials {
        password: Some("secret".to_string()),
        key_path: None,
        port: 22,
    }
}

pub fn windows_credentials() -> ResolvedCredentials {
    ResolvedCredentials {
        password: Some("secret".to_string()),
        key_path: None,
        port: 5985,
    }
}
