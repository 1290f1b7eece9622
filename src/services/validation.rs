use crate::constants::limits::MAX_COMMAND_LENGTH;
use crate::errors::ProbeError;
use crate::services::credentials::OsKind;

#[derive(Clone)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_host(&self, value: &str) -> Result<String, ProbeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::invalid_input(
                "Host address must be a non-empty string",
            ));
        }
        if trimmed.contains(char::is_whitespace) || trimmed.contains('\0') {
            return Err(ProbeError::invalid_input(
                "Host address must not contain whitespace or null bytes",
            ));
        }
        if trimmed.contains("://") {
            return Err(ProbeError::invalid_input(
                "Host address must be a bare hostname or IP, not a URL",
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_username(&self, value: &str) -> Result<String, ProbeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::invalid_input(
                "Username must be a non-empty string",
            ));
        }
        if trimmed.contains('\0') || trimmed.contains(char::is_whitespace) {
            return Err(ProbeError::invalid_input(
                "Username must not contain whitespace or null bytes",
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_command(&self, value: &str) -> Result<String, ProbeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::invalid_input("Command must not be empty"));
        }
        if trimmed.contains('\0') {
            return Err(ProbeError::invalid_input(
                "Command must not contain null bytes",
            ));
        }
        if trimmed.len() > MAX_COMMAND_LENGTH {
            return Err(ProbeError::invalid_input(format!(
                "Command exceeds {} bytes",
                MAX_COMMAND_LENGTH
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_account_name(&self, value: &str) -> Result<String, ProbeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::invalid_input(
                "Account name must be a non-empty string",
            ));
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid || !trimmed.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return Err(ProbeError::invalid_input(
                "Account name must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_service_name(&self, value: &str) -> Result<String, ProbeError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProbeError::invalid_input(
                "Service name must be a non-empty string",
            ));
        }
        let valid = trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'));
        if !valid {
            return Err(ProbeError::invalid_input(
                "Service name contains characters outside letters, digits, '.', '_', '-' and '@'",
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_os_kind(&self, value: &str) -> Result<OsKind, ProbeError> {
        match value.trim().to_lowercase().as_str() {
            "linux" => Ok(OsKind::Linux),
            "windows" => Ok(OsKind::Windows),
            other => Err(ProbeError::unsupported_platform(format!(
                "Unsupported OS kind: {}",
                other
            ))
            .with_hint("Supported OS kinds are: linux, windows.".to_string())),
        }
    }
}

impl Default for Validation {
    fn default() -> Self {
        Self::new()
    }
}
