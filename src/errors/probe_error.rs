use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    MissingCredentials,
    AuthenticationFailure,
    NetworkFailure,
    CommandFailure,
    UnsupportedPlatform,
    CapabilityUnavailable,
    InvalidInput,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ProbeErrorKind::NetworkFailure),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn missing_credentials(message: impl Into<String>) -> Self {
        Self::new(
            ProbeErrorKind::MissingCredentials,
            "MISSING_CREDENTIALS",
            message,
        )
    }

    pub fn auth_failure(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::AuthenticationFailure, "AUTH_FAILED", message)
    }

    pub fn network_failure(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::NetworkFailure, "NETWORK_FAILURE", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::NetworkFailure, "TIMEOUT", message)
    }

    pub fn command_failure(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::CommandFailure, "COMMAND_FAILED", message)
    }

    pub fn unsupported_platform(message: impl Into<String>) -> Self {
        Self::new(
            ProbeErrorKind::UnsupportedPlatform,
            "UNSUPPORTED_PLATFORM",
            message,
        )
    }

    pub fn capability_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ProbeErrorKind::CapabilityUnavailable,
            "CAPABILITY_UNAVAILABLE",
            message,
        )
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::InvalidInput, "INVALID_INPUT", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Internal, "INTERNAL", message)
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        ProbeError::internal(err.to_string())
    }
}
