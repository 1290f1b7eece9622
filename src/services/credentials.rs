use crate::constants::network::{SSH_DEFAULT_PORT, WINRM_HTTP_PORT, WINRM_PORTS};
use crate::errors::ProbeError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsKind {
    Linux,
    Windows,
}

impl OsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OsKind::Linux => "linux",
            OsKind::Windows => "windows",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            OsKind::Linux => SSH_DEFAULT_PORT,
            OsKind::Windows => WINRM_HTTP_PORT,
        }
    }
}

impl fmt::Display for OsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct HostTarget {
    pub address: String,
    pub os_kind: OsKind,
    pub username: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct CredentialOverride {
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug)]
pub struct ResolvedCredentials {
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub port: u16,
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

#[derive(Clone)]
pub struct CredentialResolver;

impl CredentialResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        target: &HostTarget,
        request: &CredentialOverride,
    ) -> Result<ResolvedCredentials, ProbeError> {
        match target.os_kind {
            OsKind::Linux => self.resolve_linux(target, request),
            OsKind::Windows => self.resolve_windows(target, request),
        }
    }

    fn resolve_linux(
        &self,
        target: &HostTarget,
        request: &CredentialOverride,
    ) -> Result<ResolvedCredentials, ProbeError> {
        let password =
            non_empty(request.password.as_ref()).or_else(|| non_empty(target.password.as_ref()));
        let key_path =
            non_empty(request.key_path.as_ref()).or_else(|| non_empty(target.key_path.as_ref()));
        let port = request
            .port
            .or(target.port)
            .unwrap_or(SSH_DEFAULT_PORT);

        if password.is_none() && key_path.is_none() {
            return Err(ProbeError::missing_credentials(format!(
                "No usable credentials for {}: a password or a key path is required",
                target.address
            ))
            .with_hint(
                "Supply a password or key path with the request, or store one for this host."
                    .to_string(),
            ));
        }

        Ok(ResolvedCredentials {
            password,
            key_path,
            port,
        })
    }

    fn resolve_windows(
        &self,
        target: &HostTarget,
        request: &CredentialOverride,
    ) -> Result<ResolvedCredentials, ProbeError> {
        let password = non_empty(request.password.as_ref())
            .or_else(|| non_empty(target.password.as_ref()))
            .ok_or_else(|| {
                ProbeError::missing_credentials(format!(
                    "No usable credentials for {}: a password is required for Windows hosts",
                    target.address
                ))
                .with_hint(
                    "Windows remote management has no key-based login; supply or store a password."
                        .to_string(),
                )
            })?;

        let port = match request.port {
            Some(p) if WINRM_PORTS.contains(&p) => p,
            _ => target.port.unwrap_or(WINRM_HTTP_PORT),
        };

        Ok(ResolvedCredentials {
            password: Some(password),
            key_path: None,
            port,
        })
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}
