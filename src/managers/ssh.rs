use async_trait::async_trait;
use ssh2::Session;
use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::constants::{limits, network};
use crate::errors::ProbeError;
use crate::managers::{CommandOutput, ExecRequest, RemoteExecutor};
use crate::services::credentials::{HostTarget, ResolvedCredentials};
use crate::services::logger::Logger;
use crate::utils::paths::expand_home_path;
use crate::utils::redact::redact_text;
use crate::utils::text::excerpt;

const AUTH_CHECKLIST: &str = "Check the username and password or key file, confirm the account may log in over SSH, and verify the key is listed in the remote authorized_keys.";
const NETWORK_CHECKLIST: &str = "Check that the host is reachable, the SSH service is running on the expected port, and no firewall is blocking the connection.";
const KEEPALIVE_INTERVAL_SECS: u32 = 15;

pub fn escape_shell_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[derive(Clone)]
struct ConnectionSpec {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    key_path: Option<String>,
}

#[derive(Clone)]
pub struct SshExecutor {
    logger: Logger,
}

impl SshExecutor {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("ssh"),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        request: ExecRequest,
    ) -> Result<CommandOutput, ProbeError> {
        let spec = ConnectionSpec {
            host: target.address.clone(),
            port: credentials.port,
            username: target.username.clone(),
            password: credentials.password.clone(),
            key_path: credentials.key_path.clone(),
        };
        let secrets: Option<Vec<String>> = spec.password.clone().map(|password| vec![password]);
        self.logger.debug(
            "Executing SSH command",
            Some(&serde_json::json!({
                "host": spec.host,
                "port": spec.port,
                "command": excerpt(
                    &redact_text(&request.command, usize::MAX, secrets.as_deref()),
                    limits::COMMAND_SUBSTRING_LENGTH,
                ),
            })),
        );
        let command = request.command;
        let timeout_ms = request.timeout_ms;
        tokio::task::spawn_blocking(move || {
            exec_blocking(&spec, &command, timeout_ms, secrets.as_deref())
        })
        .await
        .map_err(|_| ProbeError::internal("SSH exec task failed"))?
    }
}

fn resolve_addr(host: &str, port: u16) -> Result<SocketAddr, ProbeError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|err| {
            ProbeError::network_failure(format!("Failed to resolve {}: {}", host, err))
                .with_hint(NETWORK_CHECKLIST)
        })?
        .next()
        .ok_or_else(|| {
            ProbeError::network_failure(format!("No addresses found for {}", host))
                .with_hint(NETWORK_CHECKLIST)
        })
}

fn connect_session(spec: &ConnectionSpec) -> Result<Session, ProbeError> {
    let addr = resolve_addr(&spec.host, spec.port)?;
    let tcp = TcpStream::connect_timeout(&addr, Duration::from_millis(network::TIMEOUT_CONNECT_MS))
        .map_err(|err| {
            ProbeError::network_failure(format!(
                "Failed to connect to {}:{}: {}",
                spec.host, spec.port, err
            ))
            .with_hint(NETWORK_CHECKLIST)
        })?;
    tcp.set_read_timeout(Some(Duration::from_millis(network::TIMEOUT_CONNECT_MS)))
        .ok();
    tcp.set_write_timeout(Some(Duration::from_millis(network::TIMEOUT_CONNECT_MS)))
        .ok();

    let mut session =
        Session::new().map_err(|_| ProbeError::internal("Failed to create SSH session"))?;
    session.set_tcp_stream(tcp);
    session.handshake().map_err(map_ssh_error)?;

    if let Some(password) = spec.password.as_deref() {
        session
            .userauth_password(&spec.username, password)
            .map_err(map_auth_error)?;
    } else if let Some(key_path) = spec.key_path.as_deref() {
        let key = std::fs::read_to_string(expand_home_path(key_path)).map_err(|err| {
            ProbeError::invalid_input(format!("SSH key file must be readable: {}", err))
        })?;
        session
            .userauth_pubkey_memory(&spec.username, None, &key, None)
            .map_err(map_auth_error)?;
    } else {
        return Err(ProbeError::missing_credentials(
            "No password or key path available for SSH login",
        ));
    }

    if !session.authenticated() {
        return Err(ProbeError::auth_failure("SSH authentication failed").with_hint(AUTH_CHECKLIST));
    }
    session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);

    Ok(session)
}

struct CaptureBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CaptureBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn capture(&mut self, chunk: &[u8]) {
        if self.bytes.len() >= self.limit {
            self.truncated = true;
            return;
        }
        let remaining = self.limit - self.bytes.len();
        let slice = if chunk.len() > remaining {
            self.truncated = true;
            &chunk[..remaining]
        } else {
            chunk
        };
        self.bytes.extend_from_slice(slice);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

fn exec_blocking(
    spec: &ConnectionSpec,
    command: &str,
    timeout_ms: u64,
    extra_secrets: Option<&[String]>,
) -> Result<CommandOutput, ProbeError> {
    let session = connect_session(spec)?;
    let mut channel = session.channel_session().map_err(map_ssh_error)?;
    channel.exec(command).map_err(map_ssh_error)?;
    session.set_blocking(false);

    let mut stdout_state = CaptureBuffer::new(limits::MAX_OUTPUT_BYTES);
    let mut stderr_state = CaptureBuffer::new(limits::MAX_OUTPUT_BYTES);
    let mut stderr_stream = channel.stderr();
    let started = Instant::now();
    let mut timed_out = false;

    loop {
        let mut progressed = false;
        let mut buf = [0u8; 8192];
        match channel.read(&mut buf) {
            Ok(n) if n > 0 => {
                stdout_state.capture(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) => {
                if err.kind() != std::io::ErrorKind::WouldBlock {
                    return Err(ProbeError::internal(format!(
                        "SSH stdout read failed: {}",
                        err
                    )));
                }
            }
        }
        match stderr_stream.read(&mut buf) {
            Ok(n) if n > 0 => {
                stderr_state.capture(&buf[..n]);
                progressed = true;
            }
            Ok(_) => {}
            Err(err) => {
                if err.kind() != std::io::ErrorKind::WouldBlock {
                    return Err(ProbeError::internal(format!(
                        "SSH stderr read failed: {}",
                        err
                    )));
                }
            }
        }

        if channel.eof() {
            break;
        }
        if started.elapsed().as_millis() as u64 > timeout_ms {
            timed_out = true;
            break;
        }
        if !progressed {
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    if timed_out {
        let _ = channel.close();
        let deadline = Instant::now() + Duration::from_millis(network::TIMEOUT_EXEC_HARD_GRACE_MS);
        while Instant::now() < deadline {
            if channel.eof() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        return Err(ProbeError::timeout(format!(
            "Command timed out after {}ms",
            timeout_ms
        ))
        .with_details(serde_json::json!({
            "command": excerpt(
                &redact_text(command, usize::MAX, extra_secrets),
                limits::COMMAND_SUBSTRING_LENGTH,
            ),
        })));
    }

    let _ = channel.wait_close();
    let exit_code = channel.exit_status().unwrap_or(-1);
    let truncated = stdout_state.truncated || stderr_state.truncated;
    let duration_ms = started.elapsed().as_millis() as u64;

    Ok(CommandOutput {
        stdout: redact_text(&stdout_state.into_string(), usize::MAX, extra_secrets),
        stderr: redact_text(&stderr_state.into_string(), usize::MAX, extra_secrets),
        exit_code,
        truncated,
        duration_ms,
    })
}

fn map_ssh_error(err: ssh2::Error) -> ProbeError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => ProbeError::timeout("SSH operation timed out"),
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => {
            ProbeError::network_failure(format!("SSH connection error: {}", io_err))
                .with_hint(NETWORK_CHECKLIST)
        }
        _ => ProbeError::internal(format!("SSH error: {}", io_err)),
    }
}

fn map_auth_error(err: ssh2::Error) -> ProbeError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        std::io::ErrorKind::TimedOut => ProbeError::timeout("SSH operation timed out"),
        _ => ProbeError::auth_failure(format!("SSH authentication failed: {}", io_err))
            .with_hint(AUTH_CHECKLIST),
    }
}
