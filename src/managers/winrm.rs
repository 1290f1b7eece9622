use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use url::Url;

use crate::constants::{limits, network};
use crate::errors::{ProbeError, ProbeErrorKind};
use crate::managers::{CommandOutput, ExecMode, ExecRequest, RemoteExecutor};
use crate::services::credentials::{HostTarget, ResolvedCredentials};
use crate::services::logger::Logger;
use crate::utils::redact::redact_text;
use crate::utils::text::excerpt;

const AUTH_CHECKLIST: &str = "Check the username and password, confirm remote management is enabled on the host, and verify the account has remote-management rights.";
const NETWORK_CHECKLIST: &str = "Check that the host is reachable, the remote management service is listening on the expected port (5985/5986), and no firewall is blocking the connection.";

const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";
const MAX_ENVELOPE_SIZE: u32 = 153600;
const OPERATION_TIMEOUT_SECS: u64 = 20;

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    host: String,
    port: u16,
    username: String,
}

pub struct WinRmExecutor {
    logger: Logger,
    clients: DashMap<ClientKey, reqwest::Client>,
}

impl WinRmExecutor {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger: logger.child("winrm"),
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, host: &str, port: u16, username: &str) -> Result<reqwest::Client, ProbeError> {
        let key = ClientKey {
            host: host.to_string(),
            port,
            username: username.to_string(),
        };
        if let Some(existing) = self.clients.get(&key) {
            return Ok(existing.clone());
        }
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(network::TIMEOUT_WINRM_REQUEST_MS))
            .connect_timeout(Duration::from_millis(network::TIMEOUT_CONNECT_MS));
        if port == network::WINRM_HTTPS_PORT {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|err| ProbeError::internal(format!("Failed to build WinRM client: {}", err)))?;
        self.clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RemoteExecutor for WinRmExecutor {
    async fn execute(
        &self,
        target: &HostTarget,
        credentials: &ResolvedCredentials,
        request: ExecRequest,
    ) -> Result<CommandOutput, ProbeError> {
        let password = credentials.password.as_deref().ok_or_else(|| {
            ProbeError::missing_credentials("No password available for WinRM login")
        })?;
        let endpoint = build_endpoint(&target.address, credentials.port)?;
        let client = self.client_for(&target.address, credentials.port, &target.username)?;
        let command_line = build_command_line(&request);
        let secrets = vec![password.to_string()];
        self.logger.debug(
            "Executing WinRM command",
            Some(&serde_json::json!({
                "host": target.address,
                "port": credentials.port,
                "command": excerpt(
                    &redact_text(&request.command, usize::MAX, Some(&secrets)),
                    limits::COMMAND_SUBSTRING_LENGTH,
                ),
            })),
        );

        let identities = expand_usernames(&target.username, &target.address);
        let mut attempted: Vec<String> = Vec::new();
        for identity in &identities {
            let session = ShellSession {
                client: &client,
                endpoint: &endpoint,
                identity,
                password,
            };
            match session.run(&command_line, request.timeout_ms, &secrets).await {
                Ok(output) => {
                    if attempted.len() + 1 < identities.len() {
                        self.logger.debug(
                            &format!("WinRM login succeeded as '{}'", identity),
                            None,
                        );
                    }
                    return Ok(output);
                }
                Err(err) if err.kind == ProbeErrorKind::AuthenticationFailure => {
                    attempted.push(identity.clone());
                }
                Err(err) => return Err(err),
            }
        }
        Err(ProbeError::auth_failure(format!(
            "WinRM rejected all username formats: {}",
            attempted.join(", ")
        ))
        .with_hint(AUTH_CHECKLIST)
        .with_details(serde_json::json!({"attempted": attempted})))
    }
}

struct ShellSession<'a> {
    client: &'a reqwest::Client,
    endpoint: &'a Url,
    identity: &'a str,
    password: &'a str,
}

impl ShellSession<'_> {
    async fn run(
        &self,
        command_line: &str,
        timeout_ms: u64,
        secrets: &[String],
    ) -> Result<CommandOutput, ProbeError> {
        let started = Instant::now();
        let shell_id = self.create_shell().await?;
        let result = self
            .run_in_shell(&shell_id, command_line, timeout_ms, started)
            .await;
        self.delete_shell(&shell_id).await;
        let mut output = result?;
        output.stdout = redact_text(&output.stdout, usize::MAX, Some(secrets));
        output.stderr = redact_text(&output.stderr, usize::MAX, Some(secrets));
        output.duration_ms = started.elapsed().as_millis() as u64;
        Ok(output)
    }

    async fn run_in_shell(
        &self,
        shell_id: &str,
        command_line: &str,
        timeout_ms: u64,
        started: Instant,
    ) -> Result<CommandOutput, ProbeError> {
        let command_id = self.start_command(shell_id, command_line).await?;
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut exit_code: Option<i32> = None;

        for _ in 0..limits::WINRM_RECEIVE_MAX_POLLS {
            if started.elapsed().as_millis() as u64 > timeout_ms {
                self.signal_terminate(shell_id, &command_id).await;
                return Err(ProbeError::timeout(format!(
                    "Command timed out after {}ms",
                    timeout_ms
                )));
            }
            let body = receive_body(&command_id);
            let envelope = self.build_envelope(ACTION_RECEIVE, Some(shell_id), &body);
            let response = self.post(envelope).await?;
            let chunk = parse_receive_response(&response)?;
            truncated |= append_capped(&mut stdout, &chunk.stdout, limits::MAX_OUTPUT_BYTES);
            truncated |= append_capped(&mut stderr, &chunk.stderr, limits::MAX_OUTPUT_BYTES);
            if let Some(code) = chunk.exit_code {
                exit_code = Some(code);
            }
            if chunk.done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(network::WINRM_RECEIVE_POLL_MS)).await;
        }

        let Some(exit_code) = exit_code else {
            self.signal_terminate(shell_id, &command_id).await;
            return Err(ProbeError::timeout(format!(
                "Command did not complete within {}ms",
                timeout_ms
            )));
        };
        self.signal_terminate(shell_id, &command_id).await;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            truncated,
            duration_ms: 0,
        })
    }

    async fn create_shell(&self) -> Result<String, ProbeError> {
        let body = "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>";
        let envelope = self.build_envelope(ACTION_CREATE, None, body);
        let response = self.post(envelope).await?;
        parse_shell_id(&response)
    }

    async fn start_command(&self, shell_id: &str, command_line: &str) -> Result<String, ProbeError> {
        let body = format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            xml_escape(command_line)
        );
        let envelope = self.build_envelope(ACTION_COMMAND, Some(shell_id), &body);
        let response = self.post(envelope).await?;
        parse_command_id(&response)
    }

    async fn signal_terminate(&self, shell_id: &str, command_id: &str) {
        let body = format!(
            "<rsp:Signal CommandId=\"{}\"><rsp:Code>{}</rsp:Code></rsp:Signal>",
            xml_escape(command_id),
            SIGNAL_TERMINATE
        );
        let envelope = self.build_envelope(ACTION_SIGNAL, Some(shell_id), &body);
        let _ = self.post(envelope).await;
    }

    async fn delete_shell(&self, shell_id: &str) {
        let envelope = self.build_envelope(ACTION_DELETE, Some(shell_id), "");
        let _ = self.post(envelope).await;
    }

    fn build_envelope(&self, action: &str, shell_id: Option<&str>, body: &str) -> String {
        let message_id = uuid::Uuid::new_v4();
        let selector = shell_id
            .map(|id| {
                format!(
                    "<w:SelectorSet><w:Selector Name=\"ShellId\">{}</w:Selector></w:SelectorSet>",
                    xml_escape(id)
                )
            })
            .unwrap_or_default();
        let options = if action == ACTION_CREATE {
            "<w:OptionSet><w:Option Name=\"WINRS_CODEPAGE\">65001</w:Option><w:Option Name=\"WINRS_NOPROFILE\">FALSE</w:Option></w:OptionSet>"
        } else {
            ""
        };
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
                "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" ",
                "xmlns:a=\"http://schemas.xmlsoap.org/ws/2004/08/addressing\" ",
                "xmlns:w=\"http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd\" ",
                "xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\">",
                "<s:Header>",
                "<a:To>{to}</a:To>",
                "<a:ReplyTo><a:Address mustUnderstand=\"true\">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>",
                "<w:MaxEnvelopeSize mustUnderstand=\"true\">{max_size}</w:MaxEnvelopeSize>",
                "<a:MessageID>uuid:{message_id}</a:MessageID>",
                "<w:Locale mustUnderstand=\"false\" xml:lang=\"en-US\"/>",
                "<w:OperationTimeout>PT{op_timeout}S</w:OperationTimeout>",
                "<w:ResourceURI mustUnderstand=\"true\">http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd</w:ResourceURI>",
                "<a:Action mustUnderstand=\"true\">{action}</a:Action>",
                "{options}{selector}",
                "</s:Header>",
                "<s:Body>{body}</s:Body>",
                "</s:Envelope>",
            ),
            to = xml_escape(self.endpoint.as_str()),
            max_size = MAX_ENVELOPE_SIZE,
            message_id = message_id,
            op_timeout = OPERATION_TIMEOUT_SECS,
            action = action,
            options = options,
            selector = selector,
            body = body,
        )
    }

    async fn post(&self, envelope: String) -> Result<String, ProbeError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(self.identity, Some(self.password))
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ProbeError::auth_failure(format!(
                "WinRM rejected credentials for '{}'",
                self.identity
            )));
        }
        if !status.is_success() {
            let fault = parse_fault_message(&body)
                .unwrap_or_else(|| format!("HTTP status {}", status.as_u16()));
            return Err(ProbeError::internal(format!("WinRM fault: {}", fault)));
        }
        Ok(body)
    }
}

fn map_transport_error(err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::timeout("WinRM request timed out").with_hint(NETWORK_CHECKLIST);
    }
    if err.is_connect() {
        return ProbeError::network_failure(format!("WinRM connection error: {}", err))
            .with_hint(NETWORK_CHECKLIST);
    }
    ProbeError::internal(format!("WinRM transport error: {}", err))
}

fn build_endpoint(host: &str, port: u16) -> Result<Url, ProbeError> {
    let scheme = if port == network::WINRM_HTTPS_PORT {
        "https"
    } else {
        "http"
    };
    Url::parse(&format!("{}://{}:{}/wsman", scheme, host, port))
        .map_err(|err| ProbeError::invalid_input(format!("Invalid WinRM endpoint: {}", err)))
}

fn build_command_line(request: &ExecRequest) -> String {
    match request.mode {
        ExecMode::Shell => request.command.clone(),
        ExecMode::PowerShell => format!(
            "powershell -NoProfile -NonInteractive -EncodedCommand {}",
            encode_powershell(&request.command)
        ),
    }
}

pub fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(utf16)
}

pub fn expand_usernames(username: &str, host: &str) -> Vec<String> {
    if username.contains('\\') || username.contains('@') {
        return vec![username.to_string()];
    }
    vec![
        username.to_string(),
        format!(".\\{}", username),
        format!("{}\\{}", host, username),
    ]
}

fn append_capped(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    if buffer.len() >= limit {
        return !chunk.is_empty();
    }
    let remaining = limit - buffer.len();
    if chunk.len() > remaining {
        buffer.extend_from_slice(&chunk[..remaining]);
        return true;
    }
    buffer.extend_from_slice(chunk);
    false
}

fn xml_escape(value: &str) -> String {
    quick_xml::escape::escape(value).into_owned()
}

fn receive_body(command_id: &str) -> String {
    format!(
        "<rsp:Receive><rsp:DesiredStream CommandId=\"{}\">stdout stderr</rsp:DesiredStream></rsp:Receive>",
        xml_escape(command_id)
    )
}

fn attr_value(element: &BytesStart, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name.as_bytes())
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

pub fn parse_shell_id(xml: &str) -> Result<String, ProbeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut capturing = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                capturing = tag == "ShellId"
                    || (tag == "Selector" && attr_value(&e, "Name").as_deref() == Some("ShellId"));
            }
            Ok(Event::Text(e)) => {
                if capturing {
                    let id = String::from_utf8_lossy(&e).trim().to_string();
                    if !id.is_empty() {
                        return Ok(id);
                    }
                }
            }
            Ok(Event::End(_)) => {
                capturing = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    Err(ProbeError::internal(
        "WinRM response did not contain a shell id",
    ))
}

pub fn parse_command_id(xml: &str) -> Result<String, ProbeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_command_id = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                in_command_id = e.local_name().as_ref() == b"CommandId";
            }
            Ok(Event::Text(e)) => {
                if in_command_id {
                    let id = String::from_utf8_lossy(&e).trim().to_string();
                    if !id.is_empty() {
                        return Ok(id);
                    }
                }
            }
            Ok(Event::End(_)) => {
                in_command_id = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    Err(ProbeError::internal(
        "WinRM response did not contain a command id",
    ))
}

#[derive(Debug, Default, PartialEq)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub done: bool,
}

pub fn parse_receive_response(xml: &str) -> Result<ReceiveChunk, ProbeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut chunk = ReceiveChunk::default();
    let mut current_stream: Option<String> = None;
    let mut in_exit_code = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match tag.as_str() {
                    "Stream" => current_stream = attr_value(&e, "Name"),
                    "CommandState" => {
                        if attr_value(&e, "State")
                            .map(|state| state.ends_with("Done"))
                            .unwrap_or(false)
                        {
                            chunk.done = true;
                        }
                    }
                    "ExitCode" => in_exit_code = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"CommandState"
                    && attr_value(&e, "State")
                        .map(|state| state.ends_with("Done"))
                        .unwrap_or(false)
                {
                    chunk.done = true;
                }
            }
            Ok(Event::Text(e)) => {
                let text = String::from_utf8_lossy(&e).to_string();
                if in_exit_code {
                    chunk.exit_code = text.trim().parse().ok();
                } else if let Some(stream) = current_stream.as_deref() {
                    if let Ok(decoded) =
                        base64::engine::general_purpose::STANDARD.decode(text.trim())
                    {
                        match stream {
                            "stdout" => chunk.stdout.extend_from_slice(&decoded),
                            "stderr" => chunk.stderr.extend_from_slice(&decoded),
                            _ => {}
                        }
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Stream" => current_stream = None,
                b"ExitCode" => in_exit_code = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(_) => {
                return Err(ProbeError::internal("Malformed WinRM receive response"));
            }
            _ => {}
        }
    }
    Ok(chunk)
}

pub fn parse_fault_message(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut in_reason_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Text" {
                    in_reason_text = true;
                } else if e.local_name().as_ref() == b"WSManFault" {
                    if let Some(message) = attr_value(&e, "Message") {
                        return Some(message);
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"WSManFault" {
                    if let Some(message) = attr_value(&e, "Message") {
                        return Some(message);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_reason_text {
                    let text = String::from_utf8_lossy(&e).trim().to_string();
                    if !text.is_empty() {
                        return Some(text);
                    }
                }
            }
            Ok(Event::End(_)) => {
                in_reason_text = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_usernames_get_qualified_variants() {
        assert_eq!(
            expand_usernames("bob", "winhost"),
            vec!["bob", ".\\bob", "winhost\\bob"]
        );
    }

    #[test]
    fn qualified_usernames_are_not_expanded() {
        assert_eq!(expand_usernames("CORP\\bob", "winhost"), vec!["CORP\\bob"]);
        assert_eq!(
            expand_usernames("bob@corp.local", "winhost"),
            vec!["bob@corp.local"]
        );
    }

    #[test]
    fn powershell_encoding_is_utf16le_base64() {
        assert_eq!(encode_powershell("dir"), "ZABpAHIA");
    }

    #[test]
    fn endpoint_scheme_follows_port() {
        assert_eq!(
            build_endpoint("winhost", 5985).unwrap().as_str(),
            "http://winhost:5985/wsman"
        );
        assert_eq!(
            build_endpoint("winhost", 5986).unwrap().as_str(),
            "https://winhost:5986/wsman"
        );
    }

    #[test]
    fn shell_id_from_create_response() {
        let xml = "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\"><s:Body><rsp:Shell><rsp:ShellId>4F2A35C1-B10E-4E22-8CCA-17884F2B6A31</rsp:ShellId></rsp:Shell></s:Body></s:Envelope>";
        assert_eq!(
            parse_shell_id(xml).unwrap(),
            "4F2A35C1-B10E-4E22-8CCA-17884F2B6A31"
        );
    }

    #[test]
    fn receive_response_collects_streams_and_exit() {
        let xml = concat!(
            "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" xmlns:rsp=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell\">",
            "<s:Body><rsp:ReceiveResponse>",
            "<rsp:Stream Name=\"stdout\" CommandId=\"C1\">TG9hZFBlcmNlbnRhZ2U9MTI=</rsp:Stream>",
            "<rsp:Stream Name=\"stderr\" CommandId=\"C1\">RXJy</rsp:Stream>",
            "<rsp:CommandState CommandId=\"C1\" State=\"http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done\">",
            "<rsp:ExitCode>0</rsp:ExitCode>",
            "</rsp:CommandState>",
            "</rsp:ReceiveResponse></s:Body></s:Envelope>",
        );
        let chunk = parse_receive_response(xml).unwrap();
        assert_eq!(chunk.stdout, b"LoadPercentage=12");
        assert_eq!(chunk.stderr, b"Err");
        assert_eq!(chunk.exit_code, Some(0));
        assert!(chunk.done);
    }

    #[test]
    fn fault_message_from_wsman_fault() {
        let xml = "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\"><s:Body><s:Fault><s:Reason><s:Text xml:lang=\"en-US\">The WS-Management service cannot process the request.</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>";
        assert_eq!(
            parse_fault_message(xml).unwrap(),
            "The WS-Management service cannot process the request."
        );
    }
}
