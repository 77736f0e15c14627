//! Transports carrying JSON-RPC frames to a tool server.
//!
//! A transport is owned by exactly one session actor, so methods take
//! `&mut self` and never see concurrent use. Each `request` writes one
//! frame and waits for the response with the same id, skipping any
//! notifications or server-initiated requests in between.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use switchyard_core::error::ProtocolError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, match_response};
use crate::server::{ServerSpec, TransportKind};
use crate::sse::{SseDecoder, SseEvent};

pub const SESSION_ID_HEADER: &str = "mcp-session-id";

const STREAM_ACCEPT: &str = "application/json, text/event-stream";

/// A bidirectional JSON-RPC channel to one server.
#[async_trait]
pub trait McpTransport: Send {
    /// Send a request and wait for its response.
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ProtocolError>;

    /// Send a notification; nothing is awaited back.
    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<(), ProtocolError>;

    /// Release the channel. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Opens transports for server specs; swapped out in tests.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, spec: &ServerSpec) -> Result<Box<dyn McpTransport>, ProtocolError>;
}

/// Opens real stdio, SSE and streamable HTTP transports.
#[derive(Clone, Default)]
pub struct DefaultTransportFactory {
    client: reqwest::Client,
}

impl DefaultTransportFactory {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(&self, spec: &ServerSpec) -> Result<Box<dyn McpTransport>, ProtocolError> {
        match spec.transport {
            TransportKind::Stdio => {
                let command = spec
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| ProtocolError::Spawn(format!("server '{}' has no command", spec.id)))?;
                Ok(Box::new(StdioTransport::spawn(command, &spec.args, &spec.env)?))
            }
            TransportKind::StreamableHttp => {
                let url = require_url(spec)?;
                Ok(Box::new(StreamableHttpTransport::new(
                    self.client.clone(),
                    url,
                    &spec.headers,
                )?))
            }
            TransportKind::Sse => {
                let url = require_url(spec)?;
                Ok(Box::new(
                    SseTransport::connect(self.client.clone(), url, &spec.headers).await?,
                ))
            }
        }
    }
}

fn require_url(spec: &ServerSpec) -> Result<&str, ProtocolError> {
    spec.url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ProtocolError::Transport(format!("server '{}' has no url", spec.id)))
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ProtocolError> {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|e| ProtocolError::Transport(format!("invalid header name '{key}': {e}")))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| ProtocolError::Transport(format!("invalid value for header '{key}': {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn encode<T: serde::Serialize>(frame: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(frame).map_err(|e| ProtocolError::Transport(format!("encode frame: {e}")))
}

fn transport_error(e: reqwest::Error) -> ProtocolError {
    ProtocolError::Transport(e.to_string())
}

// --- stdio ---

/// Newline-delimited JSON over a child process's stdin/stdout.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, ProtocolError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProtocolError::Spawn(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::Spawn("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::Spawn("child stdout unavailable".into()))?;
        debug!(command, pid = ?child.id(), "Server process started");

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn write_line(&mut self, line: String) -> Result<(), ProtocolError> {
        let io = |e: std::io::Error| ProtocolError::Transport(format!("write to server: {e}"));
        self.stdin.write_all(line.as_bytes()).await.map_err(io)?;
        self.stdin.write_all(b"\n").await.map_err(io)?;
        self.stdin.flush().await.map_err(io)
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ProtocolError> {
        let id = request.id;
        self.write_line(encode(&request)?).await?;

        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| ProtocolError::Transport(format!("read from server: {e}")))?
                .ok_or_else(|| ProtocolError::Transport("server closed its output".into()))?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: Value = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(_) => {
                    // Servers sometimes print banners on stdout
                    trace!(line = %line, "Skipping non-JSON output");
                    continue;
                }
            };
            if let Some(response) = match_response(frame, id) {
                return response;
            }
        }
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<(), ProtocolError> {
        self.write_line(encode(&notification)?).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Server process already gone");
        }
    }
}

// --- streamable HTTP ---

/// One POST endpoint; responses come back as JSON or as an SSE stream.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: Option<String>,
}

impl StreamableHttpTransport {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            client,
            url: url.into(),
            headers: header_map(headers)?,
            session_id: None,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    async fn post(&mut self, body: String) -> Result<reqwest::Response, ProtocolError> {
        let mut req = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, STREAM_ACCEPT)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(session) = &self.session_id {
            req = req.header(SESSION_ID_HEADER, session);
        }
        let response = req.send().await.map_err(transport_error)?;

        if let Some(session) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProtocolError::Transport(format!("HTTP {}: {body}", status.as_u16())));
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ProtocolError> {
        let id = request.id;
        let response = self.post(encode(&request)?).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_stream {
            let frame: Value = response.json().await.map_err(transport_error)?;
            return match_response(frame, id)
                .unwrap_or_else(|| Err(ProtocolError::Transport(format!("no response for request {id}"))));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport_error)?;
            for event in decoder.push(&chunk) {
                if let Some(response) = response_in_event(&event, id) {
                    return response;
                }
            }
        }
        if let Some(response) = decoder.finish().and_then(|event| response_in_event(&event, id)) {
            return response;
        }
        Err(ProtocolError::Transport(format!("stream ended before response to request {id}")))
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<(), ProtocolError> {
        self.post(encode(&notification)?).await.map(|_| ())
    }

    async fn close(&mut self) {
        let Some(session) = self.session_id.take() else {
            return;
        };
        let result = self
            .client
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_ID_HEADER, session)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "Session termination request failed");
        }
    }
}

fn response_in_event(event: &SseEvent, id: u64) -> Option<Result<JsonRpcResponse, ProtocolError>> {
    if event.event != "message" {
        return None;
    }
    let frame: Value = serde_json::from_str(&event.data).ok()?;
    match_response(frame, id)
}

// --- legacy SSE ---

/// GET event stream for server→client frames plus a POST endpoint,
/// announced by the stream's first `endpoint` event, for client→server.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    inbound: mpsc::Receiver<Value>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(
        client: reqwest::Client,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<Self, ProtocolError> {
        let headers = header_map(headers)?;
        let base = reqwest::Url::parse(url)
            .map_err(|e| ProtocolError::Transport(format!("invalid url '{url}': {e}")))?;

        let response = client
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Transport(format!("HTTP {} opening event stream", status.as_u16())));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (inbound_tx, inbound) = mpsc::channel(64);
        let reader = tokio::spawn(read_events(response, endpoint_tx, inbound_tx));

        let path = match endpoint_rx.await {
            Ok(path) => path,
            Err(_) => {
                reader.abort();
                return Err(ProtocolError::Transport("event stream closed before announcing an endpoint".into()));
            }
        };
        let endpoint = match base.join(&path) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(ProtocolError::Transport(format!("invalid endpoint '{path}': {e}")));
            }
        };
        debug!(endpoint = %endpoint, "Event stream ready");

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            headers,
            inbound,
            reader,
        })
    }

    async fn post(&self, body: String) -> Result<(), ProtocolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProtocolError::Transport(format!("HTTP {}: {body}", status.as_u16())));
        }
        Ok(())
    }
}

async fn read_events(response: reqwest::Response, endpoint_tx: oneshot::Sender<String>, inbound: mpsc::Sender<Value>) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "Event stream interrupted");
                return;
            }
        };
        for event in decoder.push(&chunk) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                }
                "message" => match serde_json::from_str::<Value>(&event.data) {
                    Ok(frame) => {
                        if inbound.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => trace!(error = %e, "Skipping undecodable event"),
                },
                other => trace!(event = other, "Ignoring event"),
            }
        }
    }
    debug!("Event stream ended");
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&mut self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ProtocolError> {
        let id = request.id;
        self.post(encode(&request)?).await?;
        loop {
            let frame = self
                .inbound
                .recv()
                .await
                .ok_or_else(|| ProtocolError::Transport("event stream closed".into()))?;
            if let Some(response) = match_response(frame, id) {
                return response;
            }
        }
    }

    async fn notify(&mut self, notification: JsonRpcNotification) -> Result<(), ProtocolError> {
        self.post(encode(&notification)?).await
    }

    async fn close(&mut self) {
        self.reader.abort();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// HTTP client for the network transports; `connect_timeout` bounds connection setup.
pub fn http_client(connect_timeout: Duration) -> Result<reqwest::Client, ProtocolError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| ProtocolError::Transport(format!("build HTTP client: {e}")))
}
