// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Agent Protocol (C2): the fixed HTTP surface exposed by the in-VM Agent.
//!
//! Requests are addressed through a provider-wide base URL plus the
//! `Fly-Force-Instance-Id` routing header, which causes the provider's edge
//! to deliver the request to one specific VM.

use crate::error::{CoreError, Result};
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const ROUTING_HEADER: &str = "Fly-Force-Instance-Id";

/// A shell command built from argv, never a pre-formatted string. The
/// client quotes each argument before the single shell hop on the Agent
/// side; user-controlled strings are never interpolated unescaped (§9).
#[derive(Debug, Clone)]
pub struct ExecCommand {
    pub id: String,
    pub argv: Vec<String>,
    pub cwd: Option<String>,
    pub timeout_ms: u64,
    pub background: bool,
}

impl ExecCommand {
    pub fn new(argv: Vec<impl Into<String>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            argv: argv.into_iter().map(Into::into).collect(),
            cwd: None,
            timeout_ms: 60_000,
            background: false,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Renders argv into a single POSIX shell command line, single-quoting
    /// every argument so embedded spaces, `$`, backticks, etc. are inert.
    pub fn render(&self) -> String {
        self.argv
            .iter()
            .map(|a| quote_shell_arg(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Single-quotes a shell argument, escaping embedded single quotes as
/// `'\''`. This is the only quoting discipline a single shell hop needs.
pub fn quote_shell_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || "/_.-=:".contains(c)) {
        return arg.to_string();
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    exec_id: &'a str,
    command: &'a str,
    cwd: Option<&'a str>,
    timeout_ms: u64,
    background: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub exec_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub version: String,
    pub uptime_s: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractResult {
    pub files_extracted: usize,
    pub bytes: u64,
}

/// Typed client for one VM's Agent, always routed via `machine_id`.
#[derive(Clone)]
pub struct AgentClient {
    http: Client<HttpConnector>,
    base_url: String,
    machine_id: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            machine_id: machine_id.into(),
        }
    }

    fn request_builder(&self, method: Method, path: &str) -> hyper::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_url, path))
            .header(ROUTING_HEADER, &self.machine_id)
    }

    /// `GET /health`: any non-200 response or a timeout beyond 3s means
    /// "unhealthy".
    pub async fn health(&self) -> Result<HealthResponse> {
        let req = self
            .request_builder(Method::GET, "/health")
            .body(Body::empty())
            .map_err(|e| CoreError::AgentUnhealthy(e.to_string()))?;

        let resp = timeout(Duration::from_secs(3), self.http.request(req))
            .await
            .map_err(|_| CoreError::AgentUnhealthy("health probe timed out".into()))?
            .map_err(|e| CoreError::AgentUnhealthy(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::AgentUnhealthy(format!(
                "health returned status {}",
                resp.status()
            )));
        }

        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| CoreError::AgentUnhealthy(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::AgentUnhealthy(format!("malformed health body: {e}")))
    }

    /// `POST /exec`. Timeouts are enforced server-side by the Agent;
    /// client-side we also bound the call at `timeout_ms + 2s` of slack so a
    /// wedged Agent cannot hang a caller forever.
    pub async fn exec(&self, cmd: &ExecCommand) -> Result<ExecResult> {
        let rendered = cmd.render();
        let payload = ExecRequest {
            exec_id: &cmd.id,
            command: &rendered,
            cwd: cmd.cwd.as_deref(),
            timeout_ms: cmd.timeout_ms,
            background: cmd.background,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| CoreError::Parse(format!("failed to encode exec request: {e}")))?;

        let req = self
            .request_builder(Method::POST, "/exec")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .map_err(|e| CoreError::NetworkTimeout(e.to_string()))?;

        let client_timeout = Duration::from_millis(cmd.timeout_ms) + Duration::from_secs(2);
        let resp = timeout(client_timeout, self.http.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout("exec call exceeded client timeout".into()))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Parse(format!("malformed exec response: {e}")))
    }

    /// Signals a previously-started background exec to stop, used for
    /// session cancellation (§5).
    pub async fn kill_exec(&self, exec_id: &str) -> Result<()> {
        let cmd = ExecCommand::new(vec!["kill-exec", exec_id]).timeout_ms(5_000);
        self.exec(&cmd).await.map(|_| ())
    }

    /// Runs `cmd` racing a cancellation signal: if `cancel` fires before the
    /// Agent responds, `kill_exec` is sent for `cmd.id` (best-effort) and the
    /// exec is reported as cancelled instead of being awaited to completion
    /// or its own `timeout_ms` (§5).
    pub async fn exec_cancellable(&self, cmd: &ExecCommand, cancel: &CancellationToken) -> Result<ExecResult> {
        tokio::select! {
            result = self.exec(cmd) => result,
            _ = cancel.cancelled() => {
                if let Err(e) = self.kill_exec(&cmd.id).await {
                    warn!("failed to kill cancelled exec {}: {}", cmd.id, e);
                }
                Err(CoreError::Storage("session cancelled during exec".into()))
            }
        }
    }

    /// `POST /extract?path=..&preserve=..` with a gzip tar body.
    pub async fn extract(
        &self,
        body: Bytes,
        path: &str,
        preserve: &[&str],
    ) -> Result<ExtractResult> {
        let preserve_qs = preserve.join(",");
        let uri_path = format!(
            "/extract?path={}&preserve={}",
            urlencoding_path(path),
            urlencoding_path(&preserve_qs)
        );
        let req = self
            .request_builder(Method::POST, &uri_path)
            .header("content-type", "application/gzip")
            .body(Body::from(body))
            .map_err(|e| CoreError::NetworkTimeout(e.to_string()))?;

        let resp = timeout(Duration::from_secs(180), self.http.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout("extract call timed out".into()))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let bytes = hyper::body::to_bytes(resp.into_body())
                .await
                .unwrap_or_default();
            return Err(CoreError::Storage(format!(
                "extract failed with status {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Parse(format!("malformed extract response: {e}")))
    }

    /// `POST /upload?path=..` with a raw binary body; no extraction.
    pub async fn upload(&self, body: Bytes, path: &str) -> Result<()> {
        let uri_path = format!("/upload?path={}", urlencoding_path(path));
        let req = self
            .request_builder(Method::POST, &uri_path)
            .header("content-type", "application/octet-stream")
            .body(Body::from(body))
            .map_err(|e| CoreError::NetworkTimeout(e.to_string()))?;

        let resp = timeout(Duration::from_secs(180), self.http.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout("upload call timed out".into()))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::Storage(format!(
                "upload failed with status {}",
                resp.status()
            )));
        }
        Ok(())
    }

    /// Polls the in-VM dev server through the Agent's proxy surface,
    /// addressing the target port with `X-Drape-Target-Port`. Returns the
    /// HTTP status; any status below 500 is "ready" (§4.7).
    pub async fn probe_dev_server(&self, port: u16, path: &str) -> Result<u16> {
        let req = self
            .request_builder(Method::GET, path)
            .header("X-Drape-Target-Port", port.to_string())
            .body(Body::empty())
            .map_err(|e| CoreError::NetworkTimeout(e.to_string()))?;

        let resp = timeout(Duration::from_secs(3), self.http.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout("dev server probe timed out".into()))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        Ok(resp.status().as_u16())
    }

    /// `GET /download?type=pnpm`, served only by the cache master.
    pub async fn download(&self, archive_type: &str) -> Result<Bytes> {
        let uri_path = format!("/download?type={}", urlencoding_path(archive_type));
        let req = self
            .request_builder(Method::GET, &uri_path)
            .body(Body::empty())
            .map_err(|e| CoreError::NetworkTimeout(e.to_string()))?;

        let resp = timeout(Duration::from_secs(180), self.http.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout("download call timed out".into()))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CoreError::CacheFetch {
                stage: "http".into(),
                message: format!("download returned status {}", resp.status()),
            });
        }

        hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| CoreError::NetworkDns(e.to_string()))
    }
}

fn urlencoding_path(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
