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

//! Gateway/Proxy (C8): resolves an incoming client request to a target VM
//! (cookie → header → URL prefix) and forwards it to that VM's Agent-proxied
//! dev server, stripping hop-by-hop headers and passing WebSocket upgrades
//! through transparently (§4.8).

use crate::model::RoutingToken;
use crate::provider::ProviderClient;
use crate::session::SessionRegistry;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::client::HttpConnector;
use hyper::upgrade::Upgraded;
use hyper::{Body, Client, Request};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;

const ROUTING_COOKIE: &str = "drape_vm_id";
pub const ROUTING_HEADER: &str = "X-Drape-Machine-Id";
const FORCE_INSTANCE_HEADER: &str = "Fly-Force-Instance-Id";
const TARGET_PORT_HEADER: &str = "X-Drape-Target-Port";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Shared state the gateway handler needs: the session registry (to resolve
/// a routing token to a ready VM) and the agent base URL to forward through.
pub struct GatewayState<P: ProviderClient> {
    pub registry: Arc<SessionRegistry<P>>,
    pub agent_base_url: String,
}

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then(|| v)
    })
}

/// Parses `/@<user>/<project>/...` into the `user/project` key the session
/// registry uses as its project id. Returns `None` for any other path shape.
pub fn parse_url_prefix_project_id(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/@")?;
    let mut parts = rest.splitn(3, '/');
    let user = parts.next().filter(|s| !s.is_empty())?;
    let project = parts.next().filter(|s| !s.is_empty())?;
    Some(format!("{user}/{project}"))
}

/// Resolution order: cookie, then header, then URL prefix (§4.8).
pub fn resolve_routing_token(headers: &HeaderMap, path: &str) -> Option<RoutingToken> {
    if let Some(v) = cookie_value(headers, ROUTING_COOKIE) {
        return Some(RoutingToken(v.to_string()));
    }
    if let Some(v) = headers.get(ROUTING_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(RoutingToken(v.to_string()));
    }
    None
}

fn not_ready_response(step: crate::model::SessionState, percent: u8) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(json!({"error": "not-ready", "step": step, "percent": percent})),
    )
        .into_response()
}

fn no_session_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        axum::Json(json!({"error": "no-session"})),
    )
        .into_response()
}

/// `/@*` handler: resolves the target VM and forwards the request.
pub async fn gateway_handler<P: ProviderClient + 'static>(
    State(state): State<Arc<GatewayState<P>>>,
    req: Request<Body>,
) -> Response {
    let path = req.uri().path().to_string();

    let handle = if let Some(token) = resolve_routing_token(req.headers(), &path) {
        state.registry.find_by_machine_id(token.machine_id())
    } else if let Some(project_id) = parse_url_prefix_project_id(&path) {
        state.registry.get(&project_id)
    } else {
        None
    };

    let Some(handle) = handle else {
        return no_session_response();
    };

    if handle.state() != crate::model::SessionState::Ready {
        let (step, percent) = crate::session::not_ready_details(&handle);
        return not_ready_response(step, percent);
    }

    let Some(machine_id) = handle.machine_id() else {
        return no_session_response();
    };
    let target_port = handle.default_port();
    handle.touch();

    match forward(&state.agent_base_url, &machine_id, target_port, req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(machine_id, "gateway forward failed: {}", e);
            (StatusCode::BAD_GATEWAY, "downstream request failed").into_response()
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"))
        .unwrap_or(false)
}

/// Forwards `req` to `machine_id`'s VM, passing WebSocket upgrades through
/// transparently and otherwise buffering the body (mirrors the teacher's
/// `forward_request`/`build_response` pair in `proxy.rs`).
async fn forward(
    agent_base_url: &str,
    machine_id: &str,
    target_port: Option<u16>,
    mut req: Request<Body>,
) -> anyhow::Result<Response> {
    let is_upgrade = is_websocket_upgrade(req.headers());
    let client_upgrade = is_upgrade.then(|| hyper::upgrade::on(&mut req));

    let (mut parts, body) = req.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    parts.headers.insert(
        HeaderName::from_bytes(FORCE_INSTANCE_HEADER.as_bytes())?,
        HeaderValue::from_str(machine_id)?,
    );
    if let Some(port) = target_port {
        parts.headers.insert(
            HeaderName::from_bytes(TARGET_PORT_HEADER.as_bytes())?,
            HeaderValue::from_str(&port.to_string())?,
        );
    }
    let path_and_query = parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let uri: hyper::Uri = format!("{agent_base_url}{path_and_query}").parse()?;
    parts.uri = uri;
    if is_upgrade {
        parts
            .headers
            .insert(axum::http::header::CONNECTION, HeaderValue::from_static("upgrade"));
    }

    let client: Client<HttpConnector> = Client::new();
    let mut resp = client.request(Request::from_parts(parts, body)).await?;

    let upstream_upgrade = (is_upgrade && resp.status() == StatusCode::SWITCHING_PROTOCOLS)
        .then(|| hyper::upgrade::on(&mut resp));

    let (mut resp_parts, resp_body) = resp.into_parts();
    strip_hop_by_hop(&mut resp_parts.headers);
    let response = Response::from_parts(resp_parts, axum::body::boxed(resp_body));

    if let (Some(client_upgrade), Some(upstream_upgrade)) = (client_upgrade, upstream_upgrade) {
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client_io, upstream_io)) => {
                    if let Err(e) = splice_upgraded(client_io, upstream_io).await {
                        warn!("websocket splice error: {}", e);
                    }
                }
                Err(e) => warn!("websocket upgrade handshake failed: {}", e),
            }
        });
    }

    Ok(response)
}

/// Pipes bytes bidirectionally between two already-upgraded connections,
/// used once both sides have completed the WebSocket handshake.
async fn splice_upgraded(a: Upgraded, b: Upgraded) -> std::io::Result<()> {
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);
    let client_to_server = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = ar.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            bw.write_all(&buf[..n]).await?;
        }
        bw.shutdown().await
    };
    let server_to_client = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = br.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            aw.write_all(&buf[..n]).await?;
        }
        aw.shutdown().await
    };
    tokio::try_join!(client_to_server, server_to_client)?;
    Ok(())
}
