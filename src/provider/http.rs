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

use super::{CreateMachineRequest, Machine, MachineState, ProviderClient, RetryConfig};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request};
use hyper_rustls::HttpsConnector;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

enum Transport {
    Plain(Client<HttpConnector>),
    Tls(Client<HttpsConnector<HttpConnector>>),
}

impl Transport {
    fn for_base_url(base_url: &str) -> Self {
        if base_url.starts_with("https://") {
            let https = HttpsConnector::with_native_roots();
            Transport::Tls(Client::builder().build(https))
        } else {
            Transport::Plain(Client::new())
        }
    }

    async fn request(&self, req: Request<Body>) -> std::result::Result<hyper::Response<Body>, hyper::Error> {
        match self {
            Transport::Plain(c) => c.request(req).await,
            Transport::Tls(c) => c.request(req).await,
        }
    }
}

/// Real HTTP-backed implementation of the Provider Client, built over a
/// shared `hyper` client (the same transport used for Agent calls). All
/// calls honour a 30s-per-attempt timeout and the §4.1 retry policy.
pub struct HttpProviderClient {
    base_url: String,
    transport: Transport,
    retry: RetryConfig,
}

impl HttpProviderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            transport: Transport::for_base_url(&base_url),
            base_url,
            retry: RetryConfig::default(),
        }
    }

    async fn send(&self, method: Method, path: &str, body: Body) -> Result<(u16, Vec<u8>)> {
        let uri = format!("{}{}", self.base_url, path);
        let req = Request::builder()
            .method(method)
            .uri(&uri)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|e| CoreError::ProviderApi {
                status: 0,
                message: format!("failed to build request: {e}"),
            })?;

        let resp = timeout(Duration::from_secs(30), self.transport.request(req))
            .await
            .map_err(|_| CoreError::NetworkTimeout(format!("provider call to {uri} timed out")))?
            .map_err(|e| CoreError::NetworkDns(e.to_string()))?;

        let status = resp.status().as_u16();
        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .unwrap_or_default();

        if status == 401 || status == 403 {
            return Err(CoreError::Auth(format!(
                "provider rejected credentials (status {status})"
            )));
        }
        if status >= 400 && status != 429 {
            return Err(CoreError::ProviderApi {
                status,
                message: String::from_utf8_lossy(&bytes).to_string(),
            });
        }
        if status == 429 || status >= 500 {
            return Err(CoreError::ProviderApi {
                status,
                message: String::from_utf8_lossy(&bytes).to_string(),
            });
        }

        Ok((status, bytes))
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn create_machine(&self, req: CreateMachineRequest) -> Result<Machine> {
        let payload = serde_json::json!({
            "name": req.name,
            "image": req.image,
            "env": req.env,
            "region": req.region,
            "resources": { "cpus": req.resources.cpus, "memory_mb": req.resources.memory_mb },
        });
        let body_str = serde_json::to_vec(&payload).expect("json encode");
        let name = req.name.clone();

        let result = super::retry_with_backoff(self.retry, || {
            let body = Body::from(body_str.clone());
            async { self.send(Method::POST, "/machines", body).await }
        })
        .await;

        match result {
            Ok((_, bytes)) => {
                let machine: Machine = serde_json::from_slice(&bytes)
                    .map_err(|e| CoreError::Parse(format!("malformed create_machine response: {e}")))?;
                info!(machine_id = %machine.id, "created machine");
                Ok(machine)
            }
            Err(CoreError::ProviderApi { status, message }) if status == 409 => {
                error!(name = %name, "machine with this name already exists");
                Err(CoreError::ProviderApi { status, message })
            }
            Err(e) => Err(e),
        }
    }

    async fn start(&self, machine_id: &str) -> Result<()> {
        super::retry_with_backoff(self.retry, || async {
            self.send(
                Method::POST,
                &format!("/machines/{machine_id}/start"),
                Body::empty(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn stop(&self, machine_id: &str) -> Result<()> {
        super::retry_with_backoff(self.retry, || async {
            self.send(
                Method::POST,
                &format!("/machines/{machine_id}/stop"),
                Body::empty(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn destroy(&self, machine_id: &str) -> Result<()> {
        super::retry_with_backoff(self.retry, || async {
            self.send(
                Method::DELETE,
                &format!("/machines/{machine_id}"),
                Body::empty(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn wait_for_state(
        &self,
        machine_id: &str,
        target: MachineState,
        timeout_dur: Duration,
    ) -> Result<Machine> {
        let deadline = Instant::now() + timeout_dur;
        loop {
            let (_, bytes) = self
                .send(Method::GET, &format!("/machines/{machine_id}"), Body::empty())
                .await?;
            let machine: Machine = serde_json::from_slice(&bytes)
                .map_err(|e| CoreError::Parse(format!("malformed machine response: {e}")))?;
            if machine.state == target {
                return Ok(machine);
            }
            if Instant::now() >= deadline {
                return Err(CoreError::NetworkTimeout(format!(
                    "machine {machine_id} did not reach {target:?} within {timeout_dur:?}"
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn list_machines(&self) -> Result<Vec<Machine>> {
        let (_, bytes) = super::retry_with_backoff(self.retry, || async {
            self.send(Method::GET, "/machines", Body::empty()).await
        })
        .await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::Parse(format!("malformed list_machines response: {e}")))
    }
}
