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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::response::{IntoResponse, Json};
    use axum::routing::{get, post};
    use axum::Router;
    use preview_core::config;
    use preview_core::error::Result;
    use preview_core::model::MachineEnv;
    use preview_core::pool::{Pool, ReleaseOutcome};
    use preview_core::provider::{CreateMachineRequest, Machine, MachineState, ProviderClient};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct FakeProvider {
        counter: AtomicU32,
        #[allow(dead_code)]
        agent_base_url: String,
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        async fn create_machine(&self, req: CreateMachineRequest) -> Result<Machine> {
            let id = format!("m-{}", self.counter.fetch_add(1, Ordering::SeqCst));
            Ok(Machine {
                id,
                name: req.name,
                state: MachineState::Started,
                env: req.env,
                region: req.region,
            })
        }
        async fn start(&self, _machine_id: &str) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _machine_id: &str) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self, _machine_id: &str) -> Result<()> {
            Ok(())
        }
        async fn wait_for_state(
            &self,
            machine_id: &str,
            _target: MachineState,
            _timeout: Duration,
        ) -> Result<Machine> {
            Ok(Machine {
                id: machine_id.to_string(),
                name: machine_id.to_string(),
                state: MachineState::Started,
                env: MachineEnv::new(),
                region: "iad".into(),
            })
        }
        async fn list_machines(&self) -> Result<Vec<Machine>> {
            Ok(vec![])
        }
    }

    async fn spawn_fake_agent(healthy: bool) -> String {
        let app = Router::new()
            .route(
                "/health",
                get(move || async move {
                    if healthy {
                        Json(json!({"version": "1.0", "uptime_s": 5})).into_response()
                    } else {
                        axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response()
                    }
                }),
            )
            .route(
                "/exec",
                post(|| async { Json(json!({"exit_code": 0, "stdout": "0", "stderr": ""})) }),
            );
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::Server::from_tcp(listener)
                .unwrap()
                .serve(app.into_make_service())
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    fn test_pool_config() -> config::Config {
        config::Config {
            app_id: "pool-test".into(),
            provider_api_base_url: "http://provider.test".into(),
            agent_base_url: "unused".into(),
            vm_image: "img".into(),
            vm_region: "iad".into(),
            pool: config::PoolConfig {
                target: 2,
                min: 1,
                max: 3,
                max_age_sec: 7200,
            },
            session: config::SessionConfig {
                idle_timeout_sec: 3600,
            },
            cache: config::CacheConfig {
                tier2_enabled: true,
                tier3_enabled: false,
                tier3_url: None,
                zstd_level: 1,
            },
            limits: config::LimitsConfig {
                max_file_bytes: 1024 * 1024,
                archive_timeout_sec: 60,
            },
            alerts: config::AlertsConfig::default(),
            storage_backend: config::StorageBackend::Local,
            gcs_bucket: None,
            s3_bucket: None,
            azure_container: None,
            gateway_port: 0,
            admin_port: 0,
        }
    }

    #[tokio::test]
    async fn acquire_creates_vm_when_queue_empty_and_tracks_in_use() {
        config::install_for_test(test_pool_config());
        let base_url = spawn_fake_agent(true).await;
        let provider = Arc::new(FakeProvider {
            counter: AtomicU32::new(0),
            agent_base_url: base_url.clone(),
        });
        let pool = Pool::new(provider, base_url, "img".into(), "iad".into());

        let vm = pool.acquire("proj-1").await.unwrap();
        assert_eq!(vm.project_binding.as_deref(), Some("proj-1"));
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.available_count(), 0);
    }

    #[tokio::test]
    async fn release_returns_healthy_vm_to_available_tail() {
        config::install_for_test(test_pool_config());
        let base_url = spawn_fake_agent(true).await;
        let provider = Arc::new(FakeProvider {
            counter: AtomicU32::new(0),
            agent_base_url: base_url.clone(),
        });
        let pool = Pool::new(provider, base_url, "img".into(), "iad".into());

        let vm = pool.acquire("proj-1").await.unwrap();
        pool.release(vm, ReleaseOutcome::Ready).await;

        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }

    #[tokio::test]
    async fn failed_release_never_returns_to_available() {
        config::install_for_test(test_pool_config());
        let base_url = spawn_fake_agent(true).await;
        let provider = Arc::new(FakeProvider {
            counter: AtomicU32::new(0),
            agent_base_url: base_url.clone(),
        });
        let pool = Pool::new(provider, base_url, "img".into(), "iad".into());

        let vm = pool.acquire("proj-1").await.unwrap();
        pool.release(vm, ReleaseOutcome::Failed).await;

        assert_eq!(pool.available_count(), 0);
    }
}
