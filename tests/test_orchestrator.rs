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
    use axum::extract::Query;
    use axum::response::{IntoResponse, Json};
    use axum::routing::{get, post};
    use axum::Router;
    use preview_core::config;
    use preview_core::error::Result;
    use preview_core::model::{MachineEnv, Project, ProjectFile};
    use preview_core::orchestrator::{Orchestrator, ProgressEventKind};
    use preview_core::pool::Pool;
    use preview_core::provider::{CreateMachineRequest, Machine, MachineState, ProviderClient};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct FakeProvider {
        counter: AtomicU32,
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

    async fn spawn_fake_agent() -> String {
        let app = Router::new()
            .route("/health", get(|| async { Json(json!({"version": "1.0", "uptime_s": 5})) }))
            .route(
                "/exec",
                post(|| async { Json(json!({"exit_code": 0, "stdout": "", "stderr": ""})) }),
            )
            .route(
                "/extract",
                post(|| async { Json(json!({"files_extracted": 1, "bytes": 10})) }),
            )
            .route("/upload", post(|| async { axum::http::StatusCode::OK }))
            .route(
                "/",
                get(|Query(_params): Query<HashMap<String, String>>| async {
                    axum::http::StatusCode::OK.into_response()
                }),
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

    fn test_config() -> config::Config {
        config::Config {
            app_id: "orchestrator-test".into(),
            provider_api_base_url: "http://provider.test".into(),
            agent_base_url: "unused".into(),
            vm_image: "img".into(),
            vm_region: "iad".into(),
            pool: config::PoolConfig {
                target: 1,
                min: 1,
                max: 2,
                max_age_sec: 7200,
            },
            session: config::SessionConfig {
                idle_timeout_sec: 3600,
            },
            cache: config::CacheConfig {
                tier2_enabled: false,
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

    fn vite_project() -> Project {
        Project {
            project_id: "proj-1".into(),
            files: vec![
                ProjectFile {
                    path: "package.json".into(),
                    content: br#"{"name":"app","scripts":{"dev":"vite"},"dependencies":{"vite":"5.0.0"}}"#.to_vec(),
                    mode: 0o644,
                },
                ProjectFile {
                    path: "vite.config.js".into(),
                    content: b"export default defineConfig({})".to_vec(),
                    mode: 0o644,
                },
                ProjectFile {
                    path: "index.html".into(),
                    content: b"<html></html>".to_vec(),
                    mode: 0o644,
                },
            ],
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_ready_and_emits_full_event_sequence() {
        config::install_for_test(test_config());
        let base_url = spawn_fake_agent().await;
        let provider = Arc::new(FakeProvider { counter: AtomicU32::new(0) });
        let pool = Arc::new(Pool::new(provider.clone(), base_url.clone(), "img".into(), "iad".into()));
        let orchestrator = Orchestrator::new(pool, provider, base_url);

        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let outcome = orchestrator.run(vite_project(), tx, cancel).await.unwrap();

        assert!(outcome.preview_url.contains(&outcome.vm.machine_id));

        let mut saw_ready = false;
        while let Ok(event) = rx.try_recv() {
            if event.kind == ProgressEventKind::Ready {
                saw_ready = true;
            }
        }
        assert!(saw_ready);
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_without_acquiring_a_vm() {
        config::install_for_test(test_config());
        let base_url = spawn_fake_agent().await;
        let provider = Arc::new(FakeProvider { counter: AtomicU32::new(0) });
        let pool = Arc::new(Pool::new(provider.clone(), base_url.clone(), "img".into(), "iad".into()));
        let orchestrator = Orchestrator::new(pool.clone(), provider, base_url);

        let (tx, _rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator.run(vite_project(), tx, cancel).await;
        assert!(result.is_err());
        assert_eq!(pool.in_use_count(), 0);
    }
}
