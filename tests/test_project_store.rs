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
    use preview_core::config::{self, CacheConfig, Config, LimitsConfig, PoolConfig, SessionConfig, StorageBackend};
    use preview_core::error::CoreError;
    use preview_core::model::{Project, ProjectFile};
    use preview_core::project_store::{fetch_project, put_project};
    use preview_core::storage;

    fn test_config() -> Config {
        Config {
            app_id: "test".into(),
            provider_api_base_url: "http://provider.local".into(),
            agent_base_url: "http://agent.local".into(),
            vm_image: "img".into(),
            vm_region: "local".into(),
            pool: PoolConfig { target: 1, min: 0, max: 2, max_age_sec: 3600 },
            session: SessionConfig { idle_timeout_sec: 3600 },
            cache: CacheConfig { tier2_enabled: true, tier3_enabled: false, tier3_url: None, zstd_level: 1 },
            limits: LimitsConfig { max_file_bytes: 1024 * 1024, archive_timeout_sec: 60 },
            alerts: Default::default(),
            storage_backend: StorageBackend::Local,
            gcs_bucket: None,
            s3_bucket: None,
            azure_container: None,
            gateway_port: 0,
            admin_port: 0,
        }
    }

    #[tokio::test]
    async fn round_trips_a_project_through_the_document_store() {
        let dir = tempfile::tempdir().unwrap();
        storage::local::set_root_for_test(dir.path().to_path_buf());
        let mut cfg = test_config();
        cfg.app_id = "project-store-test".into();
        config::install_for_test(cfg);

        let project = Project {
            project_id: "alice/app".into(),
            files: vec![ProjectFile {
                path: "package.json".into(),
                content: br#"{"name":"app"}"#.to_vec(),
                mode: 0o644,
            }],
        };
        put_project(&project).await.unwrap();
        let fetched = fetch_project("alice/app").await.unwrap();
        assert_eq!(fetched.files.len(), 1);
        assert_eq!(fetched.files[0].path, "package.json");
    }

    #[tokio::test]
    async fn unknown_project_id_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        storage::local::set_root_for_test(dir.path().to_path_buf());
        let mut cfg = test_config();
        cfg.app_id = "project-store-missing-test".into();
        config::install_for_test(cfg);

        let err = fetch_project("nobody/nothing").await.unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedProject));
    }
}
