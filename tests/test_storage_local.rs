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
    use bytes::Bytes;
    use preview_core::config::{
        self, AlertsConfig, CacheConfig, Config, LimitsConfig, PoolConfig, SessionConfig, StorageBackend,
    };
    use preview_core::storage::local::{load, set_root_for_test, store};

    fn test_config(app_id: &str) -> Config {
        Config {
            app_id: app_id.to_string(),
            provider_api_base_url: "http://provider.test".into(),
            agent_base_url: "http://agent.test".into(),
            vm_image: "img".into(),
            vm_region: "iad".into(),
            pool: PoolConfig {
                target: 2,
                min: 1,
                max: 5,
                max_age_sec: 7200,
            },
            session: SessionConfig {
                idle_timeout_sec: 3600,
            },
            cache: CacheConfig {
                tier2_enabled: true,
                tier3_enabled: false,
                tier3_url: None,
                zstd_level: 1,
            },
            limits: LimitsConfig {
                max_file_bytes: 1024 * 1024,
                archive_timeout_sec: 60,
            },
            alerts: AlertsConfig::default(),
            storage_backend: StorageBackend::Local,
            gcs_bucket: None,
            s3_bucket: None,
            azure_container: None,
            gateway_port: 0,
            admin_port: 0,
        }
    }

    #[tokio::test]
    async fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        set_root_for_test(dir.path().to_path_buf());
        config::install_for_test(test_config("store-roundtrip"));

        let data = Bytes::from_static(b"archive-bytes");
        store("key-a", data.clone()).await;
        let loaded = load("key-a").await;
        assert_eq!(loaded, Some(data));
    }

    #[tokio::test]
    async fn load_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        set_root_for_test(dir.path().to_path_buf());
        config::install_for_test(test_config("store-missing"));

        assert_eq!(load("nonexistent-key").await, None);
    }
}
