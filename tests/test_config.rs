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

use preview_core::config::Config;
use std::fs;

fn write_temp_yaml(filename: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(filename);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().to_string()
}

const BASE_YAML: &str = r#"
app_id: preview-core-test
provider_api_base_url: http://provider.test
agent_base_url: http://agent.test
vm_image: preview-vm:latest
vm_region: iad
pool:
  target: 4
  min: 2
  max: 10
session: {}
limits: {}
cache:
  tier2_enabled: true
storage_backend: local
"#;

#[test]
fn loads_a_minimal_valid_config_with_defaults_applied() {
    let path = write_temp_yaml("preview-core-valid.yaml", BASE_YAML);
    let config = Config::from_file(&path).expect("config should load");

    assert_eq!(config.app_id, "preview-core-test");
    assert_eq!(config.pool.target, 4);
    assert_eq!(config.session.idle_timeout_sec, 60 * 60, "idle timeout defaults to 60 minutes");
    assert_eq!(config.gateway_port, 8080);
    assert_eq!(config.admin_port, 8081);
    assert!(!config.cache.tier3_enabled, "tier3 defaults to disabled");
}

#[test]
fn rejects_pool_min_greater_than_max() {
    let yaml = BASE_YAML.replace("min: 2", "min: 20");
    let path = write_temp_yaml("preview-core-bad-pool.yaml", &yaml);
    let err = Config::from_file(&path).expect_err("pool.min > pool.max must fail validation");
    assert!(err.to_string().contains("pool.min"));
}

#[test]
fn rejects_tier3_enabled_without_a_url() {
    let yaml = BASE_YAML.replace("tier2_enabled: true", "tier2_enabled: true\n  tier3_enabled: true");
    let path = write_temp_yaml("preview-core-bad-tier3.yaml", &yaml);
    let err = Config::from_file(&path).expect_err("tier3_enabled without tier3_url must fail");
    assert!(err.to_string().contains("tier3_url"));
}

#[test]
fn rejects_gcs_backend_without_a_bucket() {
    let yaml = BASE_YAML.replace("storage_backend: local", "storage_backend: gcs");
    let path = write_temp_yaml("preview-core-bad-gcs.yaml", &yaml);
    let err = Config::from_file(&path).expect_err("gcs backend without gcs_bucket must fail");
    assert!(err.to_string().contains("gcs_bucket"));
}

#[test]
fn missing_file_is_an_error_not_a_panic() {
    let err = Config::from_file("/nonexistent/preview-core-config.yaml");
    assert!(err.is_err());
}
