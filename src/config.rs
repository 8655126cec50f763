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

use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::{error::Error, fs, sync::Arc, sync::RwLock};

/// Pool sizing and lifetime knobs (§4.4).
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Preferred number of warm VMs to keep available.
    pub target: usize,
    /// Never let `available + replenishing` drop below this.
    pub min: usize,
    /// Never let `available + in_use` exceed this via replenishment.
    pub max: usize,
    /// Destroy a pool-member VM once it has lived this long, regardless of health.
    #[serde(default = "default_max_age_sec")]
    pub max_age_sec: u64,
}

fn default_max_age_sec() -> u64 {
    2 * 60 * 60
}

/// Preview-session lifetime knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Idle sessions are released after this many seconds of no gateway traffic.
    #[serde(default = "default_idle_timeout_sec")]
    pub idle_timeout_sec: u64,
}

fn default_idle_timeout_sec() -> u64 {
    60 * 60
}

/// Dependency-restore cache fabric knobs (§4.3).
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Whether Tier 2 (peer download from the cache master) is attempted at all.
    #[serde(default = "default_true")]
    pub tier2_enabled: bool,
    /// Whether Tier 3 (object-storage fallback) is attempted. Global, not per-project
    /// (see SPEC_FULL.md §9 open-question resolution).
    #[serde(default)]
    pub tier3_enabled: bool,
    /// Object-storage URL serving the same Cache Archive as the cache master, used by Tier 3.
    pub tier3_url: Option<String>,
    /// zstd compression level used when building a fresh Cache Archive.
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

fn default_true() -> bool {
    true
}

fn default_zstd_level() -> i32 {
    1
}

/// File-sync limits (§4.5).
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    /// Files larger than this are excluded from the sync archive.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Ceiling on how long archive construction/upload may take.
    #[serde(default = "default_archive_timeout_sec")]
    pub archive_timeout_sec: u64,
}

fn default_max_file_bytes() -> u64 {
    25 * 1024 * 1024
}

fn default_archive_timeout_sec() -> u64 {
    120
}

/// Alerting knobs for the observability layer (§4.9, §7).
#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    #[serde(default = "default_alert_rate")]
    pub rate_per_5min: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            rate_per_5min: default_alert_rate(),
        }
    }
}

fn default_alert_rate() -> u32 {
    5
}

/// Supported persistent storage backends for the Cache Fabric's Tier 3 fallback
/// and for Cache Archives that outlive any single VM.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    S3,
    Azure,
    Local,
}

/// Top-level configuration loaded from a YAML file at process start and
/// reloaded on SIGHUP (see SPEC_FULL.md §2.1).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Application identifier, used for namespacing cache keys, logs and storage prefixes.
    pub app_id: String,

    /// Base URL of the micro-VM provider's API.
    pub provider_api_base_url: String,
    /// Base URL through which Agent HTTP calls are routed (provider edge).
    pub agent_base_url: String,
    /// VM image reference used when creating new machines.
    pub vm_image: String,
    /// Region passed to the provider when creating machines.
    pub vm_region: String,

    pub pool: PoolConfig,
    pub session: SessionConfig,
    pub cache: CacheConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Backend used to persist Cache Archives and serve Tier 3 downloads.
    pub storage_backend: StorageBackend,
    pub gcs_bucket: Option<String>,
    pub s3_bucket: Option<String>,
    pub azure_container: Option<String>,

    /// Port the public gateway/preview-API HTTP surface binds to.
    #[serde(default = "default_gateway_port")]
    pub gateway_port: u16,
    /// Port the admin + metrics HTTP surface binds to.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_admin_port() -> u16 {
    8081
}

/// Global, swappable configuration slot. Reads take a short read lock; a
/// SIGHUP reload takes the write lock only after the replacement config has
/// already validated successfully, so a bad reload never disturbs the
/// running configuration.
pub static CONFIG: OnceCell<RwLock<Arc<Config>>> = OnceCell::new();

impl Config {
    /// Parses and validates configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn Error>> {
        let contents = fs::read_to_string(path)?;
        let parsed: Config = serde_yaml::from_str(&contents)?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<(), Box<dyn Error>> {
        if self.app_id.trim().is_empty() {
            return Err("app_id is required and cannot be empty.".into());
        }

        match self.storage_backend {
            StorageBackend::Gcs if self.gcs_bucket.as_deref().unwrap_or("").trim().is_empty() => {
                return Err("GCS backend selected but gcs_bucket is empty.".into());
            }
            StorageBackend::S3 if self.s3_bucket.as_deref().unwrap_or("").trim().is_empty() => {
                return Err("S3 backend selected but s3_bucket is empty.".into());
            }
            StorageBackend::Azure
                if self
                    .azure_container
                    .as_deref()
                    .unwrap_or("")
                    .trim()
                    .is_empty() =>
            {
                return Err("Azure backend selected but azure_container is empty.".into());
            }
            _ => {}
        }

        if self.pool.min > self.pool.max {
            return Err("pool.min must be <= pool.max.".into());
        }
        if self.pool.target < self.pool.min || self.pool.target > self.pool.max {
            return Err("pool.target must be between pool.min and pool.max.".into());
        }
        if self.cache.tier3_enabled && self.cache.tier3_url.is_none() {
            return Err("cache.tier3_enabled is true but cache.tier3_url is unset.".into());
        }

        Ok(())
    }
}

/// Installs the initial configuration. Panics if called twice; the process
/// entry point is the only caller.
pub fn install(config: Config) {
    CONFIG
        .set(RwLock::new(Arc::new(config)))
        .ok()
        .expect("CONFIG was already initialized");
}

/// Returns the currently active configuration.
pub fn current() -> Arc<Config> {
    CONFIG
        .get()
        .expect("CONFIG not initialized")
        .read()
        .expect("CONFIG lock poisoned")
        .clone()
}

/// Re-reads `path`, validates it, and swaps it in as the active config.
/// Leaves the previous config in effect if reloading fails.
pub fn reload(path: &str) -> Result<(), Box<dyn Error>> {
    let fresh = Config::from_file(path)?;
    let slot = CONFIG.get().expect("CONFIG not initialized");
    let mut guard = slot.write().expect("CONFIG lock poisoned");
    tracing::info!("configuration reloaded from '{}'", path);
    *guard = Arc::new(fresh);
    Ok(())
}

/// Test-only config installer used by the integration suite under `tests/`
/// to seed a fresh config per test (each test process shares one `CONFIG`
/// cell, so later tests must be able to overwrite it).
pub fn install_for_test(config: Config) {
    let slot = CONFIG.get_or_init(|| RwLock::new(Arc::new(config.clone())));
    let mut guard = slot.write().unwrap();
    *guard = Arc::new(config);
}
