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

//! Cache Fabric (C3): cache-master election and the tiered dependency
//! restore protocol (§4.3). Tier 2 downloads the current Cache Archive from
//! the elected cache master through this process (not a VM-to-VM shell
//! pipeline) so it can be sha256/zstd-verified in one place before the
//! bytes are handed to the worker's `/upload` + `/exec`; see DESIGN.md.

pub mod archive;

use crate::agent::{AgentClient, ExecCommand};
use crate::error::{CoreError, Result};
use crate::model::{DetectedProject, Vm, VmRole};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const TIER2_FAILURE_WINDOW: Duration = Duration::from_secs(5 * 60);
const TIER2_FAILURE_THRESHOLD: usize = 5;
const TIER2_COOLDOWN: Duration = Duration::from_secs(60);
const TIER2_TIMEOUT: Duration = Duration::from_secs(3 * 60);
const CACHE_STORE_PATH: &str = "/home/app/.cache/package-store";

/// Which tier satisfied a dependency restore. Used for the cache-tier-usage
/// metric (§4.9) and for orchestrator logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierOutcome {
    Tier1Skip,
    Tier2Peer,
    Tier3ObjectStorage,
    Tier4Fresh,
}

/// Sliding-window breaker for Tier 2, mirroring the teacher's
/// `LATENCY_FAILS` map-of-instants pattern generalized to a single counter:
/// more than `TIER2_FAILURE_THRESHOLD` failures within `TIER2_FAILURE_WINDOW`
/// opens the breaker for `TIER2_COOLDOWN`.
pub struct Tier2Breaker {
    failures: Mutex<VecDeque<Instant>>,
    opened_until: Mutex<Option<Instant>>,
}

impl Default for Tier2Breaker {
    fn default() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            opened_until: Mutex::new(None),
        }
    }
}

impl Tier2Breaker {
    pub fn is_available(&self) -> bool {
        match *self.opened_until.lock().unwrap() {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock().unwrap();
        failures.push_back(now);
        while let Some(front) = failures.front() {
            if now.duration_since(*front) > TIER2_FAILURE_WINDOW {
                failures.pop_front();
            } else {
                break;
            }
        }
        if failures.len() > TIER2_FAILURE_THRESHOLD {
            *self.opened_until.lock().unwrap() = Some(now + TIER2_COOLDOWN);
            warn!(
                failures = failures.len(),
                "tier 2 exceeded failure threshold, opening breaker for {:?}", TIER2_COOLDOWN
            );
        }
    }

    pub fn record_success(&self) {
        self.failures.lock().unwrap().clear();
        *self.opened_until.lock().unwrap() = None;
    }
}

/// Elects the cache master as the smallest `machine_id` among VMs labelled
/// `role = cache-master`.
pub fn elect_cache_master(vms: &[Vm]) -> Option<&Vm> {
    vms.iter()
        .filter(|v| v.role == VmRole::CacheMaster)
        .min_by(|a, b| a.machine_id.cmp(&b.machine_id))
}

/// Runs the tiered dependency restore protocol for one project on one
/// worker VM. `package_json_hash` is the SHA-256 of the project's current
/// `package.json`.
pub async fn restore_dependencies(
    worker: &AgentClient,
    worker_vm: &Vm,
    cache_master: Option<&AgentClient>,
    breaker: &Tier2Breaker,
    detected: &DetectedProject,
    package_json_hash: &str,
    tier2_enabled: bool,
    tier3_url: Option<&str>,
    cancel: &CancellationToken,
) -> Result<TierOutcome> {
    // Tier 1: module reuse.
    if worker_vm.preserved_modules_hash.as_deref() == Some(package_json_hash) {
        info!(machine_id = %worker_vm.machine_id, "tier 1 hit, skipping install");
        return Ok(TierOutcome::Tier1Skip);
    }

    // Tier 2: peer download from the cache master.
    if tier2_enabled && breaker.is_available() {
        if let Some(master) = cache_master {
            match tier2_restore(worker, master, cancel).await {
                Ok(()) => {
                    breaker.record_success();
                    run_install(worker, detected, true, package_json_hash, cancel).await?;
                    return Ok(TierOutcome::Tier2Peer);
                }
                Err(e) => {
                    breaker.record_failure();
                    warn!("tier 2 peer download failed: {}", e);
                }
            }
        }
    }

    // Tier 3: object-storage fallback.
    if let Some(url) = tier3_url {
        match tier3_restore(worker, url, cancel).await {
            Ok(()) => {
                run_install(worker, detected, true, package_json_hash, cancel).await?;
                return Ok(TierOutcome::Tier3ObjectStorage);
            }
            Err(e) => warn!("tier 3 object-storage download failed: {}", e),
        }
    }

    // Tier 4: fresh install against the public registry.
    run_install(worker, detected, false, package_json_hash, cancel).await?;
    Ok(TierOutcome::Tier4Fresh)
}

async fn tier2_restore(worker: &AgentClient, master: &AgentClient, cancel: &CancellationToken) -> Result<()> {
    let archive_type = "pnpm";
    let bytes = tokio::time::timeout(TIER2_TIMEOUT, master.download(archive_type))
        .await
        .map_err(|_| CoreError::CacheFetch {
            stage: "http".into(),
            message: "tier 2 download timed out".into(),
        })??;

    let decompressed = archive::decompress_verified(&bytes)?;

    worker
        .upload(
            bytes::Bytes::from(decompressed),
            &format!("{CACHE_STORE_PATH}.tar"),
        )
        .await
        .map_err(|e| CoreError::CacheFetch {
            stage: "extract".into(),
            message: e.to_string(),
        })?;

    let extract_cmd = ExecCommand::new(vec![
        "tar".to_string(),
        "-xf".to_string(),
        format!("{CACHE_STORE_PATH}.tar"),
        "-C".to_string(),
        CACHE_STORE_PATH.to_string(),
    ])
    .timeout_ms(TIER2_TIMEOUT.as_millis() as u64);

    let result = worker.exec_cancellable(&extract_cmd, cancel).await.map_err(|e| CoreError::CacheFetch {
        stage: "extract".into(),
        message: e.to_string(),
    })?;

    if result.exit_code != 0 {
        return Err(CoreError::CacheFetch {
            stage: "extract".into(),
            message: format!("tar exited with code {}", result.exit_code),
        });
    }
    Ok(())
}

async fn tier3_restore(worker: &AgentClient, url: &str, cancel: &CancellationToken) -> Result<()> {
    let bytes = fetch_object_storage_url(url).await?;
    let decompressed = archive::decompress_verified(&bytes)?;

    worker
        .upload(
            bytes::Bytes::from(decompressed),
            &format!("{CACHE_STORE_PATH}.tar"),
        )
        .await
        .map_err(|e| CoreError::CacheFetch {
            stage: "extract".into(),
            message: e.to_string(),
        })?;

    let extract_cmd = ExecCommand::new(vec![
        "tar".to_string(),
        "-xf".to_string(),
        format!("{CACHE_STORE_PATH}.tar"),
        "-C".to_string(),
        CACHE_STORE_PATH.to_string(),
    ]);
    let result = worker.exec_cancellable(&extract_cmd, cancel).await.map_err(|e| CoreError::CacheFetch {
        stage: "extract".into(),
        message: e.to_string(),
    })?;
    if result.exit_code != 0 {
        return Err(CoreError::CacheFetch {
            stage: "extract".into(),
            message: format!("tar exited with code {}", result.exit_code),
        });
    }
    Ok(())
}

async fn fetch_object_storage_url(url: &str) -> Result<bytes::Bytes> {
    let https = hyper_rustls::HttpsConnector::with_native_roots();
    let client: hyper::Client<_, hyper::Body> = hyper::Client::builder().build(https);
    let req = hyper::Request::get(url)
        .body(hyper::Body::empty())
        .map_err(|e| CoreError::CacheFetch {
            stage: "http".into(),
            message: e.to_string(),
        })?;

    let resp = tokio::time::timeout(TIER2_TIMEOUT, client.request(req))
        .await
        .map_err(|_| CoreError::CacheFetch {
            stage: "http".into(),
            message: "tier 3 download timed out".into(),
        })?
        .map_err(|e| CoreError::CacheFetch {
            stage: "http".into(),
            message: e.to_string(),
        })?;

    if !resp.status().is_success() {
        return Err(CoreError::CacheFetch {
            stage: "http".into(),
            message: format!("tier 3 endpoint returned {}", resp.status()),
        });
    }

    hyper::body::to_bytes(resp.into_body())
        .await
        .map_err(|e| CoreError::CacheFetch {
            stage: "http".into(),
            message: e.to_string(),
        })
}

async fn run_install(
    worker: &AgentClient,
    detected: &DetectedProject,
    prefer_offline: bool,
    package_json_hash: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    for step in &detected.install_command {
        let mut argv = step.clone();
        if prefer_offline && argv.first().map(String::as_str) == Some("pnpm") {
            argv.push("--prefer-offline".to_string());
        }
        let cmd = ExecCommand::new(argv).timeout_ms(300_000);
        let result = worker
            .exec_cancellable(&cmd, cancel)
            .await
            .map_err(|e| CoreError::InstallFailed(e.to_string()))?;
        if result.exit_code != 0 {
            let tail = tail_bytes(&result.stderr, 2048);
            error!(exit_code = result.exit_code, "install command failed");
            return Err(CoreError::InstallFailed(tail));
        }
    }
    write_modules_hash_sentinel(worker, package_json_hash, cancel).await
}

/// Writes the `.package-json-hash` sentinel the VM pool's `cleanup` reads
/// back into `Vm::preserved_modules_hash`, so a future `acquire` of this same
/// VM can hit Tier 1 instead of reinstalling.
async fn write_modules_hash_sentinel(
    worker: &AgentClient,
    package_json_hash: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let cmd = ExecCommand::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo -n {package_json_hash} > {}/.package-json-hash", crate::pool::PROJECT_ROOT),
    ])
    .timeout_ms(5_000);
    let result = worker
        .exec_cancellable(&cmd, cancel)
        .await
        .map_err(|e| CoreError::InstallFailed(e.to_string()))?;
    if result.exit_code != 0 {
        return Err(CoreError::InstallFailed(format!(
            "failed to write dependency sentinel: exit code {}",
            result.exit_code
        )));
    }
    Ok(())
}

fn tail_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s[s.len() - max..].to_string()
    }
}
