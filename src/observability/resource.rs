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

//! Per-VM resource monitor (§4.9): samples memory and disk usage on every
//! in-use VM through the Agent's `/exec` surface and alerts when a VM
//! crosses 90% memory or 85% disk.

use crate::agent::{AgentClient, ExecCommand};
use crate::pool::Pool;
use crate::provider::ProviderClient;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const MONITOR_TICK: Duration = Duration::from_secs(5 * 60);
const MEMORY_THRESHOLD_PERCENT: u64 = 90;
const DISK_THRESHOLD_PERCENT: u64 = 85;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmResourceSample {
    pub memory_used_percent: u64,
    pub disk_used_percent: u64,
}

/// Runs `free -m` and `df -P` on `agent`'s VM and parses the usage
/// percentages out of their fixed-width output.
pub async fn sample(agent: &AgentClient) -> crate::error::Result<VmResourceSample> {
    let cmd = ExecCommand::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        "free -m | awk '/Mem:/ {print $3\" \"$2}'; df -P /home/app | awk 'NR==2 {print $5}'".to_string(),
    ])
    .timeout_ms(10_000);

    let result = agent.exec(&cmd).await?;
    let mut lines = result.stdout.lines();

    let memory_used_percent = lines
        .next()
        .and_then(|line| {
            let mut parts = line.split_whitespace();
            let used: u64 = parts.next()?.parse().ok()?;
            let total: u64 = parts.next()?.parse().ok()?;
            if total == 0 {
                None
            } else {
                Some(used * 100 / total)
            }
        })
        .unwrap_or(0);

    let disk_used_percent = lines
        .next()
        .and_then(|line| line.trim_end_matches('%').parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VmResourceSample {
        memory_used_percent,
        disk_used_percent,
    })
}

/// Whether `sample` crosses either alerting threshold.
pub fn over_threshold(sample: &VmResourceSample) -> bool {
    sample.memory_used_percent >= MEMORY_THRESHOLD_PERCENT
        || sample.disk_used_percent >= DISK_THRESHOLD_PERCENT
}

/// Spawns the background resource monitor, stopped via `cancel`. Samples
/// every VM the pool currently has in use once per tick.
pub fn spawn_monitor<P: ProviderClient + 'static>(
    pool: Arc<Pool<P>>,
    agent_base_url: String,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(MONITOR_TICK);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for vm in pool.in_use_vms() {
                        let agent = AgentClient::new(agent_base_url.clone(), vm.machine_id.clone());
                        match sample(&agent).await {
                            Ok(s) if over_threshold(&s) => {
                                warn!(
                                    machine_id = %vm.machine_id,
                                    memory_used_percent = s.memory_used_percent,
                                    disk_used_percent = s.disk_used_percent,
                                    "vm resource usage over threshold"
                                );
                                let code = if s.memory_used_percent >= MEMORY_THRESHOLD_PERCENT {
                                    "out-of-memory"
                                } else {
                                    "disk-full"
                                };
                                super::alerts::record_error(code, 1);
                            }
                            Ok(_) => {}
                            Err(e) => warn!(machine_id = %vm.machine_id, "resource sample failed: {}", e),
                        }
                    }
                }
            }
        }
    });
}
