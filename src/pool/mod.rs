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

//! VM Pool (C4): warm pool sized between `min` and `max`, health-gated
//! allocation, release/cleanup, background replenishment, adoption and
//! eviction (§4.4).

use crate::agent::{AgentClient, ExecCommand};
use crate::config;
use crate::error::{CoreError, Result};
use crate::model::{MachineEnv, Vm, VmRole};
use crate::provider::{CreateMachineRequest, MachineState, ProviderClient, Resources};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const POOL_VM_PREFIX: &str = "pool-";
pub const PROJECT_ROOT: &str = "/home/app/project";
const MAX_PRESERVE_BYTES: u64 = 1024 * 1024 * 1024;
const REPLENISH_INTERVAL: Duration = Duration::from_secs(60);
const REPLENISH_HEALTH_DEADLINE: Duration = Duration::from_secs(5 * 60);
const MACHINE_CREATE_DEADLINE: Duration = Duration::from_secs(60);

/// Outcome a session reports when releasing its bound VM (§4.4, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Ready,
    Cancelled,
    Failed,
}

/// Bounded collection of pool-member VMs plus the in-use map (§3, §4.4).
pub struct Pool<P: ProviderClient> {
    provider: Arc<P>,
    agent_base_url: String,
    vm_image: String,
    vm_region: String,
    available: Mutex<VecDeque<Vm>>,
    in_use: Mutex<HashMap<String, Vm>>,
    replenishing: AtomicUsize,
}

impl<P: ProviderClient> Pool<P> {
    pub fn new(provider: Arc<P>, agent_base_url: String, vm_image: String, vm_region: String) -> Self {
        Self {
            provider,
            agent_base_url,
            vm_image,
            vm_region,
            available: Mutex::new(VecDeque::new()),
            in_use: Mutex::new(HashMap::new()),
            replenishing: AtomicUsize::new(0),
        }
    }

    fn agent_client(&self, vm: &Vm) -> AgentClient {
        AgentClient::new(self.agent_base_url.clone(), vm.machine_id.clone())
    }

    pub fn available_count(&self) -> usize {
        self.available.lock().unwrap().len()
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.lock().unwrap().len()
    }

    pub fn replenishing_count(&self) -> usize {
        self.replenishing.load(Ordering::SeqCst)
    }

    /// Snapshot of every VM currently bound to a session, used by the
    /// resource monitor to decide what to sample.
    pub fn in_use_vms(&self) -> Vec<Vm> {
        self.in_use.lock().unwrap().values().cloned().collect()
    }

    async fn probe_health(&self, vm: &mut Vm) -> bool {
        match self.agent_client(vm).health().await {
            Ok(_) => {
                vm.last_health_ok_at = Some(Utc::now());
                true
            }
            Err(e) => {
                warn!(machine_id = %vm.machine_id, "health probe failed: {}", e);
                false
            }
        }
    }

    async fn create_pool_vm(&self) -> Result<Vm> {
        let machine_id = format!("{POOL_VM_PREFIX}{}", uuid::Uuid::new_v4());
        let mut env = MachineEnv::new();
        env.insert("role".into(), "pool-member".into());

        let machine = self
            .provider
            .create_machine(CreateMachineRequest {
                name: machine_id.clone(),
                image: self.vm_image.clone(),
                env,
                region: self.vm_region.clone(),
                resources: Resources {
                    cpus: 1,
                    memory_mb: 1024,
                },
            })
            .await?;

        let machine = self
            .provider
            .wait_for_state(&machine.id, MachineState::Started, MACHINE_CREATE_DEADLINE)
            .await?;

        info!(machine_id = %machine.id, "created pool vm");
        Ok(Vm::new(machine.id, self.agent_base_url.clone(), VmRole::PoolMember))
    }

    fn spawn_reap(&self, vm: Vm) {
        let provider = self.provider.clone();
        tokio::spawn(async move {
            if let Err(e) = provider.destroy(&vm.machine_id).await {
                error!(machine_id = %vm.machine_id, "failed to destroy vm: {}", e);
            } else {
                info!(machine_id = %vm.machine_id, "destroyed vm");
            }
        });
    }

    /// `acquire(project_id)`: pops the head of the available queue,
    /// re-probes health, and retries the next entry on failure; creates a
    /// new VM synchronously if the queue is empty.
    pub async fn acquire(&self, project_id: &str) -> Result<Vm> {
        loop {
            let popped = self.available.lock().unwrap().pop_front();
            match popped {
                Some(mut vm) => {
                    if self.probe_health(&mut vm).await {
                        vm.role = VmRole::InUse;
                        vm.project_binding = Some(project_id.to_string());
                        self.in_use.lock().unwrap().insert(vm.machine_id.clone(), vm.clone());
                        crate::observability::record_pool_hit(true);
                        return Ok(vm);
                    }
                    self.spawn_reap(vm);
                    continue;
                }
                None => {
                    let mut vm = self.create_pool_vm().await?;
                    if !self.probe_health(&mut vm).await {
                        self.spawn_reap(vm.clone());
                        return Err(CoreError::AgentUnhealthy(format!(
                            "newly created vm {} failed health",
                            vm.machine_id
                        )));
                    }
                    vm.role = VmRole::InUse;
                    vm.project_binding = Some(project_id.to_string());
                    self.in_use.lock().unwrap().insert(vm.machine_id.clone(), vm.clone());
                    crate::observability::record_pool_hit(false);
                    return Ok(vm);
                }
            }
        }
    }

    /// `release(vm, outcome)`: any `Failed` outcome or an aged-out VM is
    /// destroyed; otherwise cleanup runs and the VM returns to the tail of
    /// the available queue.
    pub async fn release(&self, mut vm: Vm, outcome: ReleaseOutcome) {
        self.in_use.lock().unwrap().remove(&vm.machine_id);

        if outcome == ReleaseOutcome::Failed {
            self.spawn_reap(vm);
            return;
        }

        let cfg = config::current();
        if vm.age(Utc::now()).num_seconds() as u64 >= cfg.pool.max_age_sec {
            info!(machine_id = %vm.machine_id, "vm exceeded max_age, destroying instead of recycling");
            self.spawn_reap(vm);
            return;
        }

        let agent = self.agent_client(&vm);
        match cleanup(&agent).await {
            Ok(preserved_hash) => {
                vm.preserved_modules_hash = preserved_hash;
                vm.project_binding = None;
                vm.role = VmRole::PoolMember;
                self.available.lock().unwrap().push_back(vm);
            }
            Err(e) => {
                warn!(machine_id = %vm.machine_id, "cleanup failed, destroying: {}", e);
                self.spawn_reap(vm);
            }
        }
    }

    /// Lists provider machines, admits healthy `pool-*` VMs, and schedules
    /// unhealthy ones for destruction. Cache-master VMs are never admitted.
    pub async fn adopt(&self) -> Result<()> {
        let machines = self.provider.list_machines().await?;
        for machine in machines {
            if !machine.name.starts_with(POOL_VM_PREFIX) {
                continue;
            }
            if machine.env.get("role").map(String::as_str) == Some("cache-master") {
                continue;
            }
            let mut vm = Vm::new(machine.id.clone(), self.agent_base_url.clone(), VmRole::PoolMember);
            if self.probe_health(&mut vm).await {
                info!(machine_id = %vm.machine_id, "adopted pool vm");
                self.available.lock().unwrap().push_back(vm);
            } else {
                warn!(machine_id = %vm.machine_id, "adopted vm failed health, destroying");
                self.spawn_reap(vm);
            }
        }
        Ok(())
    }

    /// One replenishment pass: creates VMs until `target`/`max` constraints
    /// are satisfied. Also evicts any available VM that has aged out, per
    /// the SPEC_FULL.md clarification that `max_age` is checked here too.
    pub async fn replenish_tick(&self) {
        self.evict_aged_available().await;

        loop {
            let cfg = config::current();
            let available_len = self.available_count();
            let in_use_len = self.in_use_count();
            let replenishing = self.replenishing.load(Ordering::SeqCst);

            if available_len + replenishing >= cfg.pool.target {
                break;
            }
            if available_len + in_use_len >= cfg.pool.max {
                break;
            }

            self.replenishing.fetch_add(1, Ordering::SeqCst);
            let result = timeout(REPLENISH_HEALTH_DEADLINE, self.create_and_health_gate()).await;
            self.replenishing.fetch_sub(1, Ordering::SeqCst);

            match result {
                Ok(Some(vm)) => self.available.lock().unwrap().push_back(vm),
                Ok(None) => break,
                Err(_) => {
                    error!("replenishment timed out waiting for a new vm to become healthy");
                    break;
                }
            }
        }
    }

    async fn create_and_health_gate(&self) -> Option<Vm> {
        let mut vm = match self.create_pool_vm().await {
            Ok(vm) => vm,
            Err(e) => {
                error!("replenisher failed to create vm: {}", e);
                return None;
            }
        };
        if self.probe_health(&mut vm).await {
            Some(vm)
        } else {
            self.spawn_reap(vm);
            None
        }
    }

    async fn evict_aged_available(&self) {
        let cfg = config::current();
        let now = Utc::now();
        let mut aged = Vec::new();
        {
            let mut available = self.available.lock().unwrap();
            let mut keep = VecDeque::with_capacity(available.len());
            while let Some(vm) = available.pop_front() {
                if vm.age(now).num_seconds() as u64 >= cfg.pool.max_age_sec {
                    aged.push(vm);
                } else {
                    keep.push_back(vm);
                }
            }
            *available = keep;
        }
        for vm in aged {
            info!(machine_id = %vm.machine_id, "evicting aged-out available vm");
            self.spawn_reap(vm);
        }
    }

    /// Spawns the independent background replenisher task, cancelled via
    /// `cancel` at process shutdown (§5).
    pub fn spawn_replenisher(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REPLENISH_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.replenish_tick().await,
                }
            }
        });
    }
}

/// Cleans a released VM's project root: preserves `node_modules` when it is
/// under 1 GiB, otherwise wipes the project root entirely. Returns the
/// preserved `package.json` hash sentinel, if any.
async fn cleanup(agent: &AgentClient) -> Result<Option<String>> {
    let du_cmd = ExecCommand::new(vec![
        "du".to_string(),
        "-sb".to_string(),
        format!("{PROJECT_ROOT}/node_modules"),
    ])
    .timeout_ms(30_000);

    let preserve = match agent.exec(&du_cmd).await {
        Ok(result) if result.exit_code == 0 => result
            .stdout
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|size| size < MAX_PRESERVE_BYTES)
            .unwrap_or(false),
        _ => false,
    };

    let cmd = if preserve {
        ExecCommand::new(vec![
            "find".to_string(),
            PROJECT_ROOT.to_string(),
            "-mindepth".to_string(),
            "1".to_string(),
            "!".to_string(),
            "-name".to_string(),
            "node_modules".to_string(),
            "!".to_string(),
            "-path".to_string(),
            format!("{PROJECT_ROOT}/node_modules/*"),
            "!".to_string(),
            "-name".to_string(),
            ".package-json-hash".to_string(),
            "-delete".to_string(),
        ])
    } else {
        ExecCommand::new(vec![
            "rm".to_string(),
            "-rf".to_string(),
            format!("{PROJECT_ROOT}/."),
        ])
    }
    .timeout_ms(60_000);

    let result = agent
        .exec(&cmd)
        .await
        .map_err(|e| CoreError::AgentUnhealthy(e.to_string()))?;
    if result.exit_code != 0 {
        return Err(CoreError::AgentUnhealthy(format!(
            "cleanup command exited with code {}",
            result.exit_code
        )));
    }

    if !preserve {
        return Ok(None);
    }

    let hash_cmd = ExecCommand::new(vec![
        "cat".to_string(),
        format!("{PROJECT_ROOT}/.package-json-hash"),
    ])
    .timeout_ms(5_000);
    Ok(agent
        .exec(&hash_cmd)
        .await
        .ok()
        .filter(|r| r.exit_code == 0)
        .map(|r| r.stdout.trim().to_string()))
}
