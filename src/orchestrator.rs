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

//! Preview Orchestrator (C7): the top-level state machine driving a single
//! preview session from `analysing` through `ready` (or a terminal failure),
//! emitting progress events as it goes (§4.7).

use crate::agent::{AgentClient, ExecCommand};
use crate::cache::{self, Tier2Breaker};
use crate::config;
use crate::detector;
use crate::error::{CoreError, Result};
use crate::model::{percent_for_state, Project, SessionState, Vm, VmRole};
use crate::pool::{Pool, ReleaseOutcome, PROJECT_ROOT};
use crate::provider::ProviderClient;
use crate::sync;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const WAITING_READY_POLL_INTERVAL: Duration = Duration::from_secs(3);
const WAITING_READY_TIMEOUT: Duration = Duration::from_secs(120);
const WAITING_READY_EMIT_INTERVAL: Duration = Duration::from_secs(5);
const DEV_SERVER_CRASH_GRACE: Duration = Duration::from_secs(30);

/// Kind of progress event, mapped to the SSE `event:` name by the HTTP
/// layer (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressEventKind {
    Step,
    Warning,
    Ready,
    Error,
}

/// Wire shape of one progress event (§6). `step`/`percent` are populated for
/// `Step` events; `details` carries kind-specific payloads (`previewUrl`,
/// `machineId`, error `code`/`retryable`, warning `recommendation`, ...).
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub kind: ProgressEventKind,
    pub step: Option<SessionState>,
    pub percent: Option<u8>,
    pub message: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Outcome of a completed preview run, handed back to the session registry.
pub struct PreviewOutcome {
    pub vm: Vm,
    pub preview_url: String,
    pub detected: crate::model::DetectedProject,
}

async fn emit(
    tx: &mpsc::Sender<ProgressEvent>,
    kind: ProgressEventKind,
    step: Option<SessionState>,
    percent: Option<u8>,
    message: impl Into<String>,
    started_at: Instant,
    details: Option<Value>,
) {
    let event = ProgressEvent {
        kind,
        step,
        percent,
        message: message.into(),
        timestamp: Utc::now(),
        elapsed_ms: started_at.elapsed().as_millis() as u64,
        details,
    };
    let _ = tx.send(event).await;
}

async fn emit_step(
    tx: &mpsc::Sender<ProgressEvent>,
    state: SessionState,
    message: impl Into<String>,
    started_at: Instant,
) {
    emit(
        tx,
        ProgressEventKind::Step,
        Some(state),
        Some(percent_for_state(state)),
        message,
        started_at,
        None,
    )
    .await;
}

async fn emit_warning(tx: &mpsc::Sender<ProgressEvent>, message: impl Into<String>, started_at: Instant) {
    emit(tx, ProgressEventKind::Warning, None, None, message, started_at, None).await;
}

/// Drives one preview session end to end for `project` on whatever VM the
/// pool hands back. On any failure the VM is released per §9 (destroyed
/// unless the terminal state is `ready`/`cancelled`).
pub struct Orchestrator<P: ProviderClient> {
    pool: Arc<Pool<P>>,
    provider: Arc<P>,
    agent_base_url: String,
    breaker: Arc<Tier2Breaker>,
}

impl<P: ProviderClient> Orchestrator<P> {
    pub fn new(pool: Arc<Pool<P>>, provider: Arc<P>, agent_base_url: String) -> Self {
        Self {
            pool,
            provider,
            agent_base_url,
            breaker: Arc::new(Tier2Breaker::default()),
        }
    }

    /// Releases `vm` back to the pool per `outcome`, used by the session
    /// registry when a session is cancelled or idle-reaped.
    pub async fn pool_release(&self, vm: Vm, outcome: crate::pool::ReleaseOutcome) {
        self.pool.release(vm, outcome).await;
    }

    /// Builds an agent client for `vm`, used by the session registry's
    /// post-ready crash monitor.
    pub fn agent_for(&self, vm: &Vm) -> AgentClient {
        AgentClient::new(self.agent_base_url.clone(), vm.machine_id.clone())
    }

    async fn resolve_cache_master(&self) -> Option<AgentClient> {
        let machines = self.provider.list_machines().await.ok()?;
        let vms: Vec<Vm> = machines
            .into_iter()
            .filter(|m| m.env.get("role").map(String::as_str) == Some("cache-master"))
            .map(|m| Vm::new(m.id, self.agent_base_url.clone(), VmRole::CacheMaster))
            .collect();
        let elected = cache::elect_cache_master(&vms)?;
        Some(AgentClient::new(self.agent_base_url.clone(), elected.machine_id.clone()))
    }

    /// Runs the state machine. `tx` receives every progress event in order;
    /// dropping the receiver is how a subscriber stops consuming events.
    pub async fn run(
        &self,
        project: Project,
        tx: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<PreviewOutcome> {
        let started_at = Instant::now();

        let result = self.run_inner(&project, &tx, &cancel, started_at).await;

        match &result {
            Ok(outcome) => {
                emit(
                    &tx,
                    ProgressEventKind::Ready,
                    Some(SessionState::Ready),
                    Some(100),
                    "preview ready",
                    started_at,
                    Some(serde_json::json!({
                        "previewUrl": outcome.preview_url,
                        "machineId": outcome.vm.machine_id,
                    })),
                )
                .await;
            }
            Err(err) => {
                let ev = err.to_event();
                emit(
                    &tx,
                    ProgressEventKind::Error,
                    Some(SessionState::Failed),
                    Some(0),
                    ev.message.clone(),
                    started_at,
                    Some(serde_json::to_value(&ev).unwrap()),
                )
                .await;
                crate::observability::alerts::record_error(err.code(), config::current().alerts.rate_per_5min);
            }
        }

        let terminal = match &result {
            Ok(_) => SessionState::Ready,
            Err(_) if cancel.is_cancelled() => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        crate::observability::record_phase_duration(terminal, started_at.elapsed());
        crate::observability::record_session_result(terminal);

        result
    }

    async fn run_inner(
        &self,
        project: &Project,
        tx: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
        started_at: Instant,
    ) -> Result<PreviewOutcome> {
        if cancel.is_cancelled() {
            return Err(CoreError::Storage("session cancelled before start".into()));
        }

        // analysing
        emit_step(tx, SessionState::Analysing, "loading project metadata", started_at).await;
        let package_json_hash = project
            .package_json()
            .map(|f| hex::encode(Sha256::digest(&f.content)))
            .unwrap_or_default();

        // acquiring
        emit_step(tx, SessionState::Acquiring, "acquiring a vm from the pool", started_at).await;
        let vm = self.pool.acquire(&project.project_id).await?;
        let agent = AgentClient::new(self.agent_base_url.clone(), vm.machine_id.clone());

        let outcome = self
            .run_after_acquire(project, &vm, &agent, &package_json_hash, tx, cancel, started_at)
            .await;

        match outcome {
            Ok((detected, preview_url)) => Ok(PreviewOutcome {
                vm,
                preview_url,
                detected,
            }),
            Err(e) => {
                self.pool.release(vm, ReleaseOutcome::Failed).await;
                Err(e)
            }
        }
    }

    async fn run_after_acquire(
        &self,
        project: &Project,
        vm: &Vm,
        agent: &AgentClient,
        package_json_hash: &str,
        tx: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
        started_at: Instant,
    ) -> Result<(crate::model::DetectedProject, String)> {
        // detecting
        emit_step(tx, SessionState::Detecting, "detecting project type", started_at).await;
        let detected = detector::detect(project).ok_or(CoreError::UnsupportedProject)?;
        for note in &detected.notes {
            emit_warning(tx, note.clone(), started_at).await;
        }

        // syncing
        emit_step(tx, SessionState::Syncing, "syncing project files", started_at).await;
        let cfg = config::current();
        let patched_project;
        let project_to_sync = if detected.project_type == crate::model::ProjectType::Vite {
            patched_project = patch_vite_config_for_sync(project, vm);
            &patched_project
        } else {
            project
        };
        let sync_outcome =
            sync::sync_project(agent, project_to_sync, &cfg.limits, PROJECT_ROOT, cancel).await?;
        for excluded in &sync_outcome.excluded_files {
            emit_warning(tx, format!("excluded '{excluded}': exceeds limits.max_file_bytes"), started_at).await;
        }

        // installing
        emit_step(tx, SessionState::Installing, "installing dependencies", started_at).await;
        let cache_master = self.resolve_cache_master().await;
        let tier_outcome = cache::restore_dependencies(
            agent,
            vm,
            cache_master.as_ref(),
            &self.breaker,
            &detected,
            package_json_hash,
            cfg.cache.tier2_enabled,
            cfg.cache.tier3_url.as_deref(),
            cancel,
        )
        .await?;
        info!(machine_id = %vm.machine_id, ?tier_outcome, "dependency restore complete");
        crate::observability::record_cache_tier(tier_outcome);

        if cancel.is_cancelled() {
            return Err(CoreError::Storage("session cancelled during install".into()));
        }

        // starting
        emit_step(tx, SessionState::Starting, "starting dev server", started_at).await;
        let start_cmd = ExecCommand::new(detected.start_command.clone())
            .cwd(PROJECT_ROOT)
            .background(true)
            .timeout_ms(Duration::from_secs(300).as_millis() as u64);
        let start_exec_id = start_cmd.id.clone();
        agent.exec(&start_cmd).await?;

        // waiting-ready
        emit_step(tx, SessionState::WaitingReady, "waiting for dev server to accept connections", started_at).await;
        self.wait_for_ready(agent, detected.default_port, tx, cancel, started_at, &start_exec_id)
            .await?;

        let preview_url = format!("https://{}.preview.drape.dev", vm.machine_id);
        Ok((detected, preview_url))
    }

    async fn wait_for_ready(
        &self,
        agent: &AgentClient,
        port: u16,
        tx: &mpsc::Sender<ProgressEvent>,
        cancel: &CancellationToken,
        started_at: Instant,
        start_exec_id: &str,
    ) -> Result<()> {
        let wait_started = Instant::now();
        let deadline = wait_started + WAITING_READY_TIMEOUT;
        let mut last_emit = Instant::now();

        loop {
            if cancel.is_cancelled() {
                if let Err(e) = agent.kill_exec(start_exec_id).await {
                    warn!("failed to kill dev server exec on cancellation: {}", e);
                }
                return Err(CoreError::Storage("session cancelled while waiting for ready".into()));
            }

            match agent.probe_dev_server(port, "/").await {
                Ok(status) if status < 500 => return Ok(()),
                Ok(status) => warn!(status, "dev server returned server error while waiting for ready"),
                Err(e) => warn!("dev server probe failed: {}", e),
            }

            if Instant::now() >= deadline {
                return Err(CoreError::DevServerTimeout);
            }

            if last_emit.elapsed() >= WAITING_READY_EMIT_INTERVAL {
                let frac = wait_started.elapsed().as_secs_f64() / WAITING_READY_TIMEOUT.as_secs_f64();
                let percent = 85 + (frac.clamp(0.0, 1.0) * 10.0) as u8;
                emit(
                    tx,
                    ProgressEventKind::Step,
                    Some(SessionState::WaitingReady),
                    Some(percent),
                    "still waiting for dev server",
                    started_at,
                    None,
                )
                .await;
                last_emit = Instant::now();
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(CoreError::Storage("session cancelled while waiting for ready".into())),
                _ = tokio::time::sleep(WAITING_READY_POLL_INTERVAL) => {}
            }
        }
    }

    /// After an initial successful readiness check, polls again to detect a
    /// dev server that has since started returning persistent 5xx (§7
    /// `dev-server-crashed`).
    pub async fn detect_post_ready_crash(&self, agent: &AgentClient, port: u16) -> Result<bool> {
        let deadline = Instant::now() + DEV_SERVER_CRASH_GRACE;
        loop {
            match agent.probe_dev_server(port, "/").await {
                Ok(status) if status < 500 => return Ok(false),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Ok(true);
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

/// Clones `project` with its `vite.config.{js,ts}` (if any) patched to allow
/// `vm`'s preview hostname through Vite's dev-server host check, so the
/// patched config is what gets synced rather than the original (§4.6).
fn patch_vite_config_for_sync(project: &Project, vm: &Vm) -> Project {
    let hostname = format!("{}.preview.drape.dev", vm.machine_id);
    let mut patched = project.clone();
    for file in &mut patched.files {
        let is_vite_config = file
            .path
            .rsplit('/')
            .next()
            .map(|name| name.starts_with("vite.config"))
            .unwrap_or(false);
        if !is_vite_config {
            continue;
        }
        if let Ok(src) = std::str::from_utf8(&file.content) {
            let rewritten = detector::patch_vite_allowed_hosts(src, &hostname);
            file.content = rewritten.into_bytes();
        }
    }
    patched
}

