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

//! Preview Session registry: tracks every in-flight or ready preview by
//! project id, fans out orchestrator progress to any number of SSE
//! subscribers, and reaps sessions idle past `session.idle_timeout_sec`
//! (§4.7, §4.4 "idle eviction").

use crate::config;
use crate::model::{Project, SessionState, Vm};
use crate::orchestrator::{Orchestrator, ProgressEvent, ProgressEventKind};
use crate::pool::ReleaseOutcome;
use crate::provider::ProviderClient;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const BROADCAST_CAPACITY: usize = 64;
const REAP_TICK: Duration = Duration::from_secs(60);

/// Live state of one project's preview, shared between the orchestrator task
/// that drives it and any number of SSE subscribers reading its events.
pub struct SessionHandle {
    pub project_id: String,
    state: Mutex<SessionState>,
    vm: Mutex<Option<Vm>>,
    default_port: Mutex<Option<u16>>,
    last_activity_at: Mutex<DateTime<Utc>>,
    events: broadcast::Sender<ProgressEvent>,
    last_event: Mutex<Option<ProgressEvent>>,
    cancel: CancellationToken,
    finished: AtomicBool,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub fn machine_id(&self) -> Option<String> {
        self.vm.lock().unwrap().as_ref().map(|v| v.machine_id.clone())
    }

    /// The in-VM dev server port discovered by the project detector, used by
    /// the gateway to route forwarded requests to the right listener.
    pub fn default_port(&self) -> Option<u16> {
        *self.default_port.lock().unwrap()
    }

    pub fn last_event(&self) -> Option<ProgressEvent> {
        self.last_event.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Records gateway traffic against this session so the idle reaper
    /// leaves it alone.
    pub fn touch(&self) {
        *self.last_activity_at.lock().unwrap() = Utc::now();
    }

    fn idle_for(&self, now: DateTime<Utc>) -> i64 {
        (now - *self.last_activity_at.lock().unwrap()).num_seconds()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Registry of every preview session keyed by project id, plus the
/// machinery to start, cancel, and idle-reap them.
pub struct SessionRegistry<P: ProviderClient> {
    sessions: DashMap<String, Arc<SessionHandle>>,
    orchestrator: Arc<Orchestrator<P>>,
}

impl<P: ProviderClient + 'static> SessionRegistry<P> {
    pub fn new(orchestrator: Arc<Orchestrator<P>>) -> Self {
        Self {
            sessions: DashMap::new(),
            orchestrator,
        }
    }

    /// Number of sessions currently tracked (any state), used by `/health`.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, project_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.get(project_id).map(|entry| entry.value().clone())
    }

    /// Looks up the session owning `machine_id`, used by the gateway's
    /// header-based routing resolution.
    pub fn find_by_machine_id(&self, machine_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .iter()
            .find(|entry| entry.value().machine_id().as_deref() == Some(machine_id))
            .map(|entry| entry.value().clone())
    }

    /// Starts (or returns the existing) session for `project`, spawning the
    /// orchestrator run in the background. Progress flows through the
    /// returned handle's broadcast channel.
    pub fn start(self: &Arc<Self>, project: Project) -> Arc<SessionHandle> {
        if let Some(existing) = self.get(&project.project_id) {
            if !existing.finished.load(Ordering::SeqCst) || existing.state() == SessionState::Ready {
                existing.touch();
                return existing;
            }
        }

        let (events, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let handle = Arc::new(SessionHandle {
            project_id: project.project_id.clone(),
            state: Mutex::new(SessionState::Analysing),
            vm: Mutex::new(None),
            default_port: Mutex::new(None),
            last_activity_at: Mutex::new(Utc::now()),
            events,
            last_event: Mutex::new(None),
            cancel: CancellationToken::new(),
            finished: AtomicBool::new(false),
        });
        self.sessions.insert(project.project_id.clone(), handle.clone());

        let registry = self.clone();
        let handle_for_task = handle.clone();
        let cancel = handle.cancel.clone();
        tokio::spawn(async move {
            let orchestrator = registry.orchestrator.clone();
            let (tx, mut rx) = tokio::sync::mpsc::channel::<ProgressEvent>(BROADCAST_CAPACITY);
            let handle_for_forward = handle_for_task.clone();
            let forward = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Some(step) = event.step {
                        *handle_for_forward.state.lock().unwrap() = step;
                    }
                    *handle_for_forward.last_event.lock().unwrap() = Some(event.clone());
                    let _ = handle_for_forward.events.send(event);
                }
            });

            let outcome = orchestrator.run(project, tx, cancel.clone()).await;
            forward.abort();

            match outcome {
                Ok(result) => {
                    let port = result.detected.default_port;
                    *handle_for_task.vm.lock().unwrap() = Some(result.vm);
                    *handle_for_task.default_port.lock().unwrap() = Some(port);
                    *handle_for_task.state.lock().unwrap() = SessionState::Ready;
                    registry.spawn_crash_monitor(handle_for_task.clone(), port);
                }
                Err(e) => {
                    warn!(project_id = %handle_for_task.project_id, "preview session failed: {}", e);
                    let terminal = if cancel.is_cancelled() {
                        SessionState::Cancelled
                    } else {
                        SessionState::Failed
                    };
                    *handle_for_task.state.lock().unwrap() = terminal;
                }
            }
            handle_for_task.finished.store(true, Ordering::SeqCst);
        });

        handle
    }

    /// Cancels a running session and releases its VM back to the pool once
    /// the orchestrator unwinds (§5).
    pub async fn stop(&self, project_id: &str) {
        if let Some(handle) = self.get(project_id) {
            handle.cancel();
            if let Some(vm) = handle.vm.lock().unwrap().take() {
                self.orchestrator
                    .pool_release(vm, ReleaseOutcome::Cancelled)
                    .await;
            }
            *handle.state.lock().unwrap() = SessionState::Cancelled;
        }
    }

    /// One idle-reap pass: releases the VM of, and removes, every finished
    /// session that has had no gateway traffic for `idle_timeout_sec`.
    pub async fn reap_idle_tick(&self) {
        let cfg = config::current();
        let now = Utc::now();
        let mut to_reap = Vec::new();
        for entry in self.sessions.iter() {
            if entry.idle_for(now) >= cfg.session.idle_timeout_sec as i64 {
                to_reap.push(entry.key().clone());
            }
        }
        for project_id in to_reap {
            if let Some((_, handle)) = self.sessions.remove(&project_id) {
                info!(%project_id, "idle session evicted");
                handle.cancel();
                if let Some(vm) = handle.vm.lock().unwrap().take() {
                    self.orchestrator.pool_release(vm, ReleaseOutcome::Ready).await;
                }
            }
        }
    }

    /// After a session reaches `ready`, watches its dev server for a
    /// persistent 5xx and fails the session if one is found (§7
    /// `dev-server-crashed`).
    fn spawn_crash_monitor(self: &Arc<Self>, handle: Arc<SessionHandle>, port: u16) {
        let registry = self.clone();
        let cancel = handle.cancel.clone();
        tokio::spawn(async move {
            let vm = match handle.vm.lock().unwrap().clone() {
                Some(vm) => vm,
                None => return,
            };
            let agent = registry.orchestrator.agent_for(&vm);
            let crashed = tokio::select! {
                _ = cancel.cancelled() => return,
                result = registry.orchestrator.detect_post_ready_crash(&agent, port) => result,
            };
            if !matches!(crashed, Ok(true)) {
                return;
            }
            warn!(project_id = %handle.project_id, "dev server stopped responding after ready");
            *handle.state.lock().unwrap() = SessionState::Failed;
            let event = ProgressEvent {
                kind: ProgressEventKind::Error,
                step: Some(SessionState::Failed),
                percent: None,
                message: "dev server stopped responding".into(),
                timestamp: Utc::now(),
                elapsed_ms: 0,
                details: Some(serde_json::json!({"code": "dev-server-crashed", "retryable": true})),
            };
            *handle.last_event.lock().unwrap() = Some(event.clone());
            let _ = handle.events.send(event);
            if let Some(vm) = handle.vm.lock().unwrap().take() {
                registry.orchestrator.pool_release(vm, ReleaseOutcome::Failed).await;
            }
        });
    }

    /// Spawns the background idle reaper, stopped via `cancel` at shutdown.
    pub fn spawn_reaper(self: Arc<Self>, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.reap_idle_tick().await,
                }
            }
        });
    }
}

/// Shorthand used by the HTTP layer to decide what a subscriber should be
/// told for a session that isn't ready yet (§6 `503 not-ready`).
pub fn not_ready_details(handle: &SessionHandle) -> (SessionState, u8) {
    match handle.last_event() {
        Some(ProgressEvent { step: Some(step), percent: Some(percent), kind, .. })
            if kind == ProgressEventKind::Step =>
        {
            (step, percent)
        }
        _ => (handle.state(), crate::model::percent_for_state(handle.state())),
    }
}
