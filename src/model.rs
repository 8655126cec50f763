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

//! Core data model (§3): Project, VM, Preview Session, Archive, Routing Token.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single file tracked in the external document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub content: Vec<u8>,
    /// POSIX file mode bits, e.g. 0o644.
    pub mode: u32,
}

/// A user project as the core sees it: an opaque id plus an ordered file set.
/// Immutable from the core's point of view except through explicit sync.
#[derive(Debug, Clone)]
pub struct Project {
    pub project_id: String,
    pub files: Vec<ProjectFile>,
}

impl Project {
    pub fn find_file(&self, path: &str) -> Option<&ProjectFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn package_json(&self) -> Option<&ProjectFile> {
        self.find_file("package.json")
    }
}

/// Role a VM currently plays in the fleet (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VmRole {
    PoolMember,
    CacheMaster,
    InUse,
}

/// A micro-VM instance as tracked by the core. `machine_id` is opaque and
/// assigned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    pub machine_id: String,
    pub agent_base_url: String,
    pub role: VmRole,
    pub created_at: DateTime<Utc>,
    pub last_health_ok_at: Option<DateTime<Utc>>,
    /// Fingerprint of the last-installed `package.json`, used by Cache
    /// Fabric Tier 1 to skip install entirely.
    pub preserved_modules_hash: Option<String>,
    pub project_binding: Option<String>,
}

impl Vm {
    pub fn new(machine_id: String, agent_base_url: String, role: VmRole) -> Self {
        Self {
            machine_id,
            agent_base_url,
            role,
            created_at: Utc::now(),
            last_health_ok_at: None,
            preserved_modules_hash: None,
            project_binding: None,
        }
    }

    /// Per §3: a VM is only offered to a project after a successful health
    /// probe within the last 30 seconds.
    pub fn is_health_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_health_ok_at {
            Some(t) => (now - t).num_seconds() <= 30,
            None => false,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// States a Preview Session moves through (§4.7). No state may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Analysing,
    Acquiring,
    Syncing,
    Detecting,
    Installing,
    Starting,
    WaitingReady,
    Ready,
    Failed,
    Cancelled,
}

impl SessionState {
    /// The states, in the order §4.7 enumerates them for the happy path.
    pub const HAPPY_PATH: &'static [SessionState] = &[
        SessionState::Analysing,
        SessionState::Acquiring,
        SessionState::Syncing,
        SessionState::Detecting,
        SessionState::Installing,
        SessionState::Starting,
        SessionState::WaitingReady,
        SessionState::Ready,
    ];

    /// Whether `next` is a legal transition from `self`: either the next
    /// happy-path step, or a terminal state reachable from any step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        if matches!(next, SessionState::Failed | SessionState::Cancelled) {
            return !matches!(self, SessionState::Ready);
        }
        let Some(pos) = Self::HAPPY_PATH.iter().position(|s| *s == self) else {
            return false;
        };
        Self::HAPPY_PATH.get(pos + 1) == Some(&next)
    }
}

/// Content-addressed archive of project files, uploaded to the Agent as a
/// gzip-compressed tar stream.
#[derive(Debug, Clone)]
pub struct Archive {
    pub sha256: String,
    pub compressed: Vec<u8>,
    pub uncompressed_len: u64,
    pub file_count: usize,
}

/// A routing token identifying which VM a client request should reach.
/// Carried as the `drape_vm_id` cookie or the `X-Drape-Machine-Id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingToken(pub String);

impl RoutingToken {
    pub fn machine_id(&self) -> &str {
        &self.0
    }
}

/// A project detected by the Project Detector (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProjectType {
    ReactNative,
    NextJs,
    CreateReactApp,
    Vue,
    Vite,
    DotNet,
    Django,
    PythonGeneric,
    SpringGradle,
    Go,
    Laravel,
    PhpGeneric,
    Rails,
    Ruby,
    StaticHtml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedProject {
    pub project_type: ProjectType,
    pub default_port: u16,
    pub install_command: Vec<Vec<String>>,
    pub start_command: Vec<String>,
    pub notes: Vec<String>,
}

/// Per-phase progress percentages from §4.7, keyed by state.
pub fn percent_for_state(state: SessionState) -> u8 {
    match state {
        SessionState::Analysing => 5,
        SessionState::Acquiring => 15,
        SessionState::Syncing => 30,
        SessionState::Detecting => 35,
        SessionState::Installing => 60,
        SessionState::Starting => 80,
        SessionState::WaitingReady => 85,
        SessionState::Ready => 100,
        SessionState::Failed | SessionState::Cancelled => 0,
    }
}

/// Environment labels attached to a created machine, mirroring how the
/// provider exposes machine metadata back through `list_machines`.
pub type MachineEnv = HashMap<String, String>;
