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

//! Provider Client (C1): typed calls to the micro-VM provider.

mod http;
mod retry;

pub use http::HttpProviderClient;
pub use retry::{retry_with_backoff, RetryConfig};

use crate::error::{CoreError, Result};
use crate::model::MachineEnv;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CPU/memory shape requested when creating a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Creating,
    Starting,
    Started,
    Stopping,
    Stopped,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub name: String,
    pub state: MachineState,
    pub env: MachineEnv,
    pub region: String,
}

#[derive(Debug, Clone)]
pub struct CreateMachineRequest {
    pub name: String,
    pub image: String,
    pub env: MachineEnv,
    pub region: String,
    pub resources: Resources,
}

/// Narrow, typed interface to the micro-VM provider (§4.1). All operations
/// are idempotent at the semantic level: retrying `create_machine` with the
/// same name either returns the existing machine or fails with
/// `AlreadyExists`, which callers can distinguish from a transient error.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn create_machine(&self, req: CreateMachineRequest) -> Result<Machine>;
    async fn start(&self, machine_id: &str) -> Result<()>;
    async fn stop(&self, machine_id: &str) -> Result<()>;
    async fn destroy(&self, machine_id: &str) -> Result<()>;
    async fn wait_for_state(
        &self,
        machine_id: &str,
        target: MachineState,
        timeout: Duration,
    ) -> Result<Machine>;
    async fn list_machines(&self) -> Result<Vec<Machine>>;
}

/// Distinguishes a semantically-idempotent "already exists" outcome from a
/// genuine failure, per §4.1.
pub fn is_already_exists(err: &CoreError) -> bool {
    matches!(err, CoreError::ProviderApi { status, .. } if *status == 409)
}
