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

use serde::Serialize;
use thiserror::Error;

/// Closed set of error classes (§7). Categorisation is observable and
/// drives the alerting counters in `observability`.
#[derive(Debug, Error, Clone, PartialEq, Eq, Hash)]
pub enum CoreError {
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    #[error("dns resolution failed: {0}")]
    NetworkDns(String),
    #[error("provider api error ({status}): {message}")]
    ProviderApi { status: u16, message: String },
    #[error("agent unhealthy: {0}")]
    AgentUnhealthy(String),
    #[error("cache fetch failed at stage {stage}: {message}")]
    CacheFetch { stage: String, message: String },
    #[error("dependency install failed: {0}")]
    InstallFailed(String),
    #[error("dev server did not become ready in time")]
    DevServerTimeout,
    #[error("dev server crashed after an initial success")]
    DevServerCrashed,
    #[error("document store error: {0}")]
    Storage(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("vm out of memory")]
    OutOfMemory,
    #[error("vm disk full")]
    DiskFull,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unsupported project: detector could not classify the project")]
    UnsupportedProject,
}

impl CoreError {
    /// Stable machine-readable class name, matching the §7 taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NetworkTimeout(_) => "network-timeout",
            CoreError::NetworkDns(_) => "network-dns",
            CoreError::ProviderApi { .. } => "provider-api",
            CoreError::AgentUnhealthy(_) => "agent-unhealthy",
            CoreError::CacheFetch { .. } => "cache-fetch",
            CoreError::InstallFailed(_) => "install-failed",
            CoreError::DevServerTimeout => "dev-server-timeout",
            CoreError::DevServerCrashed => "dev-server-crashed",
            CoreError::Storage(_) => "storage",
            CoreError::Auth(_) => "auth",
            CoreError::OutOfMemory => "out-of-memory",
            CoreError::DiskFull => "disk-full",
            CoreError::Parse(_) => "parse",
            CoreError::UnsupportedProject => "unsupported-project",
        }
    }

    /// Whether the step-local handler that produced this error should retry.
    pub fn retryable(&self) -> bool {
        match self {
            CoreError::NetworkTimeout(_) | CoreError::NetworkDns(_) => true,
            CoreError::ProviderApi { status, .. } => *status == 429 || *status >= 500,
            CoreError::Storage(_) => true,
            CoreError::CacheFetch { .. } => true,
            _ => false,
        }
    }

    pub fn to_event(&self) -> ErrorEvent {
        ErrorEvent {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.retryable(),
        }
    }
}

/// Wire shape of the terminal `error` progress event (§6).
#[derive(Debug, Serialize, Clone)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

pub type Result<T> = std::result::Result<T, CoreError>;
