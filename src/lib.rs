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

//! Preview Orchestration Core: provisions ephemeral preview VMs, syncs
//! project files into them, restores dependencies through a tiered cache
//! fabric, and exposes the resulting dev server through a gateway.

pub mod agent;
pub mod cache;
pub mod config;
pub mod detector;
pub mod error;
pub mod gateway;
pub mod http;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod pool;
pub mod project_store;
pub mod provider;
pub mod session;
pub mod storage;
pub mod sync;
