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

//! Observability (C9): Prometheus metrics, rate-limited error-class
//! alerting, and a per-VM resource monitor (§4.9).

pub mod alerts;
pub mod resource;

use crate::cache::TierOutcome;
use crate::model::SessionState;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Installs the process-wide Prometheus recorder and returns the handle used
/// by the admin surface's `/metrics/stats` endpoint to render current
/// values. Must be called exactly once, before any `metrics::` macro use.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install prometheus recorder")
}

fn phase_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Analysing => "analysing",
        SessionState::Acquiring => "acquiring",
        SessionState::Syncing => "syncing",
        SessionState::Detecting => "detecting",
        SessionState::Installing => "installing",
        SessionState::Starting => "starting",
        SessionState::WaitingReady => "waiting-ready",
        SessionState::Ready => "ready",
        SessionState::Failed => "failed",
        SessionState::Cancelled => "cancelled",
    }
}

/// Records how long `state` took to complete for one session.
pub fn record_phase_duration(state: SessionState, elapsed: Duration) {
    metrics::histogram!("preview_phase_duration_seconds", "phase" => phase_label(state))
        .record(elapsed.as_secs_f64());
}

/// Records whether `acquire` was satisfied from the warm pool (`true`) or
/// required a synchronous create (`false`).
pub fn record_pool_hit(hit: bool) {
    metrics::counter!("preview_pool_acquire_total", "hit" => if hit { "true" } else { "false" })
        .increment(1);
}

/// Records which tier satisfied a dependency restore.
pub fn record_cache_tier(outcome: TierOutcome) {
    let tier = match outcome {
        TierOutcome::Tier1Skip => "tier1-skip",
        TierOutcome::Tier2Peer => "tier2-peer",
        TierOutcome::Tier3ObjectStorage => "tier3-object-storage",
        TierOutcome::Tier4Fresh => "tier4-fresh",
    };
    metrics::counter!("preview_cache_tier_total", "tier" => tier).increment(1);
}

/// Records the terminal outcome of a preview session.
pub fn record_session_result(state: SessionState) {
    metrics::counter!("preview_session_result_total", "state" => phase_label(state)).increment(1);
}
