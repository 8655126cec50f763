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

use crate::error::CoreError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with jitter, per §4.1: base 500ms, max 5 attempts.
/// Auth failures are never retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max_attempts: 5,
        }
    }
}

/// Runs `op` up to `cfg.max_attempts` times, backing off exponentially with
/// ±20% jitter between attempts. Stops immediately on a non-retryable error.
pub async fn retry_with_backoff<T, F, Fut>(cfg: RetryConfig, mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.retryable() && attempt < cfg.max_attempts => {
                let exp = cfg.base * 2u32.pow(attempt.saturating_sub(1));
                let jitter_frac = rand::thread_rng().gen_range(0.8..1.2);
                let delay = Duration::from_secs_f64(exp.as_secs_f64() * jitter_frac);
                warn!(
                    attempt,
                    max_attempts = cfg.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after error: {}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
