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

//! Rate-limited error-class alerting (§4.9, §7): fires at most once per
//! error class per 5-minute suppression window once the class crosses
//! `alerts.rate_per_5min` occurrences within the preceding 5 minutes.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::warn;

const WINDOW: Duration = Duration::from_secs(5 * 60);
const SUPPRESSION: Duration = Duration::from_secs(5 * 60);

struct ClassState {
    occurrences: VecDeque<Instant>,
    suppressed_until: Option<Instant>,
}

impl ClassState {
    fn new() -> Self {
        Self {
            occurrences: VecDeque::new(),
            suppressed_until: None,
        }
    }
}

static CLASSES: Lazy<RwLock<HashMap<String, ClassState>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Records one occurrence of `error_code`. Returns `true` exactly when this
/// occurrence should surface as an alert (threshold crossed, not currently
/// suppressed).
pub fn record_error(error_code: &str, threshold: u32) -> bool {
    let now = Instant::now();
    let mut classes = CLASSES.write().unwrap();
    let state = classes.entry(error_code.to_string()).or_insert_with(ClassState::new);

    state.occurrences.push_back(now);
    while let Some(front) = state.occurrences.front() {
        if now.duration_since(*front) > WINDOW {
            state.occurrences.pop_front();
        } else {
            break;
        }
    }

    if let Some(until) = state.suppressed_until {
        if now < until {
            return false;
        }
    }

    if state.occurrences.len() as u32 >= threshold {
        state.suppressed_until = Some(now + SUPPRESSION);
        warn!(error_code, count = state.occurrences.len(), "error class crossed alert threshold");
        true
    } else {
        false
    }
}
