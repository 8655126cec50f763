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

#[cfg(test)]
mod tests {
    use super::*;
    use preview_core::observability::alerts::record_error;
    use std::time::Instant;

    #[test]
    fn alerts_once_per_suppression_window() {
        let code = format!("test-code-{:?}", Instant::now());
        for _ in 0..4 {
            assert!(!record_error(&code, 5));
        }
        assert!(record_error(&code, 5));
        assert!(!record_error(&code, 5));
    }
}
