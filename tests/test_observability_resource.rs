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
    use preview_core::observability::resource::{over_threshold, VmResourceSample};

    #[test]
    fn over_threshold_triggers_on_memory_or_disk() {
        assert!(over_threshold(&VmResourceSample { memory_used_percent: 91, disk_used_percent: 10 }));
        assert!(over_threshold(&VmResourceSample { memory_used_percent: 10, disk_used_percent: 86 }));
        assert!(!over_threshold(&VmResourceSample { memory_used_percent: 50, disk_used_percent: 50 }));
    }
}
