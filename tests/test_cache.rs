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
    use chrono::Utc;
    use preview_core::cache::{elect_cache_master, Tier2Breaker};
    use preview_core::model::{Vm, VmRole};

    fn vm(machine_id: &str, role: VmRole) -> Vm {
        let mut v = Vm::new(machine_id.to_string(), "http://agent".into(), role);
        v.created_at = Utc::now();
        v
    }

    #[test]
    fn elects_smallest_machine_id_among_cache_masters() {
        let vms = vec![
            vm("zzz", VmRole::CacheMaster),
            vm("aaa", VmRole::CacheMaster),
            vm("mmm", VmRole::PoolMember),
        ];
        let elected = elect_cache_master(&vms).unwrap();
        assert_eq!(elected.machine_id, "aaa");
    }

    #[test]
    fn breaker_opens_after_threshold_and_recovers_on_success() {
        let breaker = Tier2Breaker::default();
        for _ in 0..6 {
            breaker.record_failure();
        }
        assert!(!breaker.is_available());
        breaker.record_success();
        assert!(breaker.is_available());
    }
}
