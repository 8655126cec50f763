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
    use preview_core::error::CoreError;
    use preview_core::provider::{retry_with_backoff, RetryConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig {
            base: Duration::from_millis(1),
            max_attempts: 5,
        };
        let result = retry_with_backoff(cfg, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::NetworkTimeout("boom".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_auth_errors() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig::default();
        let result: Result<(), CoreError> = retry_with_backoff(cfg, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Auth("denied".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let cfg = RetryConfig {
            base: Duration::from_millis(1),
            max_attempts: 3,
        };
        let result: Result<(), CoreError> = retry_with_backoff(cfg, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::NetworkTimeout("still down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
