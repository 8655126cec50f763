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
    use axum::http::{HeaderMap, HeaderValue};
    use preview_core::gateway::{parse_url_prefix_project_id, resolve_routing_token, strip_hop_by_hop, ROUTING_HEADER};

    #[test]
    fn parses_user_project_url_prefix() {
        assert_eq!(
            parse_url_prefix_project_id("/@alice/my-app/index.html"),
            Some("alice/my-app".to_string())
        );
        assert_eq!(parse_url_prefix_project_id("/health"), None);
    }

    #[test]
    fn cookie_resolution_takes_priority_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; drape_vm_id=vm-123; more=2"),
        );
        headers.insert(ROUTING_HEADER, HeaderValue::from_static("vm-from-header"));
        let token = resolve_routing_token(&headers, "/@alice/app/").unwrap();
        assert_eq!(token.machine_id(), "vm-123");
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        strip_hop_by_hop(&mut headers);
        assert!(!headers.contains_key(axum::http::header::CONNECTION));
        assert!(headers.contains_key(axum::http::header::CONTENT_TYPE));
    }
}
