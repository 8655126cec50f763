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

//! Persistent object-storage backends. These back the Cache Fabric's Tier 3
//! fallback (§4.3) and any other object that needs to outlive a single VM.
//! Each backend stores an already-compressed blob under a content-addressed
//! key; no further wrapping (base64, JSON envelopes) is applied, since the
//! Cache Archive format (§3) is already a self-describing zstd stream.

pub mod azure;
pub mod gcs;
pub mod local;
pub mod s3;

use crate::config::{self, StorageBackend};
use bytes::Bytes;

/// Stores `data` under `key` using the configured backend.
pub async fn store(key: &str, data: Bytes) {
    match config::current().storage_backend {
        StorageBackend::Gcs => gcs::store(key, data).await,
        StorageBackend::S3 => s3::store(key, data).await,
        StorageBackend::Azure => azure::store(key, data).await,
        StorageBackend::Local => local::store(key, data).await,
    }
}

/// Loads the blob stored under `key`, if present.
pub async fn load(key: &str) -> Option<Bytes> {
    match config::current().storage_backend {
        StorageBackend::Gcs => gcs::load(key).await,
        StorageBackend::S3 => s3::load(key).await,
        StorageBackend::Azure => azure::load(key).await,
        StorageBackend::Local => local::load(key).await,
    }
}

/// Deletes every object namespaced under the current `app_id`.
pub async fn delete_all() -> std::result::Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    match config::current().storage_backend {
        StorageBackend::Gcs => gcs::delete_all().await,
        StorageBackend::S3 => s3::delete_all().await,
        StorageBackend::Azure => azure::delete_all().await,
        StorageBackend::Local => local::delete_all().await,
    }
}
