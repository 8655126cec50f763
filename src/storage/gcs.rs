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

use crate::config;
use bytes::Bytes;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::{error, info, warn};

pub static GCS_CLIENT: OnceLock<Client> = OnceLock::new();

/// Initializes the GCS client from the ambient credentials (ADC). Called
/// once at startup when `storage_backend` is `gcs`.
pub async fn init_gcs_client() {
    if GCS_CLIENT.get().is_none() {
        if let Ok(cfg) = ClientConfig::default().with_auth().await {
            let _ = GCS_CLIENT.set(Client::new(cfg));
        } else {
            error!("failed to build GCS client config");
        }
    }
}

fn object_path(key: &str) -> String {
    let app_id = &config::current().app_id;
    format!("cache/{app_id}/{key}.bin")
}

/// Uploads an already-compressed Cache Archive blob to GCS.
pub async fn store(key: &str, data: Bytes) {
    let client = match GCS_CLIENT.get() {
        Some(c) => c,
        None => {
            error!("GCS client not initialized");
            return;
        }
    };
    let bucket = match &config::current().gcs_bucket {
        Some(b) => b.clone(),
        None => {
            error!("gcs_bucket not configured");
            return;
        }
    };
    let path = object_path(key);

    let req = UploadObjectRequest {
        bucket: bucket.clone(),
        ..Default::default()
    };
    let media = Media {
        name: Cow::Owned(path.clone()),
        content_type: Cow::Borrowed("application/octet-stream"),
        content_length: Some(data.len() as u64),
    };

    match client
        .upload_object(&req, data.to_vec(), &UploadType::Simple(media))
        .await
    {
        Ok(_) => info!("stored key '{}' in GCS bucket '{}'", key, bucket),
        Err(e) => error!("failed to upload '{}' to GCS bucket '{}': {}", path, bucket, e),
    }
}

pub async fn load(key: &str) -> Option<Bytes> {
    let client = GCS_CLIENT.get()?;
    let bucket = config::current().gcs_bucket.clone()?;
    let path = object_path(key);

    let req = GetObjectRequest {
        bucket: bucket.clone(),
        object: path.clone(),
        ..Default::default()
    };

    match client.download_object(&req, &Range::default()).await {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            warn!("failed to download object '{}' from bucket '{}': {}", path, bucket, e);
            None
        }
    }
}

pub async fn delete_all() -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let client = GCS_CLIENT.get().ok_or("GCS client not initialized")?;
    let cfg = config::current();
    let bucket = cfg.gcs_bucket.clone().ok_or("gcs_bucket not configured")?;
    let prefix = format!("cache/{}/", cfg.app_id);

    let listed = client
        .list_objects(&ListObjectsRequest {
            bucket: bucket.clone(),
            prefix: Some(prefix.clone()),
            ..Default::default()
        })
        .await?;

    let mut deleted = 0;
    for obj in listed.items.unwrap_or_default() {
        client
            .delete_object(&DeleteObjectRequest {
                bucket: bucket.clone(),
                object: obj.name.clone(),
                ..Default::default()
            })
            .await?;
        deleted += 1;
    }
    info!("deleted {deleted} GCS objects under prefix '{prefix}'");
    Ok(deleted)
}
