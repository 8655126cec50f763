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
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

static S3_CLIENT: OnceCell<Client> = OnceCell::new();

/// Initializes the AWS S3 client from the environment / default credential
/// chain. Region falls back to `us-east-1` when unset. Called once at
/// startup when `storage_backend` is `s3`.
pub async fn init_s3_client() {
    if S3_CLIENT.get().is_none() {
        let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
        let cfg = aws_config::from_env().region(region_provider).load().await;
        let client = Client::new(&cfg);
        let _ = S3_CLIENT.set(client);
    }
}

fn object_path(key: &str) -> String {
    let app_id = &config::current().app_id;
    format!("cache/{app_id}/{key}.bin")
}

/// Uploads an already-compressed Cache Archive blob to S3 under
/// `cache/{app_id}/{key}.bin`.
pub async fn store(key: &str, data: Bytes) {
    let client = match S3_CLIENT.get() {
        Some(c) => c,
        None => {
            error!("S3 client not initialized");
            return;
        }
    };
    let bucket = match &config::current().s3_bucket {
        Some(b) => b.clone(),
        None => {
            error!("s3_bucket not configured");
            return;
        }
    };
    let path = object_path(key);

    match client
        .put_object()
        .bucket(&bucket)
        .key(&path)
        .body(ByteStream::from(data.to_vec()))
        .content_type("application/octet-stream")
        .send()
        .await
    {
        Ok(_) => info!("stored key '{}' in S3 bucket '{}'", key, bucket),
        Err(e) => error!("failed to store key '{}' in S3: {}", key, e),
    }
}

pub async fn load(key: &str) -> Option<Bytes> {
    let client = S3_CLIENT.get()?;
    let cfg = config::current();
    let bucket = cfg.s3_bucket.as_ref()?;
    let path = object_path(key);

    match client.get_object().bucket(bucket).key(&path).send().await {
        Ok(resp) => match resp.body.collect().await {
            Ok(collected) => Some(collected.into_bytes()),
            Err(e) => {
                error!("failed to read S3 body for key '{}': {}", key, e);
                None
            }
        },
        Err(e) => {
            warn!("failed to get object '{}' from S3: {}", key, e);
            None
        }
    }
}

pub async fn delete_all() -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let client = S3_CLIENT
        .get()
        .ok_or("S3 client not initialized")?;
    let cfg = config::current();
    let bucket = cfg
        .s3_bucket
        .as_ref()
        .ok_or("s3_bucket not configured")?;
    let prefix = format!("cache/{}/", cfg.app_id);

    let listed = client
        .list_objects_v2()
        .bucket(bucket)
        .prefix(&prefix)
        .send()
        .await?;

    let mut deleted = 0;
    for obj in listed.contents() {
        if let Some(k) = obj.key() {
            client.delete_object().bucket(bucket).key(k).send().await?;
            deleted += 1;
        }
    }
    info!("deleted {deleted} S3 objects under prefix '{prefix}'");
    Ok(deleted)
}
