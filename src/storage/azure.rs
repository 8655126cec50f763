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
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use futures::stream::StreamExt;
use once_cell::sync::OnceCell;
use std::env;
use tracing::{error, info, warn};

static AZURE_CLIENT: OnceCell<BlobServiceClient> = OnceCell::new();

/// Initializes the Azure Blob Storage client from `AZURE_STORAGE_ACCOUNT` /
/// `AZURE_STORAGE_ACCESS_KEY`. Called once at startup when `storage_backend`
/// is `azure`.
pub fn init_azure_client() {
    if AZURE_CLIENT.get().is_none() {
        let account = env::var("AZURE_STORAGE_ACCOUNT")
            .expect("missing environment variable AZURE_STORAGE_ACCOUNT");
        let access_key = env::var("AZURE_STORAGE_ACCESS_KEY")
            .expect("missing environment variable AZURE_STORAGE_ACCESS_KEY");

        let credentials = StorageCredentials::access_key(account.clone(), access_key);
        let client = BlobServiceClient::new(account, credentials);
        let _ = AZURE_CLIENT.set(client);
    }
}

fn blob_name(key: &str) -> String {
    format!("{key}.bin")
}

pub async fn store(key: &str, data: Bytes) {
    let client = match AZURE_CLIENT.get() {
        Some(c) => c,
        None => {
            error!("Azure client not initialized");
            return;
        }
    };
    let container = match &config::current().azure_container {
        Some(c) => c.clone(),
        None => {
            error!("azure_container not configured");
            return;
        }
    };

    let blob_client = client
        .container_client(&container)
        .blob_client(blob_name(key));

    match blob_client
        .put_block_blob(data.to_vec())
        .content_type("application/octet-stream")
        .into_future()
        .await
    {
        Ok(_) => info!("stored key '{}' in Azure container '{}'", key, container),
        Err(e) => error!("failed to store key '{}' in Azure: {}", key, e),
    }
}

pub async fn load(key: &str) -> Option<Bytes> {
    let client = AZURE_CLIENT.get()?;
    let container = config::current().azure_container.clone()?;

    let blob_client = client.container_client(&container).blob_client(blob_name(key));

    match blob_client.get_content().await {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            warn!("failed to load key '{}' from Azure container '{}': {}", key, container, e);
            None
        }
    }
}

pub async fn delete_all() -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
    let client = AZURE_CLIENT.get().ok_or("Azure client not initialized")?;
    let container_name = config::current()
        .azure_container
        .clone()
        .ok_or("azure_container not configured")?;
    let container = client.container_client(&container_name);

    let mut deleted = 0;
    let mut stream = container.list_blobs().into_stream();
    while let Some(page) = stream.next().await {
        let page = page?;
        for blob in page.blobs.blobs() {
            container.blob_client(&blob.name).delete().await?;
            deleted += 1;
        }
    }
    info!("deleted {deleted} Azure blobs in container '{container_name}'");
    Ok(deleted)
}
