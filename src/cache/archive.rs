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

//! Cache Archive format (§3, §4.3): a tar of a package-manager store
//! compressed with zstd at level 1, content-addressed by the SHA-256 of its
//! uncompressed tar bytes.

use crate::error::{CoreError, Result};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::path::Path;

/// First four bytes of any valid zstd frame.
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Debug, Clone)]
pub struct CacheArchive {
    pub sha256: String,
    pub compressed: Bytes,
    pub uncompressed_len: u64,
    pub file_count: usize,
}

/// Builds a Cache Archive from every regular file under `root`.
pub fn build(root: &Path, zstd_level: i32) -> Result<CacheArchive> {
    let mut tar_bytes = Vec::new();
    let mut file_count = 0usize;
    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for entry in walk_files(root)? {
            let rel = entry
                .strip_prefix(root)
                .map_err(|e| CoreError::Storage(format!("bad archive entry path: {e}")))?;
            builder
                .append_path_with_name(&entry, rel)
                .map_err(|e| CoreError::Storage(format!("failed to append {entry:?}: {e}")))?;
            file_count += 1;
        }
        builder
            .finish()
            .map_err(|e| CoreError::Storage(format!("failed to finalize tar: {e}")))?;
    }

    let uncompressed_len = tar_bytes.len() as u64;
    let sha256 = hex::encode(Sha256::digest(&tar_bytes));

    let compressed = zstd::encode_all(&tar_bytes[..], zstd_level)
        .map_err(|e| CoreError::Storage(format!("zstd compression failed: {e}")))?;

    Ok(CacheArchive {
        sha256,
        compressed: Bytes::from(compressed),
        uncompressed_len,
        file_count,
    })
}

fn walk_files(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| CoreError::Storage(format!("failed to read {dir:?}: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::Storage(format!("bad dir entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Verifies the zstd magic number at byte offset 0, per §6.
pub fn has_valid_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..4] == ZSTD_MAGIC
}

/// Decompresses and verifies a downloaded Cache Archive in one step. Used by
/// the Cache Fabric after pulling bytes from a peer or object storage.
pub fn decompress_verified(data: &[u8]) -> Result<Vec<u8>> {
    if !has_valid_magic(data) {
        return Err(CoreError::CacheFetch {
            stage: "verify".into(),
            message: "zstd magic number mismatch".into(),
        });
    }
    zstd::decode_all(data).map_err(|e| CoreError::CacheFetch {
        stage: "extract".into(),
        message: e.to_string(),
    })
}
