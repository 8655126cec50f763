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

//! File Sync (C5): builds a project archive from the document store,
//! uploads it to the Agent's `/extract`, and maintains an incremental
//! resync manifest (§4.5).
//!
//! The manifest fingerprints each file by `(size, sha256)` rather than
//! `(size, mtime)` — the document store doesn't carry meaningful mtimes for
//! content it hands the core, so a content hash is the faithful analogue.

use crate::agent::{AgentClient, ExecCommand};
use crate::config::LimitsConfig;
use crate::error::{CoreError, Result};
use crate::model::{Archive, Project, ProjectFile};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const MANIFEST_PATH: &str = ".drape/sync-manifest.json";
const PRESERVE_PREFIXES: &str = "node_modules,.package-json-hash";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileFingerprint {
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncManifest {
    pub files: HashMap<String, FileFingerprint>,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub files_synced: usize,
    pub bytes_uploaded: u64,
    pub excluded_files: Vec<String>,
    pub incremental: bool,
}

fn is_skipped_path(path: &str) -> bool {
    path.starts_with("node_modules/") || path.starts_with(".git/") || path == ".git"
}

pub fn fingerprint(file: &ProjectFile) -> FileFingerprint {
    FileFingerprint {
        size: file.content.len() as u64,
        sha256: hex::encode(Sha256::digest(&file.content)),
    }
}

/// Builds a gzip tar Archive from `project`, excluding `node_modules/**`,
/// `.git/**`, and files over `limits.max_file_bytes`. If `baseline` is
/// `Some`, only files whose fingerprint differs are included (incremental
/// resync); otherwise every eligible file is included.
pub fn build_archive(
    project: &Project,
    limits: &LimitsConfig,
    baseline: Option<&SyncManifest>,
) -> Result<(Archive, Vec<String>, usize)> {
    let mut tar_bytes = Vec::new();
    let mut excluded = Vec::new();
    let mut included = 0usize;

    {
        let mut builder = tar::Builder::new(&mut tar_bytes);
        for file in &project.files {
            if is_skipped_path(&file.path) {
                continue;
            }
            if file.content.len() as u64 > limits.max_file_bytes {
                warn!(path = %file.path, "file exceeds max_file_bytes, excluding from sync");
                excluded.push(file.path.clone());
                continue;
            }

            if let Some(manifest) = baseline {
                let current = fingerprint(file);
                if manifest.files.get(&file.path) == Some(&current) {
                    continue;
                }
            }

            let mut header = tar::Header::new_gnu();
            header.set_size(file.content.len() as u64);
            header.set_mode(file.mode);
            header.set_cksum();
            builder
                .append_data(&mut header, &file.path, &file.content[..])
                .map_err(|e| CoreError::Storage(format!("failed to append {}: {e}", file.path)))?;
            included += 1;
        }
        builder
            .finish()
            .map_err(|e| CoreError::Storage(format!("failed to finalize sync tar: {e}")))?;
    }

    let uncompressed_len = tar_bytes.len() as u64;
    let sha256 = hex::encode(Sha256::digest(&tar_bytes));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
    encoder
        .write_all(&tar_bytes)
        .map_err(|e| CoreError::Storage(format!("failed to gzip sync archive: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| CoreError::Storage(format!("failed to finalize gzip stream: {e}")))?;

    Ok((
        Archive {
            sha256,
            compressed,
            uncompressed_len,
            file_count: included,
        },
        excluded,
        included,
    ))
}

async fn fetch_manifest(agent: &AgentClient, cancel: &CancellationToken) -> Option<SyncManifest> {
    let cmd = ExecCommand::new(vec!["cat".to_string(), MANIFEST_PATH.to_string()]).timeout_ms(5_000);
    let result = agent.exec_cancellable(&cmd, cancel).await.ok()?;
    if result.exit_code != 0 {
        return None;
    }
    serde_json::from_str(&result.stdout).ok()
}

async fn write_manifest(agent: &AgentClient, manifest: &SyncManifest) -> Result<()> {
    let json = serde_json::to_vec(manifest)
        .map_err(|e| CoreError::Parse(format!("failed to encode sync manifest: {e}")))?;
    agent.upload(bytes::Bytes::from(json), MANIFEST_PATH).await
}

/// Materialises `project`'s current files into `project_root` on `agent`'s
/// VM. Re-attempts the upload once on a transient network failure, per
/// §4.7's "syncing" step.
pub async fn sync_project(
    agent: &AgentClient,
    project: &Project,
    limits: &LimitsConfig,
    project_root: &str,
    cancel: &CancellationToken,
) -> Result<SyncOutcome> {
    let baseline = fetch_manifest(agent, cancel).await;
    let incremental = baseline.is_some();
    let (archive, excluded, included) = build_archive(project, limits, baseline.as_ref())?;

    let mut attempt = 0;
    let extract_result = loop {
        attempt += 1;
        let preserve: Vec<&str> = PRESERVE_PREFIXES.split(',').collect();
        match agent
            .extract(bytes::Bytes::from(archive.compressed.clone()), project_root, &preserve)
            .await
        {
            Ok(r) => break r,
            Err(e) if attempt < 2 && e.retryable() => {
                warn!("sync upload failed, retrying once: {}", e);
                continue;
            }
            Err(e) => return Err(e),
        }
    };
    info!(
        files_extracted = extract_result.files_extracted,
        bytes = extract_result.bytes,
        "synced project files"
    );

    ensure_git_initialized(agent, project_root, cancel).await?;

    let mut manifest = SyncManifest::default();
    for file in &project.files {
        if is_skipped_path(&file.path) || excluded.contains(&file.path) {
            continue;
        }
        manifest.files.insert(file.path.clone(), fingerprint(file));
    }
    write_manifest(agent, &manifest).await?;

    Ok(SyncOutcome {
        files_synced: included,
        bytes_uploaded: extract_result.bytes,
        excluded_files: excluded,
        incremental,
    })
}

async fn ensure_git_initialized(
    agent: &AgentClient,
    project_root: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let check = ExecCommand::new(vec![
        "test".to_string(),
        "-d".to_string(),
        format!("{project_root}/.git"),
    ])
    .timeout_ms(5_000);
    if let Ok(r) = agent.exec_cancellable(&check, cancel).await {
        if r.exit_code == 0 {
            return Ok(());
        }
    }

    let init = ExecCommand::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cd {project_root} && git init && git add -A && git commit -m 'initial'"),
    ])
    .timeout_ms(30_000);
    let result = agent
        .exec_cancellable(&init, cancel)
        .await
        .map_err(|e| CoreError::Storage(format!("git init failed: {e}")))?;
    if result.exit_code != 0 {
        warn!(exit_code = result.exit_code, "git init exited non-zero, continuing anyway");
    }
    Ok(())
}
