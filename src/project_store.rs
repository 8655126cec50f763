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

//! External document store (§3 "Project"): resolves an opaque `project_id`
//! to its current file set. Reuses the teacher's multi-backend `storage`
//! module as the document store's backing object store rather than
//! introducing a second persistence layer, keyed under a `projects/`
//! namespace distinct from the Cache Fabric's `cache/` namespace.

use crate::error::{CoreError, Result};
use crate::model::{Project, ProjectFile};
use bytes::Bytes;

fn document_key(project_id: &str) -> String {
    format!("projects/{project_id}.json")
}

/// Fetches the current file set for `project_id`. Returns
/// `CoreError::UnsupportedProject` if the document store has no record of
/// it — callers treat this the same as a detector rejection, since there is
/// nothing to detect or sync.
pub async fn fetch_project(project_id: &str) -> Result<Project> {
    let blob = crate::storage::load(&document_key(project_id))
        .await
        .ok_or_else(|| CoreError::UnsupportedProject)?;
    let files: Vec<ProjectFile> = serde_json::from_slice(&blob)
        .map_err(|e| CoreError::Parse(format!("malformed project document: {e}")))?;
    Ok(Project {
        project_id: project_id.to_string(),
        files,
    })
}

/// Writes `project`'s current file set back to the document store, used by
/// whatever out-of-band ingest path populates a project before its first
/// preview request.
pub async fn put_project(project: &Project) -> Result<()> {
    let encoded = serde_json::to_vec(&project.files)
        .map_err(|e| CoreError::Parse(format!("failed to encode project document: {e}")))?;
    crate::storage::store(&document_key(&project.project_id), Bytes::from(encoded)).await;
    Ok(())
}
