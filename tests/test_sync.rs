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
    use preview_core::config::LimitsConfig;
    use preview_core::model::{Project, ProjectFile};
    use preview_core::sync::{build_archive, fingerprint, SyncManifest};

    fn limits() -> LimitsConfig {
        LimitsConfig {
            max_file_bytes: 1024,
            archive_timeout_sec: 60,
        }
    }

    fn project_with(files: Vec<ProjectFile>) -> Project {
        Project {
            project_id: "proj".into(),
            files,
        }
    }

    #[test]
    fn excludes_node_modules_and_git_and_oversized_files() {
        let project = project_with(vec![
            ProjectFile { path: "src/main.rs".into(), content: b"fn main() {}".to_vec(), mode: 0o644 },
            ProjectFile { path: "node_modules/pkg/index.js".into(), content: b"x".to_vec(), mode: 0o644 },
            ProjectFile { path: ".git/HEAD".into(), content: b"ref".to_vec(), mode: 0o644 },
            ProjectFile { path: "huge.bin".into(), content: vec![0u8; 2048], mode: 0o644 },
        ]);

        let (archive, excluded, included) = build_archive(&project, &limits(), None).unwrap();
        assert_eq!(included, 1);
        assert_eq!(excluded, vec!["huge.bin".to_string()]);
        assert!(!archive.compressed.is_empty());
    }

    #[test]
    fn incremental_sync_skips_unchanged_files() {
        let files = vec![ProjectFile {
            path: "src/main.rs".into(),
            content: b"fn main() {}".to_vec(),
            mode: 0o644,
        }];
        let project = project_with(files.clone());

        let mut manifest = SyncManifest::default();
        manifest
            .files
            .insert("src/main.rs".to_string(), fingerprint(&files[0]));

        let (_, _, included) = build_archive(&project, &limits(), Some(&manifest)).unwrap();
        assert_eq!(included, 0);
    }
}
