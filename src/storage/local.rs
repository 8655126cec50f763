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
use once_cell::sync::OnceCell;
use std::fs::read_dir;
use std::{
    error::Error,
    fs::{self, File},
    io::Write,
    path::PathBuf,
};
use tracing::{error, info, warn};

/// Root directory for local storage. Defaults to `storage/cache` under the
/// process working directory; tests redirect it to a temp dir so they never
/// touch the real filesystem layout.
static ROOT: OnceCell<PathBuf> = OnceCell::new();

fn root() -> PathBuf {
    ROOT.get_or_init(|| PathBuf::from("storage/cache")).clone()
}

/// Redirects local storage to a temp dir for a test process. Best-effort:
/// the first test in the process wins the `OnceCell`; that's fine as long as
/// each test uses a distinct app_id-namespaced subpath.
pub fn set_root_for_test(path: PathBuf) {
    let _ = ROOT.set(path);
}

/// Constructs the full filesystem path for a given storage key.
pub fn build_path(key: &str) -> PathBuf {
    let app_id = &config::current().app_id;
    let mut path = root();
    path.push(app_id);
    path.push(format!("{key}.bin"));
    path
}

pub async fn store(key: &str, data: Bytes) {
    let path = build_path(key);

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            error!("failed to create local storage directory {:?}: {}", parent, e);
            return;
        }
    }

    match File::create(&path) {
        Ok(mut file) => {
            if let Err(e) = file.write_all(&data) {
                error!("failed to write file for key '{}': {}", key, e);
            } else {
                info!("stored key '{}' in local storage at {:?}", key, path);
            }
        }
        Err(e) => error!("failed to create file for key '{}': {}", key, e),
    }
}

pub async fn load(key: &str) -> Option<Bytes> {
    let path = build_path(key);
    match fs::read(&path) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            warn!("failed to read local storage file {:?}: {}", path, e);
            None
        }
    }
}

pub async fn delete_all() -> Result<usize, Box<dyn Error + Send + Sync>> {
    let app_id = config::current().app_id.clone();
    let mut dir_path = root();
    dir_path.push(&app_id);
    let mut deleted = 0;

    match read_dir(&dir_path) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                    match fs::remove_file(&path) {
                        Ok(_) => deleted += 1,
                        Err(e) => warn!("failed to delete file {:?}: {}", path, e),
                    }
                }
            }
            info!("deleted {deleted} local storage files under {:?}", dir_path);
            Ok(deleted)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(format!("failed to read local storage directory: {e}").into()),
    }
}
