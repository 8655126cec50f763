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
    use preview_core::cache::archive::{build, decompress_verified, has_valid_magic};
    use sha2::{Digest, Sha256};

    #[test]
    fn round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

        let archive = build(dir.path(), 1).unwrap();
        assert_eq!(archive.file_count, 2);
        assert!(has_valid_magic(&archive.compressed));

        let decompressed = decompress_verified(&archive.compressed).unwrap();
        let recomputed = hex::encode(Sha256::digest(&decompressed));
        assert_eq!(recomputed, archive.sha256);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = decompress_verified(b"not-a-zstd-frame").unwrap_err();
        assert_eq!(err.code(), "cache-fetch");
    }
}
