// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Project File Cache
 * On-disk request fingerprint -> response store reused across runs
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROJECT_FORMAT_VERSION: u32 = 1;
const META_FILE: &str = "project.meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct ProjectMeta {
    version: u32,
}

/// A cached protocol response.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredResponseFile {
    status: u16,
    headers: Vec<(String, String)>,
    body_b64: String,
    duration_ms: u64,
}

/// Directory of (request fingerprint -> response blob) entries. Lookups
/// are concurrent; writers serialize per key through temp-file renames.
pub struct ProjectFile {
    dir: PathBuf,
}

impl ProjectFile {
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let meta_path = dir.join(META_FILE);
        if meta_path.exists() {
            let meta: ProjectMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if meta.version != PROJECT_FORMAT_VERSION {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported project file version {}", meta.version),
                ));
            }
        } else {
            let meta = ProjectMeta {
                version: PROJECT_FORMAT_VERSION,
            };
            std::fs::write(&meta_path, serde_json::to_string(&meta)?)?;
        }
        debug!(dir = %dir.display(), "project file cache open");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fingerprint))
    }

    pub fn get(&self, fingerprint: &str) -> Option<StoredResponse> {
        let content = std::fs::read_to_string(self.entry_path(fingerprint)).ok()?;
        let stored: StoredResponseFile = serde_json::from_str(&content).ok()?;
        let body = BASE64.decode(&stored.body_b64).ok()?;
        Some(StoredResponse {
            status: stored.status,
            headers: stored.headers,
            body,
            duration_ms: stored.duration_ms,
        })
    }

    pub fn store(&self, fingerprint: &str, response: &StoredResponse) {
        let stored = StoredResponseFile {
            status: response.status,
            headers: response.headers.clone(),
            body_b64: BASE64.encode(&response.body),
            duration_ms: response.duration_ms,
        };
        let Ok(serialized) = serde_json::to_string(&stored) else {
            return;
        };
        // write-then-rename keeps concurrent readers away from partial
        // entries
        let final_path = self.entry_path(fingerprint);
        let temp_path = self.dir.join(format!(".{}.tmp", fingerprint));
        if std::fs::write(&temp_path, serialized)
            .and_then(|_| std::fs::rename(&temp_path, &final_path))
            .is_err()
        {
            warn!(fingerprint, "could not persist project file entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredResponse {
        StoredResponse {
            status: 200,
            headers: vec![("Server".into(), "nginx".into())],
            body: b"hello world".to_vec(),
            duration_ms: 42,
        }
    }

    #[test]
    fn test_store_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let project = ProjectFile::open(dir.path()).unwrap();

        assert!(project.get("abc").is_none());
        project.store("abc", &sample());
        assert_eq!(project.get("abc").unwrap(), sample());
    }

    #[test]
    fn test_reopen_existing_project() {
        let dir = tempfile::tempdir().unwrap();
        {
            let project = ProjectFile::open(dir.path()).unwrap();
            project.store("key", &sample());
        }
        let reopened = ProjectFile::open(dir.path()).unwrap();
        assert!(reopened.get("key").is_some());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(META_FILE), r#"{"version":9}"#).unwrap();
        assert!(ProjectFile::open(dir.path()).is_err());
    }
}
