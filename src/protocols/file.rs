// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - File Protocol Adapter
 * Walks local trees and matches file contents
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::inputs::MetaInput;
use crate::dsl::{DynamicValues, Value};
use crate::errors::{ScanError, TemplateError};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};

const DEFAULT_MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

/// A `file` request block: the "request" is reading a file beneath the
/// target path, the "response" is its content.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileRequest {
    /// Extensions to include; `all` admits every file.
    pub extensions: Vec<String>,
    /// Extensions always skipped, even under `all`.
    pub denylist: Vec<String>,
    #[serde(rename = "max-size")]
    pub max_size: usize,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
}

impl Default for FileRequest {
    fn default() -> Self {
        Self {
            extensions: vec!["all".to_string()],
            denylist: Vec::new(),
            max_size: DEFAULT_MAX_FILE_SIZE,
            operators: Operators::default(),
            template_id: String::new(),
        }
    }
}

impl FileRequest {
    fn wants(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if self.denylist.iter().any(|d| d.trim_start_matches('.') == extension) {
            return false;
        }
        if self.extensions.iter().any(|e| e == "all" || e == "*") {
            return true;
        }
        self.extensions
            .iter()
            .any(|e| e.trim_start_matches('.') == extension)
    }

    fn collect_files(&self, root: &Path, out: &mut Vec<PathBuf>) {
        if root.is_file() {
            if self.wants(root) {
                out.push(root.to_path_buf());
            }
            return;
        }
        let Ok(entries) = std::fs::read_dir(root) else {
            return;
        };
        let mut entries: Vec<_> = entries.flatten().map(|e| e.path()).collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                self.collect_files(&path, out);
            } else if self.wants(&path) {
                out.push(path);
            }
        }
    }
}

#[async_trait]
impl ProtocolRequest for FileRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::File
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        self.template_id = ctx.template_id.clone();
        if self.max_size == 0 {
            self.max_size = DEFAULT_MAX_FILE_SIZE;
        }
        self.operators.compile()
    }

    fn requests(&self) -> usize {
        1
    }

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        let root = PathBuf::from(&target.input);
        if !root.exists() {
            return Err(ScanError::Protocol {
                target: target.input.clone(),
                reason: "path does not exist".into(),
            });
        }

        let mut files = Vec::new();
        self.collect_files(&root, &mut files);
        debug!(
            template = self.template_id.as_str(),
            files = files.len(),
            "walking file target"
        );

        let mut matched_any = false;
        for path in files {
            if options.cancel.is_canceled() {
                return Err(ScanError::Canceled);
            }
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if metadata.len() as usize > self.max_size {
                debug!(path = %path.display(), "skipping oversized file");
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };

            let mut event = InternalEvent::new();
            event.insert("host".into(), Value::String(target.input.clone()));
            event.insert(
                "matched_at".into(),
                Value::String(path.display().to_string()),
            );
            event.insert("path".into(), Value::String(path.display().to_string()));
            event.insert(
                "body".into(),
                Value::String(String::from_utf8_lossy(&bytes).to_string()),
            );
            event.insert("raw".into(), Value::Bytes(bytes.clone()));
            event.insert("content_length".into(), Value::Int(bytes.len() as i64));
            for (k, v) in dynamic {
                event.entry(k.clone()).or_insert_with(|| v.clone());
            }

            options.progress.increment_requests();
            let result = self.operators.execute(&event, "body");
            let positive = result.is_positive(self.operators.has_extractors());
            matched_any |= positive;
            callback(InternalWrappedEvent {
                template_id: self.template_id.clone(),
                event,
                result,
                positive,
            });
        }
        Ok(matched_any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Matcher, MatcherType};
    use std::sync::Arc;

    fn compiled_request(extensions: Vec<&str>, words: Vec<&str>) -> FileRequest {
        let mut matcher = Matcher {
            kind: MatcherType::Word,
            words: words.into_iter().map(String::from).collect(),
            ..Default::default()
        };
        matcher.compile().unwrap();

        let mut request = FileRequest {
            extensions: extensions.into_iter().map(String::from).collect(),
            operators: Operators {
                matchers: vec![matcher],
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = CompileContext {
            template_id: "file-test".into(),
            template_dir: PathBuf::from("."),
            options: Arc::new(crate::types::ScanOptions::default()),
        };
        request.compile(&ctx).unwrap();
        request
    }

    #[test]
    fn test_extension_filtering() {
        let request = compiled_request(vec!["log"], vec!["x"]);
        assert!(request.wants(Path::new("/var/log/app.log")));
        assert!(!request.wants(Path::new("/var/log/app.txt")));

        let all = compiled_request(vec!["all"], vec!["x"]);
        assert!(all.wants(Path::new("anything.bin")));
    }

    #[test]
    fn test_denylist_wins_over_all() {
        let mut request = compiled_request(vec!["all"], vec!["x"]);
        request.denylist = vec!["exe".into()];
        assert!(!request.wants(Path::new("malware.exe")));
        assert!(request.wants(Path::new("notes.txt")));
    }

    #[tokio::test]
    async fn test_execute_matches_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.txt"), "password=hunter2").unwrap();
        std::fs::write(dir.path().join("clean.txt"), "nothing to see").unwrap();

        let request = compiled_request(vec!["txt"], vec!["password="]);
        let options = ExecutorOptions::from_options(Arc::new(crate::types::ScanOptions {
            rate_limit: 0,
            ..Default::default()
        }));

        let events = std::sync::Mutex::new(Vec::new());
        let matched = request
            .execute(
                &MetaInput::new(dir.path().display().to_string()),
                &DynamicValues::new(),
                &options,
                &|event| events.lock().unwrap().push(event),
            )
            .await
            .unwrap();

        assert!(matched);
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        let positives: Vec<_> = events.iter().filter(|e| e.positive).collect();
        assert_eq!(positives.len(), 1);
        assert!(positives[0].event["matched_at"]
            .to_string()
            .ends_with("config.txt"));
    }

    #[tokio::test]
    async fn test_oversized_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'a'; 2048]).unwrap();

        let mut request = compiled_request(vec!["txt"], vec!["aaaa"]);
        request.max_size = 1024;

        let options = ExecutorOptions::from_options(Arc::new(crate::types::ScanOptions {
            rate_limit: 0,
            ..Default::default()
        }));
        let matched = request
            .execute(
                &MetaInput::new(dir.path().display().to_string()),
                &DynamicValues::new(),
                &options,
                &|_| {},
            )
            .await
            .unwrap();
        assert!(!matched);
    }
}
