// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Result Output
 * Structured result events, duplicate suppression and sinks
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod dedup;

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::dsl::Value;
use crate::protocols::InternalWrappedEvent;
use crate::templates::{Info, Template};
use crate::types::Severity;

pub use dedup::ResultDeduplicator;

/// The serializable public record for one finding.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEvent {
    #[serde(rename = "template-id")]
    pub template_id: String,
    #[serde(rename = "template-path", skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    pub info: Info,
    #[serde(rename = "type")]
    pub protocol: String,
    pub host: String,
    #[serde(rename = "matched-at")]
    pub matched_at: String,
    #[serde(rename = "matcher-name", skip_serializing_if = "Option::is_none")]
    pub matcher_name: Option<String>,
    #[serde(rename = "extracted-results", skip_serializing_if = "Vec::is_empty")]
    pub extracted_results: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub timestamp: String,
}

/// Build the public result events for one positive wrapped event: one per
/// matched matcher name, or a single event when only extractors fired.
pub fn make_result_events(
    template: &Template,
    wrapped: &InternalWrappedEvent,
    store_dumps: bool,
) -> Vec<ResultEvent> {
    let event = &wrapped.event;
    let get = |key: &str| event.get(key).map(Value::to_string);
    let matched_at = get("matched_at").unwrap_or_else(|| get("host").unwrap_or_default());

    let base = ResultEvent {
        template_id: wrapped.template_id.clone(),
        template_path: Some(template.path.display().to_string()),
        info: template.info.clone(),
        protocol: template.kind().to_string(),
        host: get("host").unwrap_or_default(),
        matched_at,
        matcher_name: None,
        extracted_results: wrapped.result.extracted_results.clone(),
        request: store_dumps.then(|| get("request")).flatten(),
        response: store_dumps.then(|| get("response")).flatten(),
        ip: get("ip"),
        timestamp: Utc::now().to_rfc3339(),
    };

    if wrapped.result.matches.is_empty() {
        return vec![base];
    }
    wrapped
        .result
        .matches
        .keys()
        .map(|name| {
            let mut out = base.clone();
            out.matcher_name = Some(name.clone());
            out
        })
        .collect()
}

/// Sink consuming result events. Implementations must tolerate concurrent
/// calls from worker tasks.
pub trait OutputWriter: Send + Sync {
    fn write(&self, event: &ResultEvent);
    fn close(&self) {}
}

/// Default sink: findings to stdout (text or JSONL) and optionally to a
/// file, duplicates suppressed by fingerprint.
pub struct StandardWriter {
    json: bool,
    colored: bool,
    file: Option<Mutex<File>>,
    dedup: ResultDeduplicator,
}

impl StandardWriter {
    pub fn new(
        json: bool,
        no_color: bool,
        output_path: Option<&Path>,
    ) -> std::io::Result<Self> {
        let file = match output_path {
            Some(path) => Some(Mutex::new(File::create(path)?)),
            None => None,
        };
        Ok(Self {
            json,
            colored: !no_color,
            file,
            dedup: ResultDeduplicator::new(),
        })
    }

    fn format_text(&self, event: &ResultEvent) -> String {
        let severity = event.info.severity.unwrap_or(Severity::Unknown);
        let severity_text = if self.colored {
            match severity {
                Severity::Critical => severity.as_str().red().bold().to_string(),
                Severity::High => severity.as_str().red().to_string(),
                Severity::Medium => severity.as_str().yellow().to_string(),
                Severity::Low => severity.as_str().green().to_string(),
                _ => severity.as_str().dimmed().to_string(),
            }
        } else {
            severity.as_str().to_string()
        };
        let id = if self.colored {
            event.template_id.bright_blue().to_string()
        } else {
            event.template_id.clone()
        };

        let mut line = format!(
            "[{}] [{}] [{}] {}",
            id, event.protocol, severity_text, event.matched_at
        );
        if let Some(name) = &event.matcher_name {
            line = format!(
                "[{}:{}] [{}] [{}] {}",
                id, name, event.protocol, severity_text, event.matched_at
            );
        }
        if !event.extracted_results.is_empty() {
            line.push_str(&format!(" [{}]", event.extracted_results.join(",")));
        }
        line
    }
}

impl OutputWriter for StandardWriter {
    fn write(&self, event: &ResultEvent) {
        if !self.dedup.unique(event) {
            return;
        }

        let serialized = if self.json {
            match serde_json::to_string(event) {
                Ok(serialized) => serialized,
                Err(e) => {
                    warn!("could not serialize result event: {}", e);
                    return;
                }
            }
        } else {
            self.format_text(event)
        };

        // matches always go to stdout; everything else is on stderr via
        // the log layer, so streams stay machine-readable
        println!("{}", serialized);

        if let Some(file) = &self.file {
            let line = if self.json {
                serialized
            } else {
                // files never carry ansi sequences
                let plain = StandardWriter {
                    json: false,
                    colored: false,
                    file: None,
                    dedup: ResultDeduplicator::new(),
                };
                plain.format_text(event)
            };
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn close(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Test/observability sink collecting events in memory.
#[derive(Default)]
pub struct MemoryWriter {
    pub events: Mutex<Vec<ResultEvent>>,
    dedup: ResultDeduplicator,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<ResultEvent> {
        std::mem::take(&mut self.events.lock().expect("memory writer poisoned"))
    }
}

impl OutputWriter for MemoryWriter {
    fn write(&self, event: &ResultEvent) {
        if !self.dedup.unique(event) {
            return;
        }
        self.events
            .lock()
            .expect("memory writer poisoned")
            .push(event.clone());
    }
}
