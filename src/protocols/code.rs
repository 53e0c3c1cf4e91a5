// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Code Protocol Adapter
 * Runs signed template snippets through external interpreters
 *
 * Unsigned code templates are refused unless the operator explicitly
 * allows them, and even then the produced events are flagged unsigned.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::inputs::MetaInput;
use crate::dsl::{DynamicValues, Value};
use crate::errors::{ScanError, SignatureError, TemplateError};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};

/// A `code` request block: an interpreter list plus the snippet, inline
/// or referenced by file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CodeRequest {
    /// Candidate interpreters, first match wins (`python`, `powershell`,
    /// `bash`, ...).
    pub engine: Vec<String>,
    pub source: String,
    /// Alternative to `source`: path relative to the template.
    pub file: Option<String>,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
    #[serde(skip)]
    resolved_source: String,
    #[serde(skip)]
    verified: bool,
}

impl CodeRequest {
    /// Set by the template compiler once the signature chain has been
    /// checked against the trust store.
    pub fn set_verified(&mut self, verified: bool) {
        self.verified = verified;
    }

    fn interpreter_command(engine: &str) -> (String, Vec<String>) {
        match engine {
            "python" | "python3" | "py" => ("python3".into(), vec!["-".into()]),
            "powershell" | "pwsh" => (
                "pwsh".into(),
                vec!["-NoProfile".into(), "-Command".into(), "-".into()],
            ),
            "bash" => ("bash".into(), vec!["-s".into()]),
            "sh" => ("sh".into(), vec!["-s".into()]),
            other => (other.to_string(), Vec::new()),
        }
    }
}

#[async_trait]
impl ProtocolRequest for CodeRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Code
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        if self.engine.is_empty() {
            return Err(TemplateError::InvalidField {
                field: "code",
                reason: "request block needs an engine".into(),
            });
        }
        self.template_id = ctx.template_id.clone();
        self.resolved_source = match &self.file {
            Some(file) => std::fs::read_to_string(ctx.template_dir.join(file))?,
            None => self.source.clone(),
        };
        if self.resolved_source.trim().is_empty() {
            return Err(TemplateError::InvalidField {
                field: "code",
                reason: "request block needs 'source' or 'file'".into(),
            });
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
        if options.cancel.is_canceled() {
            return Err(ScanError::Canceled);
        }
        // workflow children bypass the engine admission filter, so the
        // protocol gate is enforced here as well
        if !options.options.enable_code {
            return Err(ScanError::Protocol {
                target: target.input.clone(),
                reason: "code protocol is not enabled".into(),
            });
        }
        if !self.verified {
            if !options.options.allow_unsigned_code {
                options.progress.increment_unsigned_skipped();
                return Err(ScanError::Signature(SignatureError::Untrusted));
            }
            warn!(
                template = self.template_id.as_str(),
                "executing unsigned code template"
            );
        }

        let engine = self.engine.first().expect("validated at compile");
        let (program, args) = Self::interpreter_command(engine);

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("URL", target.url())
            .env("Host", target.hostname());
        for (name, value) in dynamic {
            command.env(name, value.to_string());
        }

        options.rate_limiter.acquire(&target.id()).await?;
        debug!(template = self.template_id.as_str(), %program, "spawning code engine");

        let mut child = command.spawn().map_err(|e| ScanError::Protocol {
            target: target.input.clone(),
            reason: format!("could not spawn {}: {}", program, e),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let source = self.resolved_source.clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(source.as_bytes()).await;
            });
        }

        let timeout = Duration::from_secs(options.options.timeout.max(5));
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ScanError::Protocol {
                    target: target.input.clone(),
                    reason: format!("code engine failed: {}", e),
                })
            }
            Err(_) => {
                return Err(ScanError::Network(crate::errors::NetworkError::Timeout {
                    target: target.input.clone(),
                    timeout,
                }))
            }
        };
        options.progress.increment_requests();

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let mut event = InternalEvent::new();
        event.insert("host".into(), Value::String(target.id()));
        event.insert("matched_at".into(), Value::String(target.input.clone()));
        event.insert("response".into(), Value::String(stdout.clone()));
        event.insert("stdout".into(), Value::String(stdout));
        event.insert("stderr".into(), Value::String(stderr));
        event.insert(
            "exit_code".into(),
            Value::Int(i64::from(output.status.code().unwrap_or(-1))),
        );
        if !self.verified {
            event.insert("unsigned".into(), Value::Bool(true));
        }
        for (k, v) in dynamic {
            event.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let result = self.operators.execute(&event, "response");
        let positive = result.is_positive(self.operators.has_extractors());
        callback(InternalWrappedEvent {
            template_id: self.template_id.clone(),
            event,
            result,
            positive,
        });
        Ok(positive)
    }
}
