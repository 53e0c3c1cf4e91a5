// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Headless Protocol Adapter
 * Browser action sequences driven through headless chrome
 *
 * headless_chrome is synchronous, so the whole action sequence runs in a
 * blocking task, the way the crawler does it.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;

use crate::core::inputs::MetaInput;
use crate::dsl::{self, DynamicValues, Value};
use crate::errors::{ScanError, TemplateError};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};

/// One browser step. `args` carries the action's parameters (url,
/// selector, value, code, key); `name` captures the step output into the
/// event.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadlessAction {
    pub action: String,
    pub args: BTreeMap<String, String>,
    pub name: Option<String>,
}

/// A `headless` request block from a template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeadlessRequest {
    pub steps: Vec<HeadlessAction>,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
}

impl HeadlessRequest {
    /// Run the action sequence; returns captured values plus the final
    /// page state.
    fn run_browser(
        steps: Vec<HeadlessAction>,
        timeout: Duration,
    ) -> anyhow::Result<(BTreeMap<String, String>, String, String)> {
        let browser = Browser::new(
            LaunchOptions::default_builder()
                .headless(true)
                .build()
                .map_err(|e| anyhow::anyhow!("browser launch options error: {}", e))?,
        )?;
        let tab = browser.new_tab()?;
        tab.set_default_timeout(timeout);

        let mut captures = BTreeMap::new();
        let mut extra_headers: BTreeMap<String, String> = BTreeMap::new();

        for step in steps {
            let arg = |key: &str| step.args.get(key).cloned().unwrap_or_default();
            match step.action.as_str() {
                "navigate" => {
                    if !extra_headers.is_empty() {
                        let headers: HashMap<&str, &str> = extra_headers
                            .iter()
                            .map(|(k, v)| (k.as_str(), v.as_str()))
                            .collect();
                        let _ = tab.set_extra_http_headers(headers);
                    }
                    tab.navigate_to(&arg("url"))?;
                }
                "waitload" => {
                    tab.wait_until_navigated()?;
                }
                "click" => {
                    tab.find_element(&arg("selector"))?.click()?;
                }
                "text" => {
                    tab.find_element(&arg("selector"))?.click()?;
                    tab.type_str(&arg("value"))?;
                }
                "keyboard" => {
                    tab.press_key(&arg("key"))?;
                }
                "script" => {
                    let result = tab.evaluate(&arg("code"), true)?;
                    if let (Some(name), Some(value)) = (&step.name, result.value) {
                        captures.insert(name.clone(), value.to_string().trim_matches('"').to_string());
                    }
                }
                "screenshot" => {
                    let shot = tab.capture_screenshot(
                        Page::CaptureScreenshotFormatOption::Png,
                        None,
                        None,
                        true,
                    )?;
                    if let Some(name) = &step.name {
                        captures.insert(name.clone(), BASE64.encode(shot));
                    }
                }
                "setheader" => {
                    extra_headers.insert(arg("name"), arg("value"));
                }
                "waitvisible" => {
                    tab.wait_for_element(&arg("selector"))?;
                }
                "extract" => {
                    let text = tab.find_element(&arg("selector"))?.get_inner_text()?;
                    if let Some(name) = &step.name {
                        captures.insert(name.clone(), text);
                    }
                }
                "getresource" => {
                    if let Some(name) = &step.name {
                        captures.insert(name.clone(), tab.get_content()?);
                    }
                }
                "sleep" => {
                    let seconds: u64 = arg("duration").parse().unwrap_or(1);
                    std::thread::sleep(Duration::from_secs(seconds.min(30)));
                }
                other => {
                    warn!(action = other, "unknown headless action, skipping");
                }
            }
        }

        let body = tab.get_content().unwrap_or_default();
        let url = tab.get_url();
        Ok((captures, body, url))
    }
}

#[async_trait]
impl ProtocolRequest for HeadlessRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Headless
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        if self.steps.is_empty() {
            return Err(TemplateError::InvalidField {
                field: "headless",
                reason: "request block needs at least one step".into(),
            });
        }
        self.template_id = ctx.template_id.clone();
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
        let base_url = target.url();

        let mut values = DynamicValues::new();
        values.insert("BaseURL".into(), Value::String(base_url.clone()));
        values.insert("Hostname".into(), Value::String(target.id()));
        for (k, v) in dynamic {
            values.insert(k.clone(), v.clone());
        }

        // render markers inside every action argument up front
        let mut steps = self.steps.clone();
        for step in &mut steps {
            for value in step.args.values_mut() {
                if let dsl::Interpolated::Done(rendered) = dsl::interpolate(value, &values) {
                    *value = rendered;
                }
            }
        }

        options.rate_limiter.acquire(&target.id()).await?;

        let timeout = Duration::from_secs(options.options.timeout.max(10));
        let handle = tokio::task::spawn_blocking(move || Self::run_browser(steps, timeout));
        let outcome = tokio::time::timeout(timeout * 2, handle).await;
        options.progress.increment_requests();

        let (captures, body, final_url) = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                return Err(ScanError::Protocol {
                    target: base_url,
                    reason: format!("browser action failed: {}", e),
                })
            }
            Ok(Err(join_error)) => {
                return Err(ScanError::Protocol {
                    target: base_url,
                    reason: format!("browser worker panicked: {}", join_error),
                })
            }
            Err(_) => {
                return Err(ScanError::Network(crate::errors::NetworkError::Timeout {
                    target: base_url,
                    timeout,
                }))
            }
        };

        let mut event = InternalEvent::new();
        event.insert("host".into(), Value::String(target.id()));
        event.insert("matched_at".into(), Value::String(final_url.clone()));
        event.insert("url".into(), Value::String(final_url));
        event.insert("body".into(), Value::String(body));
        for (name, value) in captures {
            event.insert(name, Value::String(value));
        }
        for (k, v) in dynamic {
            event.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let result = self.operators.execute(&event, "body");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_deserialization() {
        let yaml = r#"
steps:
  - action: navigate
    args:
      url: "{{BaseURL}}/login"
  - action: waitload
  - action: extract
    name: heading
    args:
      selector: h1
"#;
        let request: HeadlessRequest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(request.steps.len(), 3);
        assert_eq!(request.steps[0].action, "navigate");
        assert_eq!(request.steps[2].name.as_deref(), Some("heading"));
    }

    #[test]
    fn test_compile_rejects_empty_steps() {
        let mut request = HeadlessRequest::default();
        let ctx = CompileContext {
            template_id: "headless-test".into(),
            template_dir: std::path::PathBuf::from("."),
            options: std::sync::Arc::new(crate::types::ScanOptions::default()),
        };
        assert!(request.compile(&ctx).is_err());
    }
}
