// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Templates
 * Model, parser, clustering and signing for declarative probes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod cluster;
pub mod model;
pub mod parser;
pub mod signer;

use std::sync::Mutex;

pub use cluster::{cluster_templates, ClusterGroup};
pub use model::{Info, Template};
pub use parser::TemplateLoader;
pub use signer::{SignatureAlgorithm, TemplateSigner, TemplateVerifier, TrustStore};

use crate::core::inputs::MetaInput;
use crate::dsl::{DynamicValues, Value};
use crate::errors::ScanError;
use crate::protocols::{EventCallback, ExecutorOptions, ProtocolRequest};

/// Run every request block of a template against one target, threading
/// extracted values from one protocol step into the next. Returns whether
/// anything matched plus the values the steps produced.
pub async fn execute_template(
    template: &Template,
    target: &MetaInput,
    dynamic: &DynamicValues,
    options: &ExecutorOptions,
    callback: EventCallback<'_>,
) -> Result<(bool, DynamicValues), ScanError> {
    let mut context = dynamic.clone();
    for (name, value) in &template.variables {
        // inherited workflow values take precedence over template
        // variables of the same name
        context
            .entry(name.clone())
            .or_insert_with(|| Value::String(value.clone()));
    }

    let mut matched = false;
    let mut accumulated = DynamicValues::new();

    for request in &template.requests {
        if options.cancel.is_canceled() {
            return Err(ScanError::Canceled);
        }

        let step_context = crate::dsl::merge_values(&[&context, &accumulated]);
        let collector = Mutex::new(DynamicValues::new());
        let collecting_callback = |event: crate::protocols::InternalWrappedEvent| {
            if !event.result.dynamic_values.is_empty() {
                let mut guard = collector.lock().expect("step collector poisoned");
                for (key, value) in &event.result.dynamic_values {
                    guard.insert(key.clone(), value.clone());
                }
            }
            callback(event);
        };

        matched |= request
            .execute(target, &step_context, options, &collecting_callback)
            .await?;

        let step_values = collector.into_inner().expect("step collector");
        for (key, value) in step_values {
            accumulated.insert(key, value);
        }
    }

    Ok((matched, accumulated))
}
