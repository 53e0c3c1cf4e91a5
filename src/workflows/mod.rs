// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Workflow Engine
 * Conditional sub-template dispatch driven by matcher outcomes
 *
 * A workflow is a tree of template references. Execution is depth-first
 * left-to-right; a parent's extracted values (internal ones included)
 * populate each child's dynamic-value context.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::core::inputs::MetaInput;
use crate::dsl::{self, DynamicValues, Value};
use crate::errors::{ScanError, TemplateError};
use crate::protocols::{EventCallback, ExecutorOptions};
use crate::templates::{execute_template, Template, TemplateLoader};

/// A workflow tree node as written in a template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowNode {
    /// Child template reference, a path relative to the workflow file.
    pub template: String,
    pub matchers: Vec<WorkflowMatcherEntry>,
    pub subtemplates: Vec<WorkflowNode>,
}

/// A branch guarded by a matcher name from the parent's result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkflowMatcherEntry {
    pub name: String,
    pub subtemplates: Vec<WorkflowNode>,
}

/// A workflow with every referenced template loaded and compiled.
#[derive(Debug, Clone, Default)]
pub struct CompiledWorkflow {
    pub nodes: Vec<CompiledNode>,
    pub stop_at_first_match: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledNode {
    pub template: Arc<Template>,
    pub matchers: Vec<CompiledMatcherEntry>,
    pub subtemplates: Vec<CompiledNode>,
}

#[derive(Debug, Clone)]
pub struct CompiledMatcherEntry {
    pub name: String,
    pub subtemplates: Vec<CompiledNode>,
}

/// Load and compile a workflow tree. `visited` carries the absolute paths
/// on the current compilation chain; revisiting one is a cycle.
pub fn compile(
    nodes: &[WorkflowNode],
    base_dir: &Path,
    loader: &TemplateLoader,
    visited: &mut HashSet<PathBuf>,
) -> Result<Vec<CompiledNode>, TemplateError> {
    let mut compiled = Vec::with_capacity(nodes.len());
    for node in nodes {
        let candidate = base_dir.join(&node.template);
        let path = if candidate.is_file() {
            candidate
        } else {
            PathBuf::from(&node.template)
        };
        let absolute = path.canonicalize().unwrap_or(path);
        if !visited.insert(absolute.clone()) {
            return Err(TemplateError::Cycle(absolute));
        }

        let template = loader.load_with_visited(&absolute, visited)?;
        let matchers = node
            .matchers
            .iter()
            .map(|entry| {
                Ok(CompiledMatcherEntry {
                    name: entry.name.clone(),
                    subtemplates: compile(&entry.subtemplates, base_dir, loader, visited)?,
                })
            })
            .collect::<Result<Vec<_>, TemplateError>>()?;
        let subtemplates = compile(&node.subtemplates, base_dir, loader, visited)?;

        visited.remove(&absolute);
        compiled.push(CompiledNode {
            template,
            matchers,
            subtemplates,
        });
    }
    Ok(compiled)
}

/// Every template reachable from the workflow tree, used by the engine
/// to resolve child events back to their template metadata.
pub fn collect_templates(workflow: &CompiledWorkflow) -> Vec<Arc<Template>> {
    fn walk(nodes: &[CompiledNode], out: &mut Vec<Arc<Template>>) {
        for node in nodes {
            out.push(Arc::clone(&node.template));
            for entry in &node.matchers {
                walk(&entry.subtemplates, out);
            }
            walk(&node.subtemplates, out);
        }
    }
    let mut out = Vec::new();
    walk(&workflow.nodes, &mut out);
    out
}

/// Execute a compiled workflow against one target. Returns whether any
/// node in the tree produced a positive result.
pub async fn execute_workflow(
    workflow: &CompiledWorkflow,
    target: &MetaInput,
    options: &ExecutorOptions,
    callback: EventCallback<'_>,
) -> Result<bool, ScanError> {
    let mut matched = false;
    for node in &workflow.nodes {
        if options.cancel.is_canceled() {
            return Err(ScanError::Canceled);
        }
        matched |= execute_node(node, target, DynamicValues::new(), options, callback).await?;
        if matched && workflow.stop_at_first_match {
            break;
        }
    }
    Ok(matched)
}

fn execute_node<'a>(
    node: &'a CompiledNode,
    target: &'a MetaInput,
    inherited: DynamicValues,
    options: &'a ExecutorOptions,
    callback: EventCallback<'a>,
) -> BoxFuture<'a, Result<bool, ScanError>> {
    Box::pin(async move {
        // collect matcher names and extracted values from the node's
        // events while they stream to the caller
        let collected = std::sync::Mutex::new((HashSet::<String>::new(), DynamicValues::new()));
        let collecting_callback = |event: crate::protocols::InternalWrappedEvent| {
            if event.positive || !event.result.dynamic_values.is_empty() {
                let mut guard = collected.lock().expect("workflow collector poisoned");
                for name in event.result.matched_names() {
                    guard.0.insert(name);
                }
                for (key, value) in &event.result.dynamic_values {
                    guard.1.insert(key.clone(), value.clone());
                }
                for (key, values) in &event.result.extracts {
                    let value = if values.len() == 1 {
                        Value::String(values[0].clone())
                    } else {
                        Value::List(values.iter().cloned().map(Value::String).collect())
                    };
                    guard.1.insert(key.clone(), value);
                }
            }
            callback(event);
        };

        let (matched, step_values) =
            execute_template(&node.template, target, &inherited, options, &collecting_callback)
                .await?;

        let (matched_names, mut extracted) = collected.into_inner().expect("workflow collector");
        for (key, value) in step_values {
            extracted.insert(key, value);
        }
        if !matched && extracted.is_empty() {
            return Ok(false);
        }

        // children see the parent context with the parent's extractions
        // winning on collision
        let child_context = dsl::merge_values(&[&inherited, &extracted]);

        let mut any_child = false;
        if node.matchers.is_empty() {
            if matched {
                for child in &node.subtemplates {
                    any_child |=
                        execute_node(child, target, child_context.clone(), options, callback)
                            .await?;
                }
            }
        } else {
            for entry in &node.matchers {
                let triggered =
                    matched_names.contains(&entry.name) || extracted.contains_key(&entry.name);
                if !triggered {
                    debug!(
                        workflow_template = node.template.id.as_str(),
                        matcher = entry.name.as_str(),
                        "workflow branch not triggered"
                    );
                    continue;
                }
                for child in &entry.subtemplates {
                    any_child |=
                        execute_node(child, target, child_context.clone(), options, callback)
                            .await?;
                }
            }
        }

        Ok(matched || any_child)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_node_deserialization() {
        let yaml = r#"
template: detect.yaml
matchers:
  - name: wordpress
    subtemplates:
      - template: wp-exploit.yaml
subtemplates: []
"#;
        let node: WorkflowNode = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(node.template, "detect.yaml");
        assert_eq!(node.matchers.len(), 1);
        assert_eq!(node.matchers[0].subtemplates[0].template, "wp-exploit.yaml");
    }
}
