// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Parser
 * YAML/JSON decoding, strict field validation and the process-wide cache
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use moka::sync::Cache;
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::TemplateError;
use crate::protocols::{CompileContext, Protocol, ProtocolRequest};
use crate::types::ScanOptions;
use crate::workflows::{self, CompiledWorkflow};

use super::model::Template;
use super::signer::{TemplateSignature, TrustStore};

const TOP_KEYS: &[&str] = &[
    "id",
    "info",
    "http",
    "dns",
    "network",
    "file",
    "headless",
    "code",
    "workflows",
    "stop-at-first-match",
    "variables",
];
const INFO_KEYS: &[&str] = &[
    "name",
    "author",
    "authors",
    "severity",
    "description",
    "tags",
    "reference",
    "references",
    "metadata",
    "remediation",
    "classification",
];
const OPERATOR_KEYS: &[&str] = &["matchers", "matchers-condition", "extractors"];
const HTTP_KEYS: &[&str] = &[
    "method",
    "path",
    "raw",
    "headers",
    "body",
    "payloads",
    "attack",
    "redirects",
    "max-redirects",
    "threads",
    "stop-at-first-match",
    "race",
    "race_count",
    "pipeline",
    "unsafe",
    "max-size",
];
const DNS_KEYS: &[&str] = &["name", "type", "recursion", "resolvers"];
const NETWORK_KEYS: &[&str] = &["host", "inputs", "read-size"];
const NETWORK_INPUT_KEYS: &[&str] = &["data", "type", "read", "read-to", "name"];
const FILE_KEYS: &[&str] = &["extensions", "denylist", "max-size"];
const HEADLESS_KEYS: &[&str] = &["steps"];
const HEADLESS_STEP_KEYS: &[&str] = &["action", "args", "name"];
const CODE_KEYS: &[&str] = &["engine", "source", "file"];
const MATCHER_KEYS: &[&str] = &[
    "type",
    "name",
    "part",
    "condition",
    "negative",
    "case-insensitive",
    "status",
    "size",
    "words",
    "regex",
    "binary",
    "dsl",
];
const EXTRACTOR_KEYS: &[&str] = &[
    "type",
    "name",
    "part",
    "internal",
    "case-insensitive",
    "regex",
    "group",
    "kval",
    "xpath",
    "attribute",
    "json",
    "dsl",
];
const WORKFLOW_KEYS: &[&str] = &["template", "matchers", "subtemplates"];
const WORKFLOW_MATCHER_KEYS: &[&str] = &["name", "subtemplates"];

/// Parses templates and caches the compiled result by absolute path.
/// Inserts are write-once; later loads return the cached value.
pub struct TemplateLoader {
    options: Arc<ScanOptions>,
    trust: Arc<TrustStore>,
    cache: Cache<PathBuf, Arc<Template>>,
}

impl TemplateLoader {
    pub fn new(options: Arc<ScanOptions>, trust: Arc<TrustStore>) -> Self {
        Self {
            options,
            trust,
            cache: Cache::builder().max_capacity(16_384).build(),
        }
    }

    pub fn options(&self) -> &Arc<ScanOptions> {
        &self.options
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Template>, TemplateError> {
        let mut visited = HashSet::new();
        self.load_with_visited(path, &mut visited)
    }

    /// Load a template, tracking the workflow compilation chain through
    /// `visited` for cycle detection.
    pub fn load_with_visited(
        &self,
        path: &Path,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<Arc<Template>, TemplateError> {
        let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(cached) = self.cache.get(&absolute) {
            return Ok(cached);
        }

        let content = std::fs::read_to_string(&absolute)?;
        let value = decode(&absolute, &content)?;
        if !self.options.relaxed_parsing {
            check_unknown_fields(&value, &absolute)?;
        }

        let mut template: Template =
            serde_yaml::from_value(value).map_err(|e| TemplateError::Parse {
                path: absolute.clone(),
                reason: e.to_string(),
            })?;
        template.path = absolute.clone();
        template.validate()?;

        if template.info.severity.is_none() && template.workflows.is_empty() {
            warn!(
                template = template.id.as_str(),
                "template has no severity, defaulting to unknown"
            );
        }

        match TemplateSignature::parse(&content) {
            Ok(signature) => template.signature = signature,
            Err(e) => warn!(template = template.id.as_str(), "bad signature line: {}", e),
        }
        if template.signature.is_some() || !template.code.is_empty() {
            match self.trust.verify(&content) {
                Ok(()) => template.verified = true,
                Err(e) => {
                    template.verified = false;
                    if !template.code.is_empty() {
                        warn!(
                            template = template.id.as_str(),
                            "code template signature check failed: {}", e
                        );
                    }
                }
            }
        }

        self.compile(&mut template, visited)?;

        let template = Arc::new(template);
        self.cache.insert(absolute, Arc::clone(&template));
        Ok(template)
    }

    fn compile(
        &self,
        template: &mut Template,
        visited: &mut HashSet<PathBuf>,
    ) -> Result<(), TemplateError> {
        let template_dir = template
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let ctx = CompileContext {
            template_id: template.id.clone(),
            template_dir: template_dir.clone(),
            options: Arc::clone(&self.options),
        };

        let verified = template.verified;
        let mut requests = Vec::new();
        requests.extend(template.http.drain(..).map(Protocol::Http));
        requests.extend(template.dns.drain(..).map(Protocol::Dns));
        requests.extend(template.network.drain(..).map(Protocol::Network));
        requests.extend(template.file.drain(..).map(Protocol::File));
        requests.extend(template.headless.drain(..).map(Protocol::Headless));
        requests.extend(template.code.drain(..).map(|mut code| {
            code.set_verified(verified);
            Protocol::Code(code)
        }));
        for request in &mut requests {
            request.compile(&ctx)?;
        }
        template.requests = requests;

        if !template.workflows.is_empty() {
            visited.insert(template.path.clone());
            let nodes = workflows::compile(&template.workflows, &template_dir, self, visited)?;
            visited.remove(&template.path);
            template.compiled_workflow = Some(CompiledWorkflow {
                nodes,
                stop_at_first_match: template.stop_at_first_match,
            });
        }

        debug!(
            template = template.id.as_str(),
            requests = template.requests_total(),
            "compiled template"
        );
        Ok(())
    }
}

/// Decode by extension: `.yaml`/`.yml` strict YAML, `.json` JSON.
fn decode(path: &Path, content: &str) -> Result<YamlValue, TemplateError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| TemplateError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        "json" => {
            let json: serde_json::Value =
                serde_json::from_str(content).map_err(|e| TemplateError::Parse {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            serde_yaml::to_value(&json).map_err(|e| TemplateError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        _ => Err(TemplateError::UnknownFormat(path.to_path_buf())),
    }
}

fn ensure_known(mapping: &Mapping, allowed: &[&str], context: &str) -> Result<(), TemplateError> {
    for key in mapping.keys() {
        let Some(name) = key.as_str() else {
            continue;
        };
        if !allowed.contains(&name) {
            return Err(TemplateError::UnknownField {
                field: name.to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

fn as_mapping(value: &YamlValue) -> Option<&Mapping> {
    value.as_mapping()
}

fn check_operator_lists(block: &Mapping, context: &str) -> Result<(), TemplateError> {
    if let Some(matchers) = block.get("matchers").and_then(YamlValue::as_sequence) {
        for matcher in matchers {
            if let Some(mapping) = as_mapping(matcher) {
                ensure_known(mapping, MATCHER_KEYS, &format!("{}.matchers", context))?;
            }
        }
    }
    if let Some(extractors) = block.get("extractors").and_then(YamlValue::as_sequence) {
        for extractor in extractors {
            if let Some(mapping) = as_mapping(extractor) {
                ensure_known(mapping, EXTRACTOR_KEYS, &format!("{}.extractors", context))?;
            }
        }
    }
    Ok(())
}

fn check_request_blocks(
    root: &Mapping,
    key: &str,
    block_keys: &[&str],
) -> Result<(), TemplateError> {
    let Some(blocks) = root.get(key).and_then(YamlValue::as_sequence) else {
        return Ok(());
    };
    let allowed: Vec<&str> = block_keys.iter().chain(OPERATOR_KEYS).copied().collect();
    for block in blocks {
        let Some(mapping) = as_mapping(block) else {
            continue;
        };
        ensure_known(mapping, &allowed, key)?;
        check_operator_lists(mapping, key)?;

        if key == "network" {
            if let Some(inputs) = mapping.get("inputs").and_then(YamlValue::as_sequence) {
                for input in inputs {
                    if let Some(mapping) = as_mapping(input) {
                        ensure_known(mapping, NETWORK_INPUT_KEYS, "network.inputs")?;
                    }
                }
            }
        }
        if key == "headless" {
            if let Some(steps) = mapping.get("steps").and_then(YamlValue::as_sequence) {
                for step in steps {
                    if let Some(mapping) = as_mapping(step) {
                        ensure_known(mapping, HEADLESS_STEP_KEYS, "headless.steps")?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_workflow_nodes(nodes: &YamlValue) -> Result<(), TemplateError> {
    let Some(nodes) = nodes.as_sequence() else {
        return Ok(());
    };
    for node in nodes {
        let Some(mapping) = as_mapping(node) else {
            continue;
        };
        ensure_known(mapping, WORKFLOW_KEYS, "workflows")?;
        if let Some(matchers) = mapping.get("matchers").and_then(YamlValue::as_sequence) {
            for matcher in matchers {
                if let Some(mapping) = as_mapping(matcher) {
                    ensure_known(mapping, WORKFLOW_MATCHER_KEYS, "workflows.matchers")?;
                    if let Some(subtemplates) = mapping.get("subtemplates") {
                        check_workflow_nodes(subtemplates)?;
                    }
                }
            }
        }
        if let Some(subtemplates) = mapping.get("subtemplates") {
            check_workflow_nodes(subtemplates)?;
        }
    }
    Ok(())
}

/// Strict mode: reject any field outside the documented model so typos in
/// templates fail loudly instead of being silently ignored.
fn check_unknown_fields(value: &YamlValue, path: &Path) -> Result<(), TemplateError> {
    let Some(root) = as_mapping(value) else {
        return Err(TemplateError::Parse {
            path: path.to_path_buf(),
            reason: "template root is not a mapping".into(),
        });
    };
    ensure_known(root, TOP_KEYS, "template")?;

    if let Some(info) = root.get("info").and_then(as_mapping) {
        ensure_known(info, INFO_KEYS, "info")?;
    }
    check_request_blocks(root, "http", HTTP_KEYS)?;
    check_request_blocks(root, "dns", DNS_KEYS)?;
    check_request_blocks(root, "network", NETWORK_KEYS)?;
    check_request_blocks(root, "file", FILE_KEYS)?;
    check_request_blocks(root, "headless", HEADLESS_KEYS)?;
    check_request_blocks(root, "code", CODE_KEYS)?;
    if let Some(workflows) = root.get("workflows") {
        check_workflow_nodes(workflows)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(relaxed: bool) -> TemplateLoader {
        TemplateLoader::new(
            Arc::new(ScanOptions {
                relaxed_parsing: relaxed,
                ..Default::default()
            }),
            Arc::new(TrustStore::new()),
        )
    }

    fn write_template(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const SIMPLE: &str = r#"
id: simple-probe
info:
  name: Simple Probe
  author: tester
  severity: medium
http:
  - method: GET
    path: ["{{BaseURL}}/admin"]
    matchers:
      - type: status
        status: [200]
"#;

    #[test]
    fn test_load_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), "simple.yaml", SIMPLE);

        let loader = loader(false);
        let first = loader.load(&path).unwrap();
        assert_eq!(first.id, "simple-probe");
        assert_eq!(first.requests.len(), 1);
        assert_eq!(first.requests_total(), 1);

        // second load must come from the cache (same allocation)
        let second = loader.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_json_templates() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
  "id": "json-probe",
  "info": {"name": "Json Probe", "author": ["tester"], "severity": "low"},
  "http": [{"method": "GET", "path": ["{{BaseURL}}/x"], "matchers": [{"type": "status", "status": [200]}]}]
}"#;
        let path = write_template(dir.path(), "probe.json", json);
        let template = loader(false).load(&path).unwrap();
        assert_eq!(template.id, "json-probe");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(dir.path(), "probe.txt", SIMPLE);
        assert!(matches!(
            loader(false).load(&path).unwrap_err(),
            TemplateError::UnknownFormat(_)
        ));
    }

    #[test]
    fn test_strict_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let content = SIMPLE.replace("severity: medium", "severity: medium\n  sevrity: oops");
        let path = write_template(dir.path(), "typo.yaml", &content);

        let err = loader(false).load(&path).unwrap_err();
        match err {
            TemplateError::UnknownField { field, .. } => assert_eq!(field, "sevrity"),
            other => panic!("expected unknown field, got {}", other),
        }

        // relaxed mode admits the typo
        assert!(loader(true).load(&path).is_ok());
    }

    #[test]
    fn test_validation_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(
            dir.path(),
            "bad.yaml",
            "id: bad--id\ninfo:\n  name: X\n  author: a\nhttp:\n  - path: ['{{BaseURL}}']\n",
        );
        assert!(matches!(
            loader(false).load(&path).unwrap_err(),
            TemplateError::InvalidField { field: "id", .. }
        ));
    }

    #[test]
    fn test_workflow_compilation_and_cycles() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "child.yaml", SIMPLE);
        let flow = write_template(
            dir.path(),
            "flow.yaml",
            r#"
id: flow
info:
  name: Flow
  author: tester
workflows:
  - template: child.yaml
"#,
        );
        let template = loader(false).load(&flow).unwrap();
        let workflow = template.compiled_workflow.as_ref().unwrap();
        assert_eq!(workflow.nodes.len(), 1);
        assert_eq!(workflow.nodes[0].template.id, "simple-probe");

        // self-referential workflow is a cycle
        let cyclic = write_template(
            dir.path(),
            "cycle.yaml",
            r#"
id: cycle
info:
  name: Cycle
  author: tester
workflows:
  - template: cycle.yaml
"#,
        );
        assert!(matches!(
            loader(false).load(&cyclic).unwrap_err(),
            TemplateError::Cycle(_)
        ));
    }

    #[test]
    fn test_regex_compile_error_fails_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_template(
            dir.path(),
            "badre.yaml",
            r#"
id: badre
info:
  name: Bad Regex
  author: tester
http:
  - method: GET
    path: ["{{BaseURL}}/x"]
    matchers:
      - type: regex
        regex: ["(unclosed"]
"#,
        );
        assert!(matches!(
            loader(false).load(&path).unwrap_err(),
            TemplateError::Regex { .. }
        ));
    }
}
