// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Data Model
 * The typed in-memory form of a declarative probe
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::errors::TemplateError;
use crate::protocols::{
    code::CodeRequest, dns::DnsRequest, file::FileRequest, headless::HeadlessRequest,
    http::HttpRequest, network::NetworkRequest, Protocol, ProtocolRequest,
};
use crate::types::{ProtocolKind, Severity};
use crate::workflows::{CompiledWorkflow, WorkflowNode};

use super::signer::TemplateSignature;

static TEMPLATE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]+[-_])*[A-Za-z0-9]+$").unwrap());

/// Template metadata. Authors and tags accept both a comma separated
/// string and a list, the way published catalogs write them.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Info {
    pub name: String,
    #[serde(alias = "authors", deserialize_with = "string_or_list")]
    pub author: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(
        alias = "references",
        deserialize_with = "string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub reference: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_yaml::Value>,
}

/// A uniquely identified probe: request blocks keyed by protocol, or a
/// workflow block, never both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Template {
    pub id: String,
    pub info: Info,
    pub http: Vec<HttpRequest>,
    pub dns: Vec<DnsRequest>,
    pub network: Vec<NetworkRequest>,
    pub file: Vec<FileRequest>,
    pub headless: Vec<HeadlessRequest>,
    pub code: Vec<CodeRequest>,
    pub workflows: Vec<WorkflowNode>,
    /// Short-circuits a workflow once any node matches.
    #[serde(rename = "stop-at-first-match")]
    pub stop_at_first_match: bool,
    pub variables: BTreeMap<String, String>,

    #[serde(skip)]
    pub path: PathBuf,
    #[serde(skip)]
    pub signature: Option<TemplateSignature>,
    /// Whether the signature verified against the trust store.
    #[serde(skip)]
    pub verified: bool,
    /// Compiled request blocks in declaration order; populated by the
    /// loader, after which the per-protocol vectors are drained.
    #[serde(skip)]
    pub requests: Vec<Protocol>,
    #[serde(skip)]
    pub compiled_workflow: Option<CompiledWorkflow>,
}

impl Template {
    pub fn is_workflow(&self) -> bool {
        !self.workflows.is_empty() || self.compiled_workflow.is_some()
    }

    pub fn has_code(&self) -> bool {
        self.code.iter().count() > 0
            || self
                .requests
                .iter()
                .any(|r| r.protocol() == ProtocolKind::Code)
    }

    pub fn kind(&self) -> ProtocolKind {
        if self.is_workflow() {
            return ProtocolKind::Workflow;
        }
        self.requests
            .first()
            .map(|r| r.protocol())
            .unwrap_or(ProtocolKind::Http)
    }

    /// Total requests per target across every block.
    pub fn requests_total(&self) -> usize {
        self.requests.iter().map(|r| r.requests()).sum()
    }

    /// Mandatory field validation, reported with the canonical messages.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.id.trim().is_empty() {
            return Err(TemplateError::MandatoryFieldMissing("id"));
        }
        if !TEMPLATE_ID_RE.is_match(&self.id) {
            return Err(TemplateError::InvalidField {
                field: "id",
                reason: format!("'{}' does not match the id format", self.id),
            });
        }
        if self.info.name.trim().is_empty() {
            return Err(TemplateError::MandatoryFieldMissing("name"));
        }
        if self.info.author.iter().all(|a| a.trim().is_empty()) {
            return Err(TemplateError::MandatoryFieldMissing("author"));
        }

        let block_count = self.http.len()
            + self.dns.len()
            + self.network.len()
            + self.file.len()
            + self.headless.len()
            + self.code.len();
        let has_blocks = block_count > 0 || !self.requests.is_empty();
        match (has_blocks, !self.workflows.is_empty()) {
            (true, true) => Err(TemplateError::InvalidField {
                field: "workflows",
                reason: "a template carries request blocks or a workflow, not both".into(),
            }),
            (false, false) => Err(TemplateError::InvalidField {
                field: "requests",
                reason: "template defines no request blocks and no workflow".into(),
            }),
            _ => Ok(()),
        }
    }
}

/// Deserialize either `a, b` or `[a, b]` into a list of trimmed strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrList;

    impl<'de> Visitor<'de> for StringOrList {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a list of strings")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            Ok(value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                let trimmed = item.trim().to_string();
                if !trimmed.is_empty() {
                    out.push(trimmed);
                }
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(StringOrList)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(id: &str) -> Template {
        let mut template: Template = serde_yaml::from_str(&format!(
            r#"
id: {}
info:
  name: Test
  author: tester
http:
  - method: GET
    path: ["{{{{BaseURL}}}}/x"]
"#,
            id
        ))
        .unwrap();
        template.path = PathBuf::from("test.yaml");
        template
    }

    #[test]
    fn test_valid_ids() {
        for id in ["simple", "cve-2021-41773", "probe_v2", "A1-b2_c3"] {
            minimal(id).validate().unwrap_or_else(|e| panic!("{}: {}", id, e));
        }
    }

    #[test]
    fn test_invalid_ids() {
        for id in ["-leading", "trailing-", "two--dashes", "spa ce", "dot.id"] {
            assert!(minimal(id).validate().is_err(), "{} accepted", id);
        }
    }

    #[test]
    fn test_author_string_or_list() {
        let info: Info = serde_yaml::from_str("name: X\nauthor: a, b").unwrap();
        assert_eq!(info.author, vec!["a", "b"]);

        let info: Info = serde_yaml::from_str("name: X\nauthor: [a, b]").unwrap();
        assert_eq!(info.author, vec!["a", "b"]);
    }

    #[test]
    fn test_mandatory_fields() {
        let template: Template = serde_yaml::from_str(
            "id: t\ninfo:\n  name: ''\n  author: a\nhttp:\n  - path: ['{{BaseURL}}']\n",
        )
        .unwrap();
        let err = template.validate().unwrap_err();
        assert_eq!(err.to_string(), "mandatory 'name' field is missing");
    }

    #[test]
    fn test_blocks_and_workflow_are_exclusive() {
        let template: Template = serde_yaml::from_str(
            r#"
id: t
info:
  name: X
  author: a
http:
  - path: ["{{BaseURL}}"]
workflows:
  - template: other.yaml
"#,
        )
        .unwrap();
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_empty_template_rejected() {
        let template: Template =
            serde_yaml::from_str("id: t\ninfo:\n  name: X\n  author: a\n").unwrap();
        assert!(template.validate().is_err());
    }
}
