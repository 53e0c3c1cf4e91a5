// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Response Extractors
 * Regex, kval, xpath, json and dsl value extraction
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::warn;

use crate::dsl::{DynamicValues, Expression, Value};
use crate::errors::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorType {
    Regex,
    Kval,
    Xpath,
    Json,
    Dsl,
}

/// A single extractor clause. `internal` extractors feed the workflow
/// dynamic-value context without appearing in reported results.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Extractor {
    #[serde(rename = "type")]
    pub kind: ExtractorType,
    pub name: Option<String>,
    pub part: Option<String>,
    pub internal: bool,
    #[serde(rename = "case-insensitive")]
    pub case_insensitive: bool,
    pub regex: Vec<String>,
    /// Capture group selected from regex extractions, 0 is the whole match.
    pub group: usize,
    pub kval: Vec<String>,
    pub xpath: Vec<String>,
    /// Attribute extracted from xpath-selected elements; element text when
    /// unset.
    pub attribute: Option<String>,
    pub json: Vec<String>,
    pub dsl: Vec<String>,

    #[serde(skip)]
    pub(crate) compiled_regex: Vec<Regex>,
    #[serde(skip)]
    pub(crate) compiled_dsl: Vec<Expression>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            kind: ExtractorType::Regex,
            name: None,
            part: None,
            internal: false,
            case_insensitive: false,
            regex: Vec::new(),
            group: 0,
            kval: Vec::new(),
            xpath: Vec::new(),
            attribute: None,
            json: Vec::new(),
            dsl: Vec::new(),
            compiled_regex: Vec::new(),
            compiled_dsl: Vec::new(),
        }
    }
}

impl Extractor {
    pub fn compile(&mut self) -> Result<(), TemplateError> {
        for pattern in &self.regex {
            let compiled = Regex::new(pattern).map_err(|e| TemplateError::Regex {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            self.compiled_regex.push(compiled);
        }
        for expression in &self.dsl {
            let compiled =
                Expression::compile(expression).map_err(|reason| TemplateError::Dsl {
                    expression: expression.clone(),
                    reason,
                })?;
            self.compiled_dsl.push(compiled);
        }

        let has_values = match self.kind {
            ExtractorType::Regex => !self.regex.is_empty(),
            ExtractorType::Kval => !self.kval.is_empty(),
            ExtractorType::Xpath => !self.xpath.is_empty(),
            ExtractorType::Json => !self.json.is_empty(),
            ExtractorType::Dsl => !self.dsl.is_empty(),
        };
        if !has_values {
            return Err(TemplateError::InvalidField {
                field: "extractors",
                reason: "extractor carries no values".into(),
            });
        }
        Ok(())
    }

    /// Run the extractor over the selected corpus and event, returning the
    /// extracted strings in document order.
    pub fn extract(&self, corpus: &str, event: &DynamicValues) -> Vec<String> {
        match self.kind {
            ExtractorType::Regex => self.extract_regex(corpus),
            ExtractorType::Kval => self.extract_kval(event),
            ExtractorType::Xpath => self.extract_xpath(corpus),
            ExtractorType::Json => self.extract_json(corpus),
            ExtractorType::Dsl => self.extract_dsl(event),
        }
    }

    fn extract_regex(&self, corpus: &str) -> Vec<String> {
        let mut out = Vec::new();
        for regex in &self.compiled_regex {
            for captures in regex.captures_iter(corpus) {
                if let Some(m) = captures.get(self.group) {
                    out.push(m.as_str().to_string());
                }
            }
        }
        out
    }

    /// Key lookup against the event map: case-insensitive, dashes and
    /// underscores equivalent, which covers both header and cookie keys.
    fn extract_kval(&self, event: &DynamicValues) -> Vec<String> {
        let mut out = Vec::new();
        for key in &self.kval {
            let wanted = normalize_kval_key(key);
            for (event_key, value) in event {
                if normalize_kval_key(event_key) == wanted {
                    out.push(value.to_string());
                }
            }
        }
        out
    }

    fn extract_xpath(&self, corpus: &str) -> Vec<String> {
        let document = Html::parse_document(corpus);
        let mut out = Vec::new();
        for query in &self.xpath {
            let (selector_text, path_attribute) = match xpath_to_css(query) {
                Some(parts) => parts,
                None => {
                    warn!(query = query.as_str(), "unsupported xpath query");
                    continue;
                }
            };
            let selector = match Selector::parse(&selector_text) {
                Ok(selector) => selector,
                Err(_) => {
                    warn!(query = query.as_str(), "xpath query does not translate");
                    continue;
                }
            };
            let attribute = path_attribute.or_else(|| self.attribute.clone());
            for element in document.select(&selector) {
                let value = match &attribute {
                    Some(attr) => element.value().attr(attr).map(str::to_string),
                    None => {
                        let text: String = element.text().collect();
                        let trimmed = text.trim();
                        (!trimmed.is_empty()).then(|| trimmed.to_string())
                    }
                };
                if let Some(value) = value {
                    out.push(value);
                }
            }
        }
        out
    }

    fn extract_json(&self, corpus: &str) -> Vec<String> {
        let parsed: serde_json::Value = match serde_json::from_str(corpus) {
            Ok(parsed) => parsed,
            Err(_) => return Vec::new(),
        };
        let mut out = Vec::new();
        for path in &self.json {
            if let Some(found) = json_path(&parsed, path) {
                match found {
                    serde_json::Value::String(s) => out.push(s.clone()),
                    serde_json::Value::Array(items) => {
                        for item in items {
                            match item {
                                serde_json::Value::String(s) => out.push(s.clone()),
                                other => out.push(other.to_string()),
                            }
                        }
                    }
                    other => out.push(other.to_string()),
                }
            }
        }
        out
    }

    fn extract_dsl(&self, event: &DynamicValues) -> Vec<String> {
        let mut out = Vec::new();
        for expression in &self.compiled_dsl {
            match expression.evaluate(event) {
                Ok(Value::Null) | Ok(Value::Bool(false)) => {}
                Ok(value) => out.push(value.to_string()),
                Err(reason) => {
                    warn!(expression = expression.source(), %reason, "dsl extractor failed");
                }
            }
        }
        out
    }
}

fn normalize_kval_key(key: &str) -> String {
    key.to_lowercase().replace('-', "_")
}

/// Translate the supported xpath subset into a css selector. Handles
/// `//tag`, `//tag[@attr='value']`, descendant chains and a trailing
/// `/@attr` attribute selection.
fn xpath_to_css(query: &str) -> Option<(String, Option<String>)> {
    let mut query = query.trim();
    let mut attribute = None;

    if let Some(idx) = query.rfind("/@") {
        attribute = Some(query[idx + 2..].to_string());
        query = &query[..idx];
    }

    if !query.starts_with('/') {
        return None;
    }

    let mut css = String::new();
    for step in query.split("//").filter(|s| !s.is_empty()) {
        for part in step.split('/').filter(|s| !s.is_empty()) {
            if !css.is_empty() {
                css.push(' ');
            }
            if let Some(open) = part.find('[') {
                let tag = &part[..open];
                let predicate = part[open..].trim_start_matches('[').trim_end_matches(']');
                let predicate = predicate.strip_prefix('@')?;
                let (attr, value) = match predicate.split_once('=') {
                    Some((attr, value)) => {
                        let value = value.trim_matches(|c| c == '\'' || c == '"');
                        (attr, Some(value))
                    }
                    None => (predicate, None),
                };
                match value {
                    Some(value) => css.push_str(&format!("{}[{}=\"{}\"]", tag, attr, value)),
                    None => css.push_str(&format!("{}[{}]", tag, attr)),
                }
            } else {
                css.push_str(part);
            }
        }
    }

    if css.is_empty() {
        return None;
    }
    Some((css, attribute))
}

fn json_path<'a>(root: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = root;
    for segment in path.trim_start_matches('.').split('.') {
        if segment.is_empty() {
            continue;
        }
        // allow list indexing as name[0]
        let (name, index) = match segment.split_once('[') {
            Some((name, rest)) => {
                let index: usize = rest.trim_end_matches(']').parse().ok()?;
                (name, Some(index))
            }
            None => (segment, None),
        };
        if !name.is_empty() {
            current = current.get(name)?;
        }
        if let Some(index) = index {
            current = current.get(index)?;
        }
    }
    Some(current)
}
