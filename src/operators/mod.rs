// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Operator Pipeline
 * Matcher/extractor evaluation over protocol events
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod extractors;
pub mod matchers;

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::dsl::{DynamicValues, Value};
use crate::errors::TemplateError;
pub use extractors::{Extractor, ExtractorType};
pub use matchers::{Condition, Matcher, MatcherType};

/// The canonical string->value event a protocol adapter projects its
/// response into.
pub type InternalEvent = DynamicValues;

/// Result of running the operator pipeline over one event.
#[derive(Debug, Clone, Default)]
pub struct OperatorsResult {
    pub matched: bool,
    /// Matcher name -> values that matched, for named matchers and
    /// workflow triggers.
    pub matches: BTreeMap<String, Vec<String>>,
    /// Named public extractor output.
    pub extracts: BTreeMap<String, Vec<String>>,
    /// Flattened public extractor output, reported on the result event.
    pub extracted_results: Vec<String>,
    /// Internal extractor output, fed into the workflow context only.
    pub dynamic_values: DynamicValues,
}

impl OperatorsResult {
    /// The pipeline outcome is positive when matchers matched and, if
    /// extractors are present, at least one of them yielded a value.
    pub fn is_positive(&self, has_extractors: bool) -> bool {
        if !self.matched {
            return false;
        }
        if !has_extractors {
            return true;
        }
        !self.extracted_results.is_empty() || !self.dynamic_values.is_empty()
    }

    pub fn matched_names(&self) -> Vec<String> {
        self.matches.keys().cloned().collect()
    }
}

/// The matcher/extractor block shared by every protocol request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operators {
    #[serde(default)]
    pub matchers: Vec<Matcher>,
    #[serde(rename = "matchers-condition", default)]
    pub matchers_condition: Condition,
    #[serde(default)]
    pub extractors: Vec<Extractor>,
}

impl Operators {
    pub fn compile(&mut self) -> Result<(), TemplateError> {
        for matcher in &mut self.matchers {
            matcher.compile()?;
        }
        for extractor in &mut self.extractors {
            extractor.compile()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty() && self.extractors.is_empty()
    }

    pub fn has_extractors(&self) -> bool {
        !self.extractors.is_empty()
    }

    /// Evaluate all matchers then all extractors against the event.
    /// `default_part` names the event key matched when a clause does not
    /// pick one (body for http, data for network and so on).
    pub fn execute(&self, event: &InternalEvent, default_part: &str) -> OperatorsResult {
        let mut result = OperatorsResult::default();

        // templates without matchers match implicitly so that pure
        // extraction templates still produce events
        let mut matched = self.matchers.is_empty();
        let mut and_failed = false;

        for matcher in &self.matchers {
            let part = matcher.part.as_deref().unwrap_or(default_part);
            let corpus = event_part(event, part, default_part);

            let (ok, matched_values) = match matcher.kind {
                MatcherType::Status => {
                    let status = event
                        .get("status_code")
                        .and_then(Value::as_int)
                        .unwrap_or_default();
                    (matcher.match_status(status as u16), Vec::new())
                }
                MatcherType::Size => (matcher.match_size(corpus.len()), Vec::new()),
                MatcherType::Word => matcher.match_words(&corpus, event),
                MatcherType::Regex => matcher.match_regex(&corpus),
                MatcherType::Binary => {
                    let bytes = event_part_bytes(event, part, default_part);
                    matcher.match_binary(&bytes)
                }
                MatcherType::Dsl => (matcher.match_dsl(event), Vec::new()),
            };
            let ok = ok != matcher.negative;

            match self.matchers_condition {
                Condition::And => {
                    if !ok {
                        and_failed = true;
                        break;
                    }
                    matched = true;
                    result.matches.insert(matcher.display_name(), matched_values);
                }
                Condition::Or => {
                    if ok {
                        matched = true;
                        result.matches.insert(matcher.display_name(), matched_values);
                    }
                }
            }
        }

        if and_failed {
            matched = false;
            result.matches.clear();
        }
        result.matched = matched;

        for extractor in &self.extractors {
            let part = extractor.part.as_deref().unwrap_or(default_part);
            let corpus = event_part(event, part, default_part);
            let values = extractor.extract(&corpus, event);
            if values.is_empty() {
                continue;
            }
            if extractor.internal {
                if let Some(name) = &extractor.name {
                    let value = if values.len() == 1 {
                        Value::String(values[0].clone())
                    } else {
                        Value::List(values.iter().cloned().map(Value::String).collect())
                    };
                    result.dynamic_values.insert(name.clone(), value);
                }
            } else {
                if let Some(name) = &extractor.name {
                    result
                        .extracts
                        .entry(name.clone())
                        .or_default()
                        .extend(values.clone());
                }
                result.extracted_results.extend(values);
            }
        }

        result
    }
}

/// Select the string corpus for a part name. `all` concatenates body and
/// headers so cross-part matchers keep working.
pub fn event_part(event: &InternalEvent, part: &str, default_part: &str) -> String {
    let part = if part.is_empty() { default_part } else { part };
    match part {
        "all" => {
            let body = event.get("body").map(Value::to_string).unwrap_or_default();
            let headers = event
                .get("all_headers")
                .map(Value::to_string)
                .unwrap_or_default();
            format!("{}\n{}", headers, body)
        }
        "header" => event
            .get("all_headers")
            .map(Value::to_string)
            .unwrap_or_default(),
        name => event.get(name).map(Value::to_string).unwrap_or_default(),
    }
}

fn event_part_bytes(event: &InternalEvent, part: &str, default_part: &str) -> Vec<u8> {
    let part = if part.is_empty() { default_part } else { part };
    match event.get(part) {
        Some(Value::Bytes(bytes)) => bytes.clone(),
        _ => event_part(event, part, default_part).into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(pairs: &[(&str, Value)]) -> InternalEvent {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn status_matcher(codes: Vec<u16>) -> Matcher {
        let mut m = Matcher {
            kind: MatcherType::Status,
            status: codes,
            ..Default::default()
        };
        m.compile().unwrap();
        m
    }

    fn word_matcher(words: Vec<&str>) -> Matcher {
        let mut m = Matcher {
            kind: MatcherType::Word,
            words: words.into_iter().map(String::from).collect(),
            ..Default::default()
        };
        m.compile().unwrap();
        m
    }

    #[test]
    fn test_and_condition_requires_all() {
        let ops = Operators {
            matchers: vec![status_matcher(vec![200]), word_matcher(vec!["ok"])],
            matchers_condition: Condition::And,
            extractors: Vec::new(),
        };

        let e = event(&[
            ("status_code", Value::Int(200)),
            ("body", Value::from("not it")),
        ]);
        let result = ops.execute(&e, "body");
        assert!(!result.matched);

        let e = event(&[
            ("status_code", Value::Int(200)),
            ("body", Value::from("all ok")),
        ]);
        let result = ops.execute(&e, "body");
        assert!(result.matched);
        assert!(result.is_positive(ops.has_extractors()));
    }

    #[test]
    fn test_or_condition_any_match() {
        let ops = Operators {
            matchers: vec![status_matcher(vec![500]), word_matcher(vec!["welcome"])],
            matchers_condition: Condition::Or,
            extractors: Vec::new(),
        };
        let e = event(&[
            ("status_code", Value::Int(200)),
            ("body", Value::from("welcome home")),
        ]);
        let result = ops.execute(&e, "body");
        assert!(result.matched);
        assert_eq!(result.matched_names(), vec!["word"]);
    }

    #[test]
    fn test_negative_matcher_flips() {
        let mut m = word_matcher(vec!["error"]);
        m.negative = true;
        let ops = Operators {
            matchers: vec![m],
            ..Default::default()
        };
        let e = event(&[("body", Value::from("clean page"))]);
        assert!(ops.execute(&e, "body").matched);

        let e = event(&[("body", Value::from("error: boom"))]);
        assert!(!ops.execute(&e, "body").matched);
    }

    #[test]
    fn test_internal_extractor_feeds_dynamic_values() {
        let mut extractor = Extractor {
            kind: ExtractorType::Regex,
            name: Some("token".into()),
            regex: vec![r"tok=([a-z]+)".into()],
            group: 1,
            internal: true,
            ..Default::default()
        };
        extractor.compile().unwrap();

        let ops = Operators {
            matchers: Vec::new(),
            matchers_condition: Condition::Or,
            extractors: vec![extractor],
        };
        let e = event(&[("body", Value::from("tok=xyz"))]);
        let result = ops.execute(&e, "body");
        assert!(result.matched);
        assert!(result.extracted_results.is_empty());
        assert_eq!(result.dynamic_values["token"], Value::from("xyz"));
        assert!(result.is_positive(ops.has_extractors()));
    }

    #[test]
    fn test_extractors_gate_positivity() {
        let mut extractor = Extractor {
            kind: ExtractorType::Regex,
            regex: vec![r"never-present-[0-9]+".into()],
            ..Default::default()
        };
        extractor.compile().unwrap();

        let ops = Operators {
            matchers: vec![status_matcher(vec![200])],
            matchers_condition: Condition::Or,
            extractors: vec![extractor],
        };
        let e = event(&[
            ("status_code", Value::Int(200)),
            ("body", Value::from("nothing here")),
        ]);
        let result = ops.execute(&e, "body");
        assert!(result.matched);
        assert!(!result.is_positive(ops.has_extractors()));
    }

    #[test]
    fn test_part_selection() {
        let e = event(&[
            ("body", Value::from("the body")),
            ("all_headers", Value::from("Server: nginx")),
        ]);
        assert_eq!(event_part(&e, "header", "body"), "Server: nginx");
        assert!(event_part(&e, "all", "body").contains("the body"));
        assert!(event_part(&e, "all", "body").contains("nginx"));
    }
}
