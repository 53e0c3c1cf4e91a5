// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Response Matchers
 * Status, size, word, regex, binary and dsl matchers with and/or logic
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::dsl::{self, DynamicValues, Expression};
use crate::errors::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherType {
    Status,
    Size,
    Word,
    Regex,
    Binary,
    Dsl,
}

impl MatcherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherType::Status => "status",
            MatcherType::Size => "size",
            MatcherType::Word => "word",
            MatcherType::Regex => "regex",
            MatcherType::Binary => "binary",
            MatcherType::Dsl => "dsl",
        }
    }
}

/// and/or combinator for values within a matcher and for matchers within a
/// request block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    And,
    #[default]
    Or,
}

/// A single matcher clause from a template request block. Regex, binary
/// and dsl values are precompiled once at template compile time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Matcher {
    #[serde(rename = "type")]
    pub kind: MatcherType,
    pub name: Option<String>,
    pub part: Option<String>,
    pub condition: Condition,
    pub negative: bool,
    #[serde(rename = "case-insensitive")]
    pub case_insensitive: bool,
    pub status: Vec<u16>,
    pub size: Vec<usize>,
    pub words: Vec<String>,
    pub regex: Vec<String>,
    pub binary: Vec<String>,
    pub dsl: Vec<String>,

    #[serde(skip)]
    pub(crate) compiled_regex: Vec<Regex>,
    #[serde(skip)]
    pub(crate) compiled_binary: Vec<Vec<u8>>,
    #[serde(skip)]
    pub(crate) compiled_dsl: Vec<Expression>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            kind: MatcherType::Word,
            name: None,
            part: None,
            condition: Condition::default(),
            negative: false,
            case_insensitive: false,
            status: Vec::new(),
            size: Vec::new(),
            words: Vec::new(),
            regex: Vec::new(),
            binary: Vec::new(),
            dsl: Vec::new(),
            compiled_regex: Vec::new(),
            compiled_binary: Vec::new(),
            compiled_dsl: Vec::new(),
        }
    }
}

impl Matcher {
    /// The name this matcher contributes to matched-names and workflow
    /// triggers: the explicit name when present, the type otherwise.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.kind.as_str().to_string())
    }

    pub fn compile(&mut self) -> Result<(), TemplateError> {
        for pattern in &self.regex {
            let compiled = Regex::new(pattern).map_err(|e| TemplateError::Regex {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            self.compiled_regex.push(compiled);
        }
        for value in &self.binary {
            let decoded = hex::decode(value).map_err(|e| TemplateError::InvalidField {
                field: "binary",
                reason: format!("'{}' is not hex: {}", value, e),
            })?;
            self.compiled_binary.push(decoded);
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
            MatcherType::Status => !self.status.is_empty(),
            MatcherType::Size => !self.size.is_empty(),
            MatcherType::Word => !self.words.is_empty(),
            MatcherType::Regex => !self.regex.is_empty(),
            MatcherType::Binary => !self.binary.is_empty(),
            MatcherType::Dsl => !self.dsl.is_empty(),
        };
        if !has_values {
            return Err(TemplateError::InvalidField {
                field: "matchers",
                reason: format!("{} matcher carries no values", self.kind.as_str()),
            });
        }
        Ok(())
    }

    /// Status comparisons are equality checks; and-conditions are not
    /// meaningful for a single scalar.
    pub fn match_status(&self, status: u16) -> bool {
        self.status.iter().any(|s| *s == status)
    }

    pub fn match_size(&self, length: usize) -> bool {
        self.size.iter().any(|s| *s == length)
    }

    /// Word values may reference dynamic values through `{{...}}` markers,
    /// resolved against the event before comparison.
    pub fn match_words(&self, corpus: &str, dynamic: &DynamicValues) -> (bool, Vec<String>) {
        let corpus = if self.case_insensitive {
            corpus.to_lowercase()
        } else {
            corpus.to_string()
        };

        let mut matched = Vec::new();
        for (i, word) in self.words.iter().enumerate() {
            let word = match dsl::interpolate(word, dynamic) {
                dsl::Interpolated::Done(w) => w,
                dsl::Interpolated::Unresolved(_) => continue,
            };
            let word = if self.case_insensitive {
                word.to_lowercase()
            } else {
                word
            };

            if !corpus.contains(&word) {
                if self.condition == Condition::And {
                    return (false, Vec::new());
                }
                continue;
            }
            if self.condition == Condition::Or {
                return (true, vec![word]);
            }
            matched.push(word);
            if i == self.words.len() - 1 {
                return (true, matched);
            }
        }
        (false, Vec::new())
    }

    pub fn match_regex(&self, corpus: &str) -> (bool, Vec<String>) {
        let mut matched = Vec::new();
        for (i, regex) in self.compiled_regex.iter().enumerate() {
            if !regex.is_match(corpus) {
                if self.condition == Condition::And {
                    return (false, Vec::new());
                }
                continue;
            }
            let current: Vec<String> = regex
                .find_iter(corpus)
                .map(|m| m.as_str().to_string())
                .collect();
            if self.condition == Condition::Or {
                return (true, current);
            }
            matched.extend(current);
            if i == self.compiled_regex.len() - 1 {
                return (true, matched);
            }
        }
        (false, Vec::new())
    }

    pub fn match_binary(&self, corpus: &[u8]) -> (bool, Vec<String>) {
        let mut matched = Vec::new();
        for (i, needle) in self.compiled_binary.iter().enumerate() {
            let found = corpus
                .windows(needle.len().max(1))
                .any(|window| window == needle.as_slice());
            if !found {
                if self.condition == Condition::And {
                    return (false, Vec::new());
                }
                continue;
            }
            if self.condition == Condition::Or {
                return (true, vec![hex::encode(needle)]);
            }
            matched.push(hex::encode(needle));
            if i == self.compiled_binary.len() - 1 {
                return (true, matched);
            }
        }
        (false, Vec::new())
    }

    /// Expression failures are operator errors: logged once and treated as
    /// a non-match so the scan continues.
    pub fn match_dsl(&self, event: &DynamicValues) -> bool {
        for (i, expression) in self.compiled_dsl.iter().enumerate() {
            let result = match expression.evaluate_bool(event) {
                Ok(result) => result,
                Err(reason) => {
                    warn!(expression = expression.source(), %reason, "dsl matcher failed");
                    false
                }
            };
            if !result {
                if self.condition == Condition::And {
                    return false;
                }
                continue;
            }
            if self.condition == Condition::Or {
                return true;
            }
            if i == self.compiled_dsl.len() - 1 {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Value;

    fn compiled(mut m: Matcher) -> Matcher {
        m.compile().unwrap();
        m
    }

    #[test]
    fn test_status_matcher() {
        let m = compiled(Matcher {
            kind: MatcherType::Status,
            status: vec![200, 302],
            ..Default::default()
        });
        assert!(m.match_status(200));
        assert!(m.match_status(302));
        assert!(!m.match_status(404));
    }

    #[test]
    fn test_word_matcher_or_condition() {
        let m = compiled(Matcher {
            kind: MatcherType::Word,
            words: vec!["admin".into(), "panel".into()],
            ..Default::default()
        });
        let (ok, matched) = m.match_words("the panel is here", &DynamicValues::new());
        assert!(ok);
        assert_eq!(matched, vec!["panel"]);
    }

    #[test]
    fn test_word_matcher_and_condition() {
        let m = compiled(Matcher {
            kind: MatcherType::Word,
            condition: Condition::And,
            words: vec!["admin".into(), "panel".into()],
            ..Default::default()
        });
        let (ok, matched) = m.match_words("admin panel", &DynamicValues::new());
        assert!(ok);
        assert_eq!(matched.len(), 2);

        let (ok, _) = m.match_words("admin only", &DynamicValues::new());
        assert!(!ok);
    }

    #[test]
    fn test_word_matcher_case_insensitive() {
        let m = compiled(Matcher {
            kind: MatcherType::Word,
            case_insensitive: true,
            words: vec!["Admin".into()],
            ..Default::default()
        });
        let (ok, _) = m.match_words("ADMIN console", &DynamicValues::new());
        assert!(ok);
    }

    #[test]
    fn test_word_matcher_dynamic_expression() {
        let m = compiled(Matcher {
            kind: MatcherType::Word,
            words: vec!["token={{token}}".into()],
            ..Default::default()
        });
        let mut dynamic = DynamicValues::new();
        dynamic.insert("token".into(), Value::from("xyz"));
        let (ok, _) = m.match_words("found token=xyz in page", &dynamic);
        assert!(ok);
    }

    #[test]
    fn test_regex_matcher_collects_all_matches() {
        let m = compiled(Matcher {
            kind: MatcherType::Regex,
            regex: vec![r"tok=[a-z]+".into()],
            ..Default::default()
        });
        let (ok, matched) = m.match_regex("tok=abc tok=def");
        assert!(ok);
        assert_eq!(matched, vec!["tok=abc", "tok=def"]);
    }

    #[test]
    fn test_binary_matcher() {
        let m = compiled(Matcher {
            kind: MatcherType::Binary,
            binary: vec!["504b0304".into()],
            ..Default::default()
        });
        let (ok, matched) = m.match_binary(&[0x50, 0x4b, 0x03, 0x04, 0x00]);
        assert!(ok);
        assert_eq!(matched, vec!["504b0304"]);

        let (ok, _) = m.match_binary(b"plain text");
        assert!(!ok);
    }

    #[test]
    fn test_binary_matcher_rejects_bad_hex() {
        let mut m = Matcher {
            kind: MatcherType::Binary,
            binary: vec!["zz".into()],
            ..Default::default()
        };
        assert!(m.compile().is_err());
    }

    #[test]
    fn test_dsl_matcher() {
        let m = compiled(Matcher {
            kind: MatcherType::Dsl,
            dsl: vec!["status_code == 200 && len(body) > 3".into()],
            ..Default::default()
        });
        let mut event = DynamicValues::new();
        event.insert("status_code".into(), Value::Int(200));
        event.insert("body".into(), Value::from("hello"));
        assert!(m.match_dsl(&event));

        event.insert("status_code".into(), Value::Int(500));
        assert!(!m.match_dsl(&event));
    }

    #[test]
    fn test_matcher_without_values_rejected() {
        let mut m = Matcher {
            kind: MatcherType::Word,
            ..Default::default()
        };
        assert!(m.compile().is_err());
    }
}
