// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Input Providers
 * Target descriptions and the provider abstraction feeding the engine
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use url::Url;

/// One scan target: a URL, hostname or raw address plus optional transport
/// hints and caller-supplied context values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaInput {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl MetaInput {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    /// Stable identity used by the host error budget and per-target dedup.
    pub fn id(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname(), port),
            None => self.hostname(),
        }
    }

    /// The bare hostname, with any scheme, port and path stripped.
    pub fn hostname(&self) -> String {
        if let Ok(parsed) = Url::parse(&self.input) {
            if let Some(host) = parsed.host_str() {
                return host.to_string();
            }
        }
        let stripped = self
            .input
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.input);
        let stripped = stripped.split('/').next().unwrap_or(stripped);
        stripped
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| stripped.to_string())
    }

    /// The target as an absolute URL, defaulting the scheme for bare
    /// host inputs.
    pub fn url(&self) -> String {
        if self.input.contains("://") {
            return self.input.clone();
        }
        let scheme = self.scheme.as_deref().unwrap_or("http");
        match self.port {
            Some(port) => format!("{}://{}:{}", scheme, self.input, port),
            None => format!("{}://{}", scheme, self.input),
        }
    }
}

/// Abstract source of scan targets. Providers own deduplication; the
/// engine only promises iteration order stability within one scan.
pub trait InputProvider: Send + Sync {
    fn count(&self) -> usize;
    /// Visit every input; returning false stops the iteration early.
    fn scan(&self, callback: &mut dyn FnMut(&MetaInput) -> bool);
}

/// In-memory provider over a deduplicated list of targets.
#[derive(Debug, Default)]
pub struct SimpleInputProvider {
    inputs: Vec<MetaInput>,
}

impl SimpleInputProvider {
    pub fn new(inputs: Vec<MetaInput>) -> Self {
        let mut seen = HashSet::new();
        let inputs = inputs
            .into_iter()
            .filter(|input| seen.insert(input.input.clone()))
            .collect();
        Self { inputs }
    }

    /// Parse a newline separated target list, skipping blanks and
    /// comments.
    pub fn from_lines(content: &str) -> Self {
        let inputs = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(MetaInput::new)
            .collect();
        Self::new(inputs)
    }

    pub fn into_inputs(self) -> Vec<MetaInput> {
        self.inputs
    }

    pub fn push(&mut self, input: MetaInput) {
        if !self.inputs.iter().any(|i| i.input == input.input) {
            self.inputs.push(input);
        }
    }
}

impl InputProvider for SimpleInputProvider {
    fn count(&self) -> usize {
        self.inputs.len()
    }

    fn scan(&self, callback: &mut dyn FnMut(&MetaInput) -> bool) {
        for input in &self.inputs {
            if !callback(input) {
                break;
            }
        }
    }
}
