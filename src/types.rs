// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Core Scan Types
 * Severity levels, protocol kinds and scan-wide options
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unknown,
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Unknown => "unknown",
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            "unknown" => Ok(Severity::Unknown),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// The protocol a request block (or a whole template) executes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Http,
    Dns,
    Network,
    File,
    Headless,
    Code,
    Workflow,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolKind::Http => "http",
            ProtocolKind::Dns => "dns",
            ProtocolKind::Network => "network",
            ProtocolKind::File => "file",
            ProtocolKind::Headless => "headless",
            ProtocolKind::Code => "code",
            ProtocolKind::Workflow => "workflow",
        };
        f.write_str(name)
    }
}

/// Iteration order over the (templates x targets) product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanStrategy {
    #[default]
    Auto,
    TemplateSpray,
    HostSpray,
}

impl FromStr for ScanStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(ScanStrategy::Auto),
            "template-spray" => Ok(ScanStrategy::TemplateSpray),
            "host-spray" => Ok(ScanStrategy::HostSpray),
            other => Err(format!("unknown scan strategy '{}'", other)),
        }
    }
}

/// Scan-wide options assembled by the CLI and handed to the engine root.
/// There are no process-wide singletons: everything the engine needs hangs
/// off this struct or the executor options built from it.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Number of targets processed in parallel per template.
    pub bulk_size: usize,
    /// Number of templates fanned out in parallel.
    pub template_threads: usize,
    /// Parallel width for headless templates, which are much heavier.
    pub headless_bulk_size: usize,
    /// Per-request timeout in seconds.
    pub timeout: u64,
    /// Retries delegated to the protocol adapters.
    pub retries: u32,
    /// Global requests per second, 0 disables rate limiting.
    pub rate_limit: u32,
    /// Optional per-host requests per second.
    pub per_host_rate_limit: u32,
    /// Errors within the window after which a host is skipped.
    pub max_host_errors: u32,
    /// Window for the host error budget, seconds.
    pub host_error_window: u64,
    pub proxy: Option<String>,
    /// Extra headers applied to every HTTP request.
    pub custom_headers: Vec<(String, String)>,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Response body cap in bytes.
    pub max_body_size: usize,
    pub scan_strategy: ScanStrategy,
    /// Relaxed template parsing admits unknown fields.
    pub relaxed_parsing: bool,
    /// Code protocol disabled unless explicitly enabled.
    pub enable_code: bool,
    /// Headless protocol disabled unless explicitly enabled.
    pub enable_headless: bool,
    /// Execute unsigned code templates anyway (still flagged unsigned).
    pub allow_unsigned_code: bool,
    /// Extra variables merged into every template context.
    pub vars: HashMap<String, String>,
    pub resume_path: Option<PathBuf>,
    pub project: bool,
    pub project_path: Option<PathBuf>,
    /// Attach request/response dumps to result events.
    pub store_responses: bool,
    /// Custom DNS resolvers, `host[:port]`.
    pub resolvers: Vec<String>,
    /// Interaction server URL for out-of-band templates.
    pub interactsh_url: Option<String>,
    /// Seconds to keep polling for trailing interactions on shutdown.
    pub interactions_cooldown: u64,
    /// Seconds before a pending interaction entry is evicted.
    pub interactions_eviction: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            bulk_size: 25,
            template_threads: 25,
            headless_bulk_size: 10,
            timeout: 10,
            retries: 1,
            rate_limit: 150,
            per_host_rate_limit: 0,
            max_host_errors: 30,
            host_error_window: 300,
            proxy: None,
            custom_headers: Vec::new(),
            follow_redirects: false,
            max_redirects: 10,
            max_body_size: 10 * 1024 * 1024,
            scan_strategy: ScanStrategy::Auto,
            relaxed_parsing: false,
            enable_code: false,
            enable_headless: false,
            allow_unsigned_code: false,
            vars: HashMap::new(),
            resume_path: None,
            project: false,
            project_path: None,
            store_responses: false,
            resolvers: Vec::new(),
            interactsh_url: None,
            interactions_cooldown: 5,
            interactions_eviction: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        assert!(Severity::Info > Severity::Unknown);
    }

    #[test]
    fn test_severity_roundtrip() {
        for s in ["info", "low", "medium", "high", "critical", "unknown"] {
            let parsed: Severity = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("sev".parse::<Severity>().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "template-spray".parse::<ScanStrategy>().unwrap(),
            ScanStrategy::TemplateSpray
        );
        assert_eq!("".parse::<ScanStrategy>().unwrap(), ScanStrategy::Auto);
    }
}
