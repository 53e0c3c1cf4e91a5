// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Engine Error Types
 * Typed error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading and compiling a template. Any of these fail
/// the template globally; the engine logs and continues with the rest.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("could not parse template {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("mandatory '{0}' field is missing")]
    MandatoryFieldMissing(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unknown field '{field}' in {context}")]
    UnknownField { field: String, context: String },

    #[error("unsupported template extension for {0}")]
    UnknownFormat(PathBuf),

    #[error("workflow cycle detected at {0}")]
    Cycle(PathBuf),

    #[error("could not compile regex '{pattern}': {reason}")]
    Regex { pattern: String, reason: String },

    #[error("could not compile dsl expression '{expression}': {reason}")]
    Dsl { expression: String, reason: String },

    #[error("payload '{name}': wordlist {path} not found")]
    PayloadFileNotFound { name: String, path: PathBuf },

    #[error("payload '{name}' does not contain enough elements")]
    PayloadEmpty { name: String },

    #[error("pitchfork attack requires equal payload lengths, '{name}' has {got} (expected {expected})")]
    PayloadUnevenLengths {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    /// Compile failures are distinguished from parse/validation failures in
    /// the end-of-scan summary.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            TemplateError::Regex { .. } | TemplateError::Dsl { .. }
        )
    }
}

/// Network failure classification shared by all protocol adapters. Transient
/// variants count against the per-host error budget without aborting the
/// scan.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("connection to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("tls handshake failed for {target}: {reason}")]
    Tls { target: String, reason: String },

    #[error("connection refused by {target}")]
    Refused { target: String },

    #[error("connection reset by {target}")]
    Reset { target: String },

    #[error("invalid target url {url}")]
    InvalidUrl { url: String },

    #[error("network error for {target}: {reason}")]
    Other { target: String, reason: String },
}

impl NetworkError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout { .. } | NetworkError::Reset { .. }
        )
    }

    /// Maps a reqwest error onto the classification, keeping the target for
    /// the host error budget.
    pub fn from_reqwest(target: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout {
                target: target.to_string(),
                timeout: Duration::from_secs(0),
            }
        } else if err.is_connect() {
            NetworkError::Refused {
                target: target.to_string(),
            }
        } else {
            NetworkError::Other {
                target: target.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Signature policy failures for code-bearing templates.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("template carries no signature")]
    Missing,

    #[error("signature does not verify against the template body")]
    Invalid,

    #[error("signature verifies but no registered verifier trusts it")]
    Untrusted,

    #[error("unsupported signature algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("signature key error: {0}")]
    Key(String),
}

/// Budget exhaustion: the engine stops spending effort on a host or the
/// rate limiter was torn down mid-acquisition.
#[derive(Error, Debug)]
pub enum BudgetError {
    #[error("host {host} exceeded the error budget ({errors} errors)")]
    HostErrorsExceeded { host: String, errors: u32 },

    #[error("rate limiter canceled while waiting for a token")]
    RateLimitCanceled,
}

/// Errors surfaced by a single (template, target) execution. None of these
/// abort the scan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("protocol error for {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("operator failure: {0}")]
    Operator(String),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error("unresolved variables in request: {0}")]
    UnresolvedVariables(String),

    #[error("scan canceled")]
    Canceled,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Whether the failure should count against the target host's error
    /// budget. Template-level and policy errors do not.
    pub fn counts_against_host(&self) -> bool {
        matches!(self, ScanError::Network(_) | ScanError::Protocol { .. })
    }

    /// A short stable kind used to aggregate warnings in the summary.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Network(NetworkError::Timeout { .. }) => "network-timeout",
            ScanError::Network(NetworkError::Dns { .. }) => "network-dns",
            ScanError::Network(NetworkError::Tls { .. }) => "network-tls",
            ScanError::Network(NetworkError::Refused { .. }) => "network-refused",
            ScanError::Network(NetworkError::Reset { .. }) => "network-reset",
            ScanError::Network(_) => "network",
            ScanError::Protocol { .. } => "protocol",
            ScanError::Operator(_) => "operator",
            ScanError::Signature(_) => "signature",
            ScanError::Budget(_) => "budget",
            ScanError::UnresolvedVariables(_) => "unresolved-variables",
            ScanError::Canceled => "canceled",
            ScanError::Template(_) => "template",
            ScanError::Io(_) => "io",
        }
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
