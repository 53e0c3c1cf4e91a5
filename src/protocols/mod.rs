// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Protocol Adapters
 * Uniform request contract over http, dns, network, file, headless, code
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod code;
pub mod dns;
pub mod file;
pub mod headless;
pub mod http;
pub mod network;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::cancel::CancelToken;
use crate::core::hosterrors::HostErrorCache;
use crate::core::inputs::MetaInput;
use crate::core::progress::Progress;
use crate::core::ratelimit::ScanRateLimiter;
use crate::dsl::DynamicValues;
use crate::errors::{ScanError, TemplateError};
use crate::interactions::Correlator;
use crate::operators::{InternalEvent, OperatorsResult};
use crate::projectfile::ProjectFile;
use crate::types::{ProtocolKind, ScanOptions};

/// Everything a compiled request needs to know about its template.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub template_id: String,
    pub template_dir: PathBuf,
    pub options: Arc<ScanOptions>,
}

/// Shared executor state threaded through every adapter call. Constructed
/// once per scan by the engine root; no process-wide singletons.
#[derive(Clone)]
pub struct ExecutorOptions {
    pub options: Arc<ScanOptions>,
    pub rate_limiter: Arc<ScanRateLimiter>,
    pub host_errors: Arc<HostErrorCache>,
    pub progress: Arc<Progress>,
    pub project: Option<Arc<ProjectFile>>,
    pub interactions: Option<Arc<Correlator>>,
    pub cancel: CancelToken,
}

/// One protocol response event plus its operator outcome, raised to the
/// engine through the execution callback.
#[derive(Debug, Clone)]
pub struct InternalWrappedEvent {
    pub template_id: String,
    pub event: InternalEvent,
    pub result: OperatorsResult,
    /// Positive means the operators fired and the event should become a
    /// reported result.
    pub positive: bool,
}

/// Callback invoked by adapters for every produced event, matching or not.
pub type EventCallback<'a> = &'a (dyn Fn(InternalWrappedEvent) + Send + Sync);

/// The uniform request contract every protocol adapter implements.
///
/// `dynamic` carries the merged variable context, including values
/// extracted by previous protocol steps of the same template and by parent
/// workflow templates.
#[async_trait]
pub trait ProtocolRequest: Send + Sync {
    fn protocol(&self) -> ProtocolKind;

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError>;

    /// Total requests this block will send per target, used for progress
    /// accounting.
    fn requests(&self) -> usize;

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError>;
}

/// Sum type over the per-protocol request blocks of a template. Branching
/// on the tag happens here, once, at the engine boundary.
#[derive(Debug, Clone)]
pub enum Protocol {
    Http(http::HttpRequest),
    Dns(dns::DnsRequest),
    Network(network::NetworkRequest),
    File(file::FileRequest),
    Headless(headless::HeadlessRequest),
    Code(code::CodeRequest),
}

impl Protocol {
    fn inner(&self) -> &dyn ProtocolRequest {
        match self {
            Protocol::Http(r) => r,
            Protocol::Dns(r) => r,
            Protocol::Network(r) => r,
            Protocol::File(r) => r,
            Protocol::Headless(r) => r,
            Protocol::Code(r) => r,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ProtocolRequest {
        match self {
            Protocol::Http(r) => r,
            Protocol::Dns(r) => r,
            Protocol::Network(r) => r,
            Protocol::File(r) => r,
            Protocol::Headless(r) => r,
            Protocol::Code(r) => r,
        }
    }
}

#[async_trait]
impl ProtocolRequest for Protocol {
    fn protocol(&self) -> ProtocolKind {
        self.inner().protocol()
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        self.inner_mut().compile(ctx)
    }

    fn requests(&self) -> usize {
        self.inner().requests()
    }

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        self.inner().execute(target, dynamic, options, callback).await
    }
}

impl ExecutorOptions {
    /// Minimal executor options for tests and library embedding.
    pub fn from_options(options: Arc<ScanOptions>) -> Self {
        let cancel = CancelToken::new();
        Self {
            rate_limiter: Arc::new(ScanRateLimiter::new(
                options.rate_limit,
                options.per_host_rate_limit,
                cancel.clone(),
            )),
            host_errors: Arc::new(HostErrorCache::new(
                options.max_host_errors,
                std::time::Duration::from_secs(options.host_error_window),
            )),
            progress: Arc::new(Progress::new()),
            project: None,
            interactions: None,
            cancel,
            options,
        }
    }
}
