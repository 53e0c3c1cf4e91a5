// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTTP Protocol Adapter
 * Path and raw request execution with payloads, races and pipelining
 *
 * Modes: normal (pooled client with retries), unsafe (raw bytes over the
 * socket, normalization bypassed), pipeline (requests reuse one
 * connection) and race (N copies released through a gate).
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

pub mod generator;
pub mod race;
pub mod raw;

use async_trait::async_trait;
use flate2::read::{DeflateDecoder, GzDecoder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use url::Url;

use crate::core::inputs::MetaInput;
use crate::dsl::{self, DynamicValues, Value};
use crate::errors::{NetworkError, ScanError, TemplateError};
use crate::generators::{AttackType, PayloadBinding, PayloadGenerator, PayloadSource};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};
use generator::RequestGenerator;
use race::RaceGate;

static BASE_URL_WITH_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{BaseURL}}:(\d+)").unwrap());

const DEFAULT_USER_AGENT: &str = concat!("Seitti/", env!("CARGO_PKG_VERSION"));

/// One operator set evaluated against responses of a request block. A
/// normal template evaluates its own; a clustered execution evaluates one
/// per member template on the shared response.
pub struct OperatorSet<'a> {
    pub template_id: &'a str,
    pub operators: &'a Operators,
    pub stop_at_first_match: bool,
}

/// An `http` request block from a template.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpRequest {
    pub method: String,
    pub path: Vec<String>,
    pub raw: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub payloads: BTreeMap<String, PayloadSource>,
    pub attack: AttackType,
    pub redirects: bool,
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,
    pub threads: i32,
    #[serde(rename = "stop-at-first-match")]
    pub stop_at_first_match: bool,
    pub race: bool,
    pub race_count: usize,
    pub pipeline: bool,
    #[serde(rename = "unsafe")]
    pub unsafe_raw: bool,
    #[serde(rename = "max-size")]
    pub max_size: usize,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
    #[serde(skip)]
    payload_generator: Option<PayloadGenerator>,
    #[serde(skip)]
    client: Option<reqwest::Client>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: Vec::new(),
            raw: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
            payloads: BTreeMap::new(),
            attack: AttackType::default(),
            redirects: false,
            max_redirects: 0,
            threads: 0,
            stop_at_first_match: false,
            race: false,
            race_count: 0,
            pipeline: false,
            unsafe_raw: false,
            max_size: 0,
            operators: Operators::default(),
            template_id: String::new(),
            payload_generator: None,
            client: None,
        }
    }
}

impl HttpRequest {
    fn slots(&self) -> &[String] {
        if !self.path.is_empty() {
            &self.path
        } else {
            &self.raw
        }
    }

    /// Target variables available to every expression of this block.
    fn target_values(&self, parsed: &Url, slot: &str) -> DynamicValues {
        let mut values = DynamicValues::new();
        values.insert(
            "BaseURL".into(),
            Value::String(base_url_with_template_prefs(slot, parsed)),
        );
        let mut origin = parsed.clone();
        origin.set_path("");
        origin.set_query(None);
        origin.set_fragment(None);
        values.insert(
            "RootURL".into(),
            Value::String(origin.as_str().trim_end_matches('/').to_string()),
        );
        let host = parsed.host_str().unwrap_or_default().to_string();
        let hostname = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        values.insert("Hostname".into(), Value::String(hostname));
        values.insert("Host".into(), Value::String(host));
        values.insert("Scheme".into(), Value::String(parsed.scheme().to_string()));
        values.insert(
            "Port".into(),
            Value::Int(i64::from(
                parsed.port_or_known_default().unwrap_or_default(),
            )),
        );
        values.insert("Path".into(), Value::String(parsed.path().to_string()));
        values
    }

    /// Payload values that are themselves `{{...}}` expressions get
    /// evaluated against the merged context before substitution.
    fn evaluated_binding(
        &self,
        binding: PayloadBinding,
        context: &DynamicValues,
    ) -> DynamicValues {
        let mut out = DynamicValues::new();
        for (name, value) in binding {
            if dsl::has_markers(&value) {
                match dsl::interpolate(&value, context) {
                    dsl::Interpolated::Done(rendered) => {
                        out.insert(name, Value::String(rendered));
                        continue;
                    }
                    dsl::Interpolated::Unresolved(_) => {}
                }
            }
            out.insert(name, Value::String(value));
        }
        out
    }

    fn render(
        &self,
        slot: &str,
        base_url: &str,
        values: &DynamicValues,
    ) -> Result<RenderedRequest, ScanError> {
        if slot.contains('\n') {
            let rendered = match dsl::interpolate(slot, values) {
                dsl::Interpolated::Done(rendered) => rendered,
                dsl::Interpolated::Unresolved(missing) => {
                    return Err(ScanError::UnresolvedVariables(missing.join(", ")))
                }
            };
            let parsed = raw::parse(&rendered, base_url, self.unsafe_raw)?;
            return Ok(RenderedRequest {
                method: parsed.method.clone(),
                url: parsed.full_url.clone(),
                headers: parsed.headers.clone(),
                body: parsed.body.clone(),
                unsafe_bytes: parsed.unsafe_bytes,
                from_raw: true,
            });
        }

        let url = match dsl::interpolate(slot, values) {
            dsl::Interpolated::Done(url) => url,
            dsl::Interpolated::Unresolved(missing) => {
                return Err(ScanError::UnresolvedVariables(missing.join(", ")))
            }
        };

        let mut headers = BTreeMap::new();
        for (name, value) in &self.headers {
            let value = match dsl::interpolate(value, values) {
                dsl::Interpolated::Done(value) => value,
                dsl::Interpolated::Unresolved(missing) => {
                    return Err(ScanError::UnresolvedVariables(missing.join(", ")))
                }
            };
            headers.insert(name.clone(), value);
        }
        let body = match &self.body {
            Some(body) => match dsl::interpolate(body, values) {
                dsl::Interpolated::Done(body) => body,
                dsl::Interpolated::Unresolved(missing) => {
                    return Err(ScanError::UnresolvedVariables(missing.join(", ")))
                }
            },
            None => String::new(),
        };

        Ok(RenderedRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
            unsafe_bytes: Vec::new(),
            from_raw: false,
        })
    }

    /// Header defaults applied to model (non-raw) requests only; raw
    /// requests are left untouched.
    fn apply_header_defaults(&self, request: &mut RenderedRequest) {
        let has = |request: &RenderedRequest, name: &str| {
            request.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
        };
        if !has(request, "User-Agent") {
            request
                .headers
                .insert("User-Agent".into(), DEFAULT_USER_AGENT.into());
        }
        if request.from_raw {
            return;
        }
        if self.threads <= 0 && !self.pipeline && !has(request, "Connection") {
            request.headers.insert("Connection".into(), "close".into());
        }
        if !has(request, "Accept") {
            request.headers.insert("Accept".into(), "*/*".into());
        }
        if !has(request, "Accept-Language") {
            request.headers.insert("Accept-Language".into(), "en".into());
        }
    }

    async fn send_standard(
        &self,
        request: &RenderedRequest,
        options: &ExecutorOptions,
    ) -> Result<HttpResponse, ScanError> {
        // project cache consultation happens before anything touches the
        // wire
        let fingerprint = request.fingerprint();
        if let Some(project) = &options.project {
            if let Some(stored) = project.get(&fingerprint) {
                debug!(url = request.url.as_str(), "project cache hit");
                return Ok(HttpResponse {
                    status: stored.status,
                    headers: stored.headers,
                    body: stored.body,
                    final_url: request.url.clone(),
                    duration: Duration::from_millis(stored.duration_ms),
                });
            }
        }

        let client = self.client.as_ref().ok_or_else(|| ScanError::Protocol {
            target: request.url.clone(),
            reason: "request block not compiled".into(),
        })?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ScanError::Protocol {
                target: request.url.clone(),
                reason: format!("invalid method {}", request.method),
            }
        })?;

        let mut attempts = 0u32;
        let max_attempts = options.options.retries.max(1);
        loop {
            attempts += 1;
            let mut builder = client.request(method.clone(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            for (name, value) in &options.options.custom_headers {
                builder = builder.header(name, value);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            let started = Instant::now();
            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let final_url = response.url().to_string();
                    let headers: Vec<(String, String)> = response
                        .headers()
                        .iter()
                        .map(|(name, value)| {
                            (
                                name.as_str().to_string(),
                                value.to_str().unwrap_or_default().to_string(),
                            )
                        })
                        .collect();
                    let max_size = self.effective_max_size(options);
                    let raw_body = response.bytes().await.map_err(|e| {
                        ScanError::Network(NetworkError::from_reqwest(&request.url, &e))
                    })?;
                    let mut body = raw_body.to_vec();
                    body.truncate(max_size);
                    let body = decompress_body(&headers, body);
                    let duration = started.elapsed();

                    let http_response = HttpResponse {
                        status,
                        headers,
                        body,
                        final_url,
                        duration,
                    };
                    if let Some(project) = &options.project {
                        project.store(&fingerprint, &http_response.to_stored());
                    }
                    return Ok(http_response);
                }
                Err(e) => {
                    let classified = NetworkError::from_reqwest(&request.url, &e);
                    if classified.is_retryable() && attempts < max_attempts {
                        debug!(url = request.url.as_str(), attempt = attempts, "retrying request");
                        continue;
                    }
                    return Err(ScanError::Network(classified));
                }
            }
        }
    }

    /// Raw socket send used by unsafe and pipeline modes. `connection`
    /// holds the reused stream for pipelining.
    async fn send_raw(
        &self,
        request: &RenderedRequest,
        options: &ExecutorOptions,
        connection: &mut Option<HttpStream>,
    ) -> Result<HttpResponse, ScanError> {
        let parsed = Url::parse(&request.url).map_err(|_| {
            ScanError::Network(NetworkError::InvalidUrl {
                url: request.url.clone(),
            })
        })?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let port = parsed.port_or_known_default().unwrap_or(80);
        let target = format!("{}:{}", host, port);
        let timeout = Duration::from_secs(options.options.timeout);

        if connection.is_none() {
            *connection = Some(
                HttpStream::connect(&host, port, parsed.scheme() == "https", timeout).await?,
            );
        }
        let stream = connection.as_mut().expect("connection just established");

        let bytes = if request.unsafe_bytes.is_empty() {
            request.serialize_http1()
        } else {
            request.unsafe_bytes.clone()
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, async {
            stream.write_all(&bytes).await?;
            stream.read_response(self.effective_max_size(options)).await
        })
        .await;

        let raw_response = match result {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                *connection = None;
                return Err(ScanError::Network(NetworkError::Reset {
                    target: format!("{} ({})", target, e),
                }));
            }
            Err(_) => {
                *connection = None;
                return Err(ScanError::Network(NetworkError::Timeout { target, timeout }));
            }
        };
        if !self.pipeline {
            *connection = None;
        }

        let (status, headers, body) = parse_raw_response(&raw_response, &target)?;
        let body = decompress_body(&headers, body);
        Ok(HttpResponse {
            status,
            headers,
            body,
            final_url: request.url.clone(),
            duration: started.elapsed(),
        })
    }

    fn effective_max_size(&self, options: &ExecutorOptions) -> usize {
        if self.max_size > 0 {
            self.max_size
        } else {
            options.options.max_body_size
        }
    }

    /// Project the response into the canonical event map.
    fn make_event(
        &self,
        target: &MetaInput,
        request: &RenderedRequest,
        response: &HttpResponse,
    ) -> InternalEvent {
        let mut event = InternalEvent::new();
        event.insert("host".into(), Value::String(target.id()));
        event.insert("matched_at".into(), Value::String(response.final_url.clone()));
        event.insert("url".into(), Value::String(request.url.clone()));
        event.insert("request".into(), Value::String(request.dump()));
        event.insert(
            "status_code".into(),
            Value::Int(i64::from(response.status)),
        );
        event.insert("content_length".into(), Value::Int(response.body.len() as i64));

        let body = String::from_utf8_lossy(&response.body).to_string();
        let all_headers: String = response
            .headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n");
        event.insert(
            "response".into(),
            Value::String(format!(
                "HTTP/1.1 {}\n{}\n\n{}",
                response.status, all_headers, body
            )),
        );
        event.insert("body".into(), Value::String(body));
        event.insert("all_headers".into(), Value::String(all_headers));
        event.insert(
            "duration".into(),
            Value::Int(response.duration.as_millis() as i64),
        );
        for (name, value) in &response.headers {
            event.insert(
                name.to_lowercase().replace('-', "_"),
                Value::String(value.clone()),
            );
        }
        event
    }

    /// Evaluate every member's operators on the event and raise wrapped
    /// events through the callback. Returns per-member positivity.
    fn evaluate_members(
        &self,
        event: &InternalEvent,
        members: &[OperatorSet<'_>],
        done: &mut [bool],
        callback: EventCallback<'_>,
        oob: Option<(&str, &ExecutorOptions)>,
    ) -> bool {
        let mut any_positive = false;
        for (i, member) in members.iter().enumerate() {
            if done[i] {
                continue;
            }
            let result = member.operators.execute(event, "body");
            let positive = result.is_positive(member.operators.has_extractors());
            if positive {
                any_positive = true;
                if member.stop_at_first_match {
                    done[i] = true;
                }
            }
            // events waiting on an interaction are parked with the
            // correlator so late callbacks can still match
            if let Some((oob_id, options)) = oob {
                if let Some(correlator) = &options.interactions {
                    correlator.add_pending(
                        oob_id,
                        member.template_id,
                        event.clone(),
                        member.operators.clone(),
                    );
                }
            }
            callback(InternalWrappedEvent {
                template_id: member.template_id.to_string(),
                event: event.clone(),
                result,
                positive,
            });
        }
        any_positive
    }

    /// Full execution sharing one request stream across several operator
    /// sets, the building block for clustered templates.
    pub async fn execute_with_members(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        members: &[OperatorSet<'_>],
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        let base_url = target.url();
        let parsed = Url::parse(&base_url).map_err(|_| {
            ScanError::Network(NetworkError::InvalidUrl {
                url: base_url.clone(),
            })
        })?;
        let host_id = target.id();

        let mut generator = RequestGenerator::new(self.slots(), self.payload_generator.as_ref());
        let mut done = vec![false; members.len()];
        let mut matched_any = false;
        let mut pipeline_connection: Option<HttpStream> = None;

        while let Some((slot, binding)) = generator.next() {
            if options.cancel.is_canceled() {
                return Err(ScanError::Canceled);
            }
            if done.iter().all(|d| *d) {
                break;
            }
            // the host error budget is consulted before every request, so
            // a block with many inputs stops wasting effort mid-way
            if options.host_errors.check(&host_id) {
                options.progress.increment_skipped();
                break;
            }

            let mut values = self.target_values(&parsed, &slot);
            for (k, v) in dynamic {
                values.insert(k.clone(), v.clone());
            }
            let mut oob_id: Option<String> = None;
            if slot.contains("interactsh-url") {
                if let Some(correlator) = &options.interactions {
                    let (url, id) = correlator.url();
                    values.insert("interactsh-url".into(), Value::String(url));
                    oob_id = Some(id);
                }
            }
            if let Some(binding) = binding {
                let evaluated = self.evaluated_binding(binding, &values);
                for (k, v) in evaluated {
                    values.insert(k, v);
                }
            }

            let mut request = match self.render(&slot, &base_url, &values) {
                Ok(request) => request,
                Err(ScanError::UnresolvedVariables(missing)) => {
                    warn!(
                        template = self.template_id.as_str(),
                        missing = missing.as_str(),
                        "skipping request with unresolved variables"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.apply_header_defaults(&mut request);

            options.rate_limiter.acquire(&host_id).await?;

            if self.race && self.race_count > 1 && !self.unsafe_raw {
                let gate = RaceGate::new(self.race_count);
                let mut handles = Vec::with_capacity(self.race_count);
                for _ in 0..self.race_count {
                    let request = request.clone();
                    let options = options.clone();
                    let gate = gate.clone();
                    let this = self.clone();
                    handles.push(tokio::spawn(async move {
                        gate.wait().await;
                        this.send_standard(&request, &options).await
                    }));
                }
                for handle in handles {
                    options.progress.increment_requests();
                    match handle.await {
                        Ok(Ok(response)) => {
                            let event = self.make_event(target, &request, &response);
                            let oob = oob_id.as_deref().map(|id| (id, options));
                            matched_any |=
                                self.evaluate_members(&event, members, &mut done, callback, oob);
                        }
                        Ok(Err(e)) => {
                            if e.counts_against_host() {
                                options.host_errors.record(&host_id);
                            }
                            options.progress.record_error(e.kind(), &e.to_string());
                        }
                        Err(join_error) => {
                            warn!(%join_error, "race worker panicked");
                        }
                    }
                }
                continue;
            }

            let send_result = if self.unsafe_raw || self.pipeline {
                self.send_raw(&request, options, &mut pipeline_connection).await
            } else {
                self.send_standard(&request, options).await
            };
            options.progress.increment_requests();

            match send_result {
                Ok(response) => {
                    let event = self.make_event(target, &request, &response);
                    let oob = oob_id.as_deref().map(|id| (id, options));
                    matched_any |= self.evaluate_members(&event, members, &mut done, callback, oob);
                }
                Err(e) => {
                    if e.counts_against_host() {
                        options.host_errors.record(&host_id);
                    }
                    options.progress.record_error(e.kind(), &e.to_string());
                }
            }
        }

        Ok(matched_any)
    }
}

#[async_trait]
impl ProtocolRequest for HttpRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Http
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        if self.path.is_empty() && self.raw.is_empty() {
            return Err(TemplateError::InvalidField {
                field: "http",
                reason: "request block needs 'path' or 'raw'".into(),
            });
        }
        self.template_id = ctx.template_id.clone();
        if !self.payloads.is_empty() {
            self.payload_generator = Some(PayloadGenerator::new(
                self.attack,
                &self.payloads,
                &ctx.template_dir,
            )?);
        }
        self.operators.compile()?;

        let max_redirects = if self.max_redirects > 0 {
            self.max_redirects
        } else {
            ctx.options.max_redirects
        };
        let redirect_policy = if self.redirects || ctx.options.follow_redirects {
            reqwest::redirect::Policy::limited(max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(ctx.options.timeout))
            .redirect(redirect_policy)
            .danger_accept_invalid_certs(true)
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true);
        if let Some(proxy) = &ctx.options.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| TemplateError::InvalidField {
                field: "proxy",
                reason: e.to_string(),
            })?;
            builder = builder.proxy(proxy);
        }
        self.client = Some(builder.build().map_err(|e| TemplateError::InvalidField {
            field: "http",
            reason: format!("client construction failed: {}", e),
        })?);
        Ok(())
    }

    fn requests(&self) -> usize {
        let per_slot = self
            .payload_generator
            .as_ref()
            .map(|g| g.total())
            .unwrap_or(1)
            .max(1);
        self.slots().len() * per_slot
    }

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        let members = [OperatorSet {
            template_id: &self.template_id,
            operators: &self.operators,
            stop_at_first_match: self.stop_at_first_match,
        }];
        self.execute_with_members(target, dynamic, options, &members, callback)
            .await
    }
}

/// A fully rendered request ready to send.
#[derive(Debug, Clone)]
pub struct RenderedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub unsafe_bytes: Vec<u8>,
    pub from_raw: bool,
}

impl RenderedRequest {
    /// Normalized dump used for project-file fingerprints and result
    /// events.
    pub fn dump(&self) -> String {
        let path = Url::parse(&self.url)
            .map(|u| {
                let mut p = u.path().to_string();
                if let Some(q) = u.query() {
                    p.push('?');
                    p.push_str(q);
                }
                p
            })
            .unwrap_or_else(|_| self.url.clone());
        let mut out = format!("{} {} HTTP/1.1\n", self.method, path);
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\n", name, value));
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }

    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(self.url.as_bytes());
        for (name, value) in &self.headers {
            hasher.update(name.as_bytes());
            hasher.update(value.as_bytes());
        }
        hasher.update(self.body.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// HTTP/1.1 serialization for raw socket modes.
    fn serialize_http1(&self) -> Vec<u8> {
        let parsed = Url::parse(&self.url).ok();
        let path = parsed
            .as_ref()
            .map(|u| {
                let mut p = u.path().to_string();
                if let Some(q) = u.query() {
                    p.push('?');
                    p.push_str(q);
                }
                p
            })
            .unwrap_or_else(|| "/".to_string());
        let mut out = format!("{} {} HTTP/1.1\r\n", self.method, path);
        if !self.headers.keys().any(|k| k.eq_ignore_ascii_case("host")) {
            if let Some(host) = parsed.as_ref().and_then(|u| u.host_str()) {
                out.push_str(&format!("Host: {}\r\n", host));
            }
        }
        for (name, value) in &self.headers {
            out.push_str(&format!("{}: {}\r\n", name, value));
        }
        if !self.body.is_empty()
            && !self
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-length"))
        {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        out.push_str("\r\n");
        out.push_str(&self.body);
        out.into_bytes()
    }
}

/// A protocol response in adapter-neutral form.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub final_url: String,
    pub duration: Duration,
}

impl HttpResponse {
    fn to_stored(&self) -> crate::projectfile::StoredResponse {
        crate::projectfile::StoredResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// Plain or TLS socket used by unsafe and pipeline modes.
enum HttpStream {
    Plain(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl HttpStream {
    async fn connect(host: &str, port: u16, tls: bool, timeout: Duration) -> Result<Self, ScanError> {
        let target = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| {
                ScanError::Network(NetworkError::Timeout {
                    target: target.clone(),
                    timeout,
                })
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    ScanError::Network(NetworkError::Refused {
                        target: target.clone(),
                    })
                }
                _ => ScanError::Network(NetworkError::Other {
                    target: target.clone(),
                    reason: e.to_string(),
                }),
            })?;

        if !tls {
            return Ok(HttpStream::Plain(stream));
        }

        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| {
                ScanError::Network(NetworkError::Tls {
                    target: target.clone(),
                    reason: e.to_string(),
                })
            })?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls_stream = connector.connect(host, stream).await.map_err(|e| {
            ScanError::Network(NetworkError::Tls {
                target,
                reason: e.to_string(),
            })
        })?;
        Ok(HttpStream::Tls(Box::new(tls_stream)))
    }

    async fn write_all(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            HttpStream::Plain(stream) => stream.write_all(bytes).await,
            HttpStream::Tls(stream) => stream.write_all(bytes).await,
        }
    }

    /// Read one response worth of bytes: headers plus body, bounded by
    /// content-length when present, connection close otherwise.
    async fn read_response(&mut self, max_size: usize) -> std::io::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        let mut header_end: Option<usize> = None;
        let mut expected_total: Option<usize> = None;

        loop {
            let read = match self {
                HttpStream::Plain(stream) => stream.read(&mut chunk).await?,
                HttpStream::Tls(stream) => stream.read(&mut chunk).await?,
            };
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            if header_end.is_none() {
                if let Some(pos) = find_subsequence(&buffer, b"\r\n\r\n") {
                    header_end = Some(pos + 4);
                    let head = String::from_utf8_lossy(&buffer[..pos]);
                    for line in head.lines() {
                        if let Some((name, value)) = line.split_once(':') {
                            if name.trim().eq_ignore_ascii_case("content-length") {
                                if let Ok(length) = value.trim().parse::<usize>() {
                                    expected_total = Some(pos + 4 + length);
                                }
                            }
                        }
                    }
                }
            }
            if let (Some(_), Some(total)) = (header_end, expected_total) {
                if buffer.len() >= total {
                    buffer.truncate(total);
                    break;
                }
            }
            if buffer.len() >= max_size {
                buffer.truncate(max_size);
                break;
            }
        }
        Ok(buffer)
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_raw_response(
    bytes: &[u8],
    target: &str,
) -> Result<(u16, Vec<(String, String)>, Vec<u8>), ScanError> {
    let header_end = find_subsequence(bytes, b"\r\n\r\n").unwrap_or(bytes.len());
    let head = String::from_utf8_lossy(&bytes[..header_end]);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ScanError::Protocol {
            target: target.to_string(),
            reason: format!("malformed status line '{}'", status_line),
        })?;

    let mut headers = Vec::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let mut body = bytes[(header_end + 4).min(bytes.len())..].to_vec();
    let chunked = headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("transfer-encoding") && value.to_lowercase().contains("chunked")
    });
    if chunked {
        body = dechunk(&body);
    }
    Ok((status, headers, body))
}

fn dechunk(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = body;
    loop {
        let Some(line_end) = find_subsequence(rest, b"\r\n") else {
            break;
        };
        let size_line = String::from_utf8_lossy(&rest[..line_end]);
        let Ok(size) = usize::from_str_radix(size_line.trim(), 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        if rest.len() < start + size {
            out.extend_from_slice(&rest[start..]);
            break;
        }
        out.extend_from_slice(&rest[start..start + size]);
        rest = &rest[(start + size + 2).min(rest.len())..];
    }
    out
}

/// gzip/deflate decompression is manual: the pooled client is built
/// without automatic decoding so unsafe and normal modes behave the same.
fn decompress_body(headers: &[(String, String)], body: Vec<u8>) -> Vec<u8> {
    let encoding = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-encoding"))
        .map(|(_, value)| value.to_lowercase())
        .unwrap_or_default();

    if encoding.contains("gzip") {
        let mut decoder = GzDecoder::new(body.as_slice());
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
    } else if encoding.contains("deflate") {
        let mut decoder = DeflateDecoder::new(body.as_slice());
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
    }
    body
}

/// `{{BaseURL}}` keeps the template's port and path preferences: a
/// template-specified port drops the input's port, a template-specified
/// path drops the input's path.
fn base_url_with_template_prefs(slot: &str, parsed: &Url) -> String {
    let mut url = parsed.clone();
    if BASE_URL_WITH_PORT_RE.is_match(slot) {
        let _ = url.set_port(None);
    }
    if slot.contains("{{BaseURL}}/") {
        url.set_path("");
        url.set_query(None);
    }
    url.as_str().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_port_preference() {
        let parsed = Url::parse("http://example.com:8443/app").unwrap();
        // template overrides the port: input port is dropped
        assert_eq!(
            base_url_with_template_prefs("{{BaseURL}}:9090/x", &parsed),
            "http://example.com/app"
        );
        // template specifies a path: input path is dropped
        assert_eq!(
            base_url_with_template_prefs("{{BaseURL}}/admin", &parsed),
            "http://example.com:8443"
        );
        // bare marker keeps the input as-is
        assert_eq!(
            base_url_with_template_prefs("{{BaseURL}}", &parsed),
            "http://example.com:8443/app"
        );
    }

    #[test]
    fn test_header_defaults_for_model_requests() {
        let block = HttpRequest::default();
        let mut request = RenderedRequest {
            method: "GET".into(),
            url: "http://example.com/a".into(),
            headers: BTreeMap::new(),
            body: String::new(),
            unsafe_bytes: Vec::new(),
            from_raw: false,
        };
        block.apply_header_defaults(&mut request);
        assert_eq!(request.headers["Connection"], "close");
        assert_eq!(request.headers["Accept"], "*/*");
        assert_eq!(request.headers["Accept-Language"], "en");
        assert!(request.headers["User-Agent"].starts_with("Seitti/"));
    }

    #[test]
    fn test_raw_requests_skip_accept_defaults() {
        let block = HttpRequest::default();
        let mut request = RenderedRequest {
            method: "GET".into(),
            url: "http://example.com/a".into(),
            headers: BTreeMap::new(),
            body: String::new(),
            unsafe_bytes: Vec::new(),
            from_raw: true,
        };
        block.apply_header_defaults(&mut request);
        assert!(!request.headers.contains_key("Accept"));
        assert!(request.headers.contains_key("User-Agent"));
    }

    #[test]
    fn test_fingerprint_stability() {
        let request = RenderedRequest {
            method: "GET".into(),
            url: "http://example.com/a".into(),
            headers: BTreeMap::from([("Accept".to_string(), "*/*".to_string())]),
            body: String::new(),
            unsafe_bytes: Vec::new(),
            from_raw: false,
        };
        assert_eq!(request.fingerprint(), request.fingerprint());

        let mut other = request.clone();
        other.body = "x".into();
        assert_ne!(request.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_parse_raw_response() {
        let bytes = b"HTTP/1.1 200 OK\r\nServer: nginx\r\nContent-Length: 2\r\n\r\nhi";
        let (status, headers, body) = parse_raw_response(bytes, "t").unwrap();
        assert_eq!(status, 200);
        assert_eq!(headers[0], ("Server".to_string(), "nginx".to_string()));
        assert_eq!(body, b"hi");
    }

    #[test]
    fn test_dechunk() {
        let body = b"3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n";
        assert_eq!(dechunk(body), b"abcde");
    }

    #[test]
    fn test_gzip_decompression() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let headers = vec![("Content-Encoding".to_string(), "gzip".to_string())];
        assert_eq!(decompress_body(&headers, compressed), b"compressed payload");
    }

    #[test]
    fn test_serialize_http1_adds_host_and_length() {
        let request = RenderedRequest {
            method: "POST".into(),
            url: "http://example.com/submit".into(),
            headers: BTreeMap::new(),
            body: "a=1".into(),
            unsafe_bytes: Vec::new(),
            from_raw: false,
        };
        let wire = String::from_utf8(request.serialize_http1()).unwrap();
        assert!(wire.starts_with("POST /submit HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(wire.contains("Content-Length: 3\r\n"));
        assert!(wire.ends_with("\r\n\r\na=1"));
    }

    #[test]
    fn test_requests_count() {
        let mut block = HttpRequest {
            path: vec!["{{BaseURL}}/a".into(), "{{BaseURL}}/b".into()],
            ..Default::default()
        };
        assert_eq!(block.requests(), 2);

        block.payloads.insert(
            "u".into(),
            PayloadSource::List(vec!["1".into(), "2".into(), "3".into()]),
        );
        block.payload_generator = Some(
            PayloadGenerator::new(AttackType::Sniper, &block.payloads, std::path::Path::new("."))
                .unwrap(),
        );
        assert_eq!(block.requests(), 6);
    }
}
