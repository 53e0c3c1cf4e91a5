// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Network Protocol Adapter
 * Scripted TCP exchanges: write data, read responses, match the bytes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::core::inputs::MetaInput;
use crate::dsl::{self, DynamicValues, Value};
use crate::errors::{NetworkError, ScanError, TemplateError};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};

/// One step of a network exchange: send literal/hex data, read a byte
/// count, or read until a delimiter. Reads can be captured under a name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkInput {
    pub data: Option<String>,
    #[serde(rename = "type")]
    pub data_type: Option<String>,
    pub read: Option<usize>,
    #[serde(rename = "read-to")]
    pub read_to: Option<String>,
    pub name: Option<String>,
}

/// A `network` request block from a template. Host entries support a
/// `tls://` prefix and `{{Hostname}}` interpolation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkRequest {
    pub host: Vec<String>,
    pub inputs: Vec<NetworkInput>,
    #[serde(rename = "read-size")]
    pub read_size: usize,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
}

impl Default for NetworkRequest {
    fn default() -> Self {
        Self {
            host: Vec::new(),
            inputs: Vec::new(),
            read_size: 4096,
            operators: Operators::default(),
            template_id: String::new(),
        }
    }
}

enum NetStream {
    Plain(TcpStream),
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl NetStream {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            NetStream::Plain(s) => s.write_all(data).await,
            NetStream::Tls(s) => s.write_all(data).await,
        }
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            NetStream::Plain(s) => s.read(buf).await,
            NetStream::Tls(s) => s.read(buf).await,
        }
    }
}

impl NetworkRequest {
    /// Decode `\x41`-style escapes; used for binary protocol probes.
    fn decode_data(&self, input: &NetworkInput, rendered: &str) -> Vec<u8> {
        if input.data_type.as_deref() == Some("hex") {
            if let Ok(decoded) = hex::decode(rendered.trim()) {
                return decoded;
            }
        }
        let mut out = Vec::with_capacity(rendered.len());
        let bytes = rendered.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
                if let Ok(byte) =
                    u8::from_str_radix(&rendered[i + 2..i + 4], 16)
                {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        out
    }

    async fn exchange(
        &self,
        address: &str,
        tls: bool,
        values: &DynamicValues,
        timeout: Duration,
        max_size: usize,
    ) -> Result<(InternalEvent, Vec<u8>), ScanError> {
        let (host, port) = address.rsplit_once(':').ok_or_else(|| ScanError::Protocol {
            target: address.to_string(),
            reason: "network host needs host:port".into(),
        })?;
        let port: u16 = port.parse().map_err(|_| ScanError::Protocol {
            target: address.to_string(),
            reason: format!("invalid port '{}'", port),
        })?;

        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                ScanError::Network(NetworkError::Timeout {
                    target: address.to_string(),
                    timeout,
                })
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::ConnectionRefused => ScanError::Network(NetworkError::Refused {
                    target: address.to_string(),
                }),
                _ => ScanError::Network(NetworkError::Other {
                    target: address.to_string(),
                    reason: e.to_string(),
                }),
            })?;

        let mut stream = if tls {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| {
                    ScanError::Network(NetworkError::Tls {
                        target: address.to_string(),
                        reason: e.to_string(),
                    })
                })?;
            let connector = tokio_native_tls::TlsConnector::from(connector);
            NetStream::Tls(Box::new(connector.connect(host, stream).await.map_err(
                |e| {
                    ScanError::Network(NetworkError::Tls {
                        target: address.to_string(),
                        reason: e.to_string(),
                    })
                },
            )?))
        } else {
            NetStream::Plain(stream)
        };

        let mut event = InternalEvent::new();
        let mut all_read: Vec<u8> = Vec::new();
        let mut all_written: Vec<u8> = Vec::new();
        let mut did_read = false;

        for input in &self.inputs {
            if let Some(data) = &input.data {
                let rendered = match dsl::interpolate(data, values) {
                    dsl::Interpolated::Done(rendered) => rendered,
                    dsl::Interpolated::Unresolved(missing) => {
                        return Err(ScanError::UnresolvedVariables(missing.join(", ")))
                    }
                };
                let bytes = self.decode_data(input, &rendered);
                tokio::time::timeout(timeout, stream.write_all(&bytes))
                    .await
                    .map_err(|_| {
                        ScanError::Network(NetworkError::Timeout {
                            target: address.to_string(),
                            timeout,
                        })
                    })?
                    .map_err(|e| {
                        ScanError::Network(NetworkError::Reset {
                            target: format!("{} ({})", address, e),
                        })
                    })?;
                all_written.extend_from_slice(&bytes);
            }

            let mut captured: Vec<u8> = Vec::new();
            if let Some(count) = input.read {
                captured = self
                    .read_exact_bounded(&mut stream, count.min(max_size), timeout, address)
                    .await?;
                did_read = true;
            } else if let Some(delimiter) = &input.read_to {
                let delim = self.decode_data(input, delimiter);
                captured = self
                    .read_until(&mut stream, &delim, max_size, timeout, address)
                    .await?;
                did_read = true;
            }
            if !captured.is_empty() {
                if let Some(name) = &input.name {
                    event.insert(
                        name.clone(),
                        Value::String(String::from_utf8_lossy(&captured).to_string()),
                    );
                }
                all_read.extend_from_slice(&captured);
            }
        }

        // blocks with only writes still want the banner that follows
        if !did_read {
            let captured = self
                .read_exact_bounded(&mut stream, self.read_size.min(max_size), timeout, address)
                .await
                .unwrap_or_default();
            all_read.extend_from_slice(&captured);
        }

        event.insert(
            "request".into(),
            Value::String(String::from_utf8_lossy(&all_written).to_string()),
        );
        Ok((event, all_read))
    }

    async fn read_exact_bounded(
        &self,
        stream: &mut NetStream,
        count: usize,
        timeout: Duration,
        address: &str,
    ) -> Result<Vec<u8>, ScanError> {
        let mut out = Vec::with_capacity(count.min(4096));
        let mut chunk = [0u8; 1024];
        while out.len() < count {
            let want = (count - out.len()).min(chunk.len());
            let read = match tokio::time::timeout(timeout, stream.read_chunk(&mut chunk[..want]))
                .await
            {
                Ok(Ok(0)) => break,
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    return Err(ScanError::Network(NetworkError::Reset {
                        target: format!("{} ({})", address, e),
                    }))
                }
                // a short read on timeout is still usable data
                Err(_) => break,
            };
            out.extend_from_slice(&chunk[..read]);
        }
        Ok(out)
    }

    async fn read_until(
        &self,
        stream: &mut NetStream,
        delimiter: &[u8],
        max_size: usize,
        timeout: Duration,
        address: &str,
    ) -> Result<Vec<u8>, ScanError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            if out.len() >= max_size {
                break;
            }
            if !delimiter.is_empty()
                && out
                    .windows(delimiter.len())
                    .any(|window| window == delimiter)
            {
                break;
            }
            let read = match tokio::time::timeout(timeout, stream.read_chunk(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    return Err(ScanError::Network(NetworkError::Reset {
                        target: format!("{} ({})", address, e),
                    }))
                }
                Err(_) => break,
            };
            out.extend_from_slice(&chunk[..read]);
        }
        Ok(out)
    }
}

#[async_trait]
impl ProtocolRequest for NetworkRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Network
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        if self.host.is_empty() {
            return Err(TemplateError::InvalidField {
                field: "network",
                reason: "request block needs at least one host".into(),
            });
        }
        self.template_id = ctx.template_id.clone();
        self.operators.compile()
    }

    fn requests(&self) -> usize {
        self.host.len()
    }

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        let hostname = target.hostname();
        let default_port = target.port.unwrap_or(80);
        let timeout = Duration::from_secs(options.options.timeout);
        let mut matched_any = false;

        for host_entry in &self.host {
            if options.cancel.is_canceled() {
                return Err(ScanError::Canceled);
            }
            if options.host_errors.check(&target.id()) {
                options.progress.increment_skipped();
                break;
            }

            let (tls, entry) = match host_entry.strip_prefix("tls://") {
                Some(rest) => (true, rest),
                None => (false, host_entry.as_str()),
            };

            let mut values = DynamicValues::new();
            values.insert("Hostname".into(), Value::String(target.id()));
            values.insert("Host".into(), Value::String(hostname.clone()));
            values.insert("Port".into(), Value::Int(i64::from(default_port)));
            for (k, v) in dynamic {
                values.insert(k.clone(), v.clone());
            }

            let rendered = match dsl::interpolate(entry, &values) {
                dsl::Interpolated::Done(rendered) => rendered,
                dsl::Interpolated::Unresolved(missing) => {
                    return Err(ScanError::UnresolvedVariables(missing.join(", ")))
                }
            };
            let address = if rendered.contains(':') {
                rendered
            } else {
                format!("{}:{}", rendered, default_port)
            };

            options.rate_limiter.acquire(&target.id()).await?;

            let exchange = self
                .exchange(
                    &address,
                    tls,
                    &values,
                    timeout,
                    options.options.max_body_size,
                )
                .await;
            options.progress.increment_requests();

            match exchange {
                Ok((mut event, data)) => {
                    event.insert("host".into(), Value::String(target.id()));
                    event.insert("matched_at".into(), Value::String(address.clone()));
                    event.insert(
                        "data".into(),
                        Value::String(String::from_utf8_lossy(&data).to_string()),
                    );
                    event.insert("raw".into(), Value::Bytes(data));

                    let result = self.operators.execute(&event, "data");
                    let positive = result.is_positive(self.operators.has_extractors());
                    matched_any |= positive;
                    callback(InternalWrappedEvent {
                        template_id: self.template_id.clone(),
                        event,
                        result,
                        positive,
                    });
                }
                Err(e) => {
                    if e.counts_against_host() {
                        options.host_errors.record(&target.id());
                    }
                    options.progress.record_error(e.kind(), &e.to_string());
                }
            }
        }

        Ok(matched_any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{Matcher, MatcherType};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

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
    fn test_hex_escape_decoding() {
        let request = NetworkRequest::default();
        let input = NetworkInput::default();
        assert_eq!(request.decode_data(&input, "\\x41\\x42C"), b"ABC");

        let hex_input = NetworkInput {
            data_type: Some("hex".into()),
            ..Default::default()
        };
        assert_eq!(request.decode_data(&hex_input, "4142"), b"AB");
    }

    #[tokio::test]
    async fn test_banner_grab_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let mut request = NetworkRequest {
            host: vec!["{{Hostname}}".into()],
            inputs: vec![NetworkInput {
                read: Some(64),
                name: Some("banner".into()),
                ..Default::default()
            }],
            operators: Operators {
                matchers: vec![word_matcher(vec!["OpenSSH"])],
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = CompileContext {
            template_id: "net-banner".into(),
            template_dir: std::path::PathBuf::from("."),
            options: Arc::new(crate::types::ScanOptions {
                timeout: 2,
                rate_limit: 0,
                ..Default::default()
            }),
        };
        request.compile(&ctx).unwrap();

        let mut target = MetaInput::new(addr.ip().to_string());
        target.port = Some(addr.port());

        let options = ExecutorOptions::from_options(ctx.options.clone());
        let events = std::sync::Mutex::new(Vec::new());
        let matched = request
            .execute(&target, &DynamicValues::new(), &options, &|event| {
                events.lock().unwrap().push(event);
            })
            .await
            .unwrap();

        assert!(matched);
        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].positive);
        assert!(events[0].event["data"].to_string().contains("OpenSSH"));
        assert!(events[0].event["banner"].to_string().contains("SSH-2.0"));
    }

    #[tokio::test]
    async fn test_refused_connection_counts_error() {
        let mut request = NetworkRequest {
            host: vec!["127.0.0.1:1".into()],
            operators: Operators {
                matchers: vec![word_matcher(vec!["x"])],
                ..Default::default()
            },
            ..Default::default()
        };
        let ctx = CompileContext {
            template_id: "net-refused".into(),
            template_dir: std::path::PathBuf::from("."),
            options: Arc::new(crate::types::ScanOptions {
                timeout: 1,
                rate_limit: 0,
                ..Default::default()
            }),
        };
        request.compile(&ctx).unwrap();

        let options = ExecutorOptions::from_options(ctx.options.clone());
        let matched = request
            .execute(
                &MetaInput::new("127.0.0.1:1"),
                &DynamicValues::new(),
                &options,
                &|_| {},
            )
            .await
            .unwrap();
        assert!(!matched);
        assert_eq!(options.progress.errors(), 1);
        assert!(options.host_errors.error_count("127.0.0.1") > 0);
    }
}
