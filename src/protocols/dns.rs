// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - DNS Protocol Adapter
 * Single query execution against configured or trusted resolvers
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioResolver;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use crate::core::inputs::MetaInput;
use crate::dsl::{self, DynamicValues, Value};
use crate::errors::{NetworkError, ScanError, TemplateError};
use crate::operators::{InternalEvent, Operators};
use crate::types::ProtocolKind;

use super::{CompileContext, EventCallback, ExecutorOptions, InternalWrappedEvent, ProtocolRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DnsQueryType {
    #[default]
    A,
    NS,
    DS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
}

impl DnsQueryType {
    fn record_type(&self) -> RecordType {
        match self {
            DnsQueryType::A => RecordType::A,
            DnsQueryType::NS => RecordType::NS,
            DnsQueryType::DS => RecordType::DS,
            DnsQueryType::CNAME => RecordType::CNAME,
            DnsQueryType::SOA => RecordType::SOA,
            DnsQueryType::PTR => RecordType::PTR,
            DnsQueryType::MX => RecordType::MX,
            DnsQueryType::TXT => RecordType::TXT,
            DnsQueryType::AAAA => RecordType::AAAA,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DnsQueryType::A => "A",
            DnsQueryType::NS => "NS",
            DnsQueryType::DS => "DS",
            DnsQueryType::CNAME => "CNAME",
            DnsQueryType::SOA => "SOA",
            DnsQueryType::PTR => "PTR",
            DnsQueryType::MX => "MX",
            DnsQueryType::TXT => "TXT",
            DnsQueryType::AAAA => "AAAA",
        }
    }
}

/// A `dns` request block from a template. URL inputs are reduced to their
/// hostname before querying.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DnsRequest {
    /// Query name, `{{FQDN}}` resolves to the target hostname.
    pub name: String,
    #[serde(rename = "type")]
    pub query_type: DnsQueryType,
    pub recursion: bool,
    /// Template-level resolver override, `ip[:port]`.
    pub resolvers: Vec<String>,
    #[serde(flatten)]
    pub operators: Operators,

    #[serde(skip)]
    template_id: String,
    #[serde(skip)]
    resolver: Option<Arc<TokioResolver>>,
}

impl std::fmt::Debug for DnsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsRequest")
            .field("name", &self.name)
            .field("query_type", &self.query_type)
            .field("recursion", &self.recursion)
            .field("resolvers", &self.resolvers)
            .finish_non_exhaustive()
    }
}

impl Default for DnsRequest {
    fn default() -> Self {
        Self {
            name: "{{FQDN}}".to_string(),
            query_type: DnsQueryType::default(),
            recursion: true,
            resolvers: Vec::new(),
            operators: Operators::default(),
            template_id: String::new(),
            resolver: None,
        }
    }
}

impl DnsRequest {
    fn build_resolver(&self, ctx: &CompileContext) -> Result<TokioResolver, TemplateError> {
        let custom: Vec<&String> = self
            .resolvers
            .iter()
            .chain(ctx.options.resolvers.iter())
            .collect();

        let config = if custom.is_empty() {
            // small trusted default set
            let mut config = ResolverConfig::google();
            for server in ResolverConfig::cloudflare().name_servers() {
                config.add_name_server(server.clone());
            }
            config
        } else {
            let mut config = ResolverConfig::new();
            for entry in custom {
                let (ip, port) = match entry.rsplit_once(':') {
                    Some((ip, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                        (ip, port.parse::<u16>().unwrap_or(53))
                    }
                    _ => (entry.as_str(), 53),
                };
                let ip: IpAddr = ip.parse().map_err(|_| TemplateError::InvalidField {
                    field: "resolvers",
                    reason: format!("'{}' is not an ip address", entry),
                })?;
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, port),
                    hickory_resolver::proto::xfer::Protocol::Udp,
                ));
            }
            config
        };

        let mut builder =
            TokioResolver::builder_with_config(config, TokioConnectionProvider::default());
        builder.options_mut().recursion_desired = self.recursion;
        builder.options_mut().timeout = std::time::Duration::from_secs(ctx.options.timeout);
        Ok(builder.build())
    }

    fn make_event(
        &self,
        target: &MetaInput,
        domain: &str,
        answers: Vec<String>,
        rcode: &str,
        duration_ms: i64,
    ) -> InternalEvent {
        let mut event = InternalEvent::new();
        event.insert("host".into(), Value::String(target.id()));
        event.insert("matched_at".into(), Value::String(domain.to_string()));
        event.insert("name".into(), Value::String(domain.to_string()));
        event.insert(
            "type".into(),
            Value::String(self.query_type.as_str().to_string()),
        );
        event.insert(
            "request".into(),
            Value::String(format!("{} {}", self.query_type.as_str(), domain)),
        );
        event.insert("rcode".into(), Value::String(rcode.to_string()));
        event.insert("answer".into(), Value::String(answers.join("\n")));
        event.insert("raw".into(), Value::String(answers.join("\n")));
        event.insert(
            self.query_type.as_str().to_lowercase(),
            Value::List(answers.into_iter().map(Value::String).collect()),
        );
        event.insert("duration".into(), Value::Int(duration_ms));
        event
    }
}

#[async_trait]
impl ProtocolRequest for DnsRequest {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Dns
    }

    fn compile(&mut self, ctx: &CompileContext) -> Result<(), TemplateError> {
        self.template_id = ctx.template_id.clone();
        self.operators.compile()?;
        self.resolver = Some(Arc::new(self.build_resolver(ctx)?));
        Ok(())
    }

    fn requests(&self) -> usize {
        1
    }

    async fn execute(
        &self,
        target: &MetaInput,
        dynamic: &DynamicValues,
        options: &ExecutorOptions,
        callback: EventCallback<'_>,
    ) -> Result<bool, ScanError> {
        if options.cancel.is_canceled() {
            return Err(ScanError::Canceled);
        }
        let hostname = target.hostname();

        let mut values = DynamicValues::new();
        values.insert("FQDN".into(), Value::String(hostname.clone()));
        values.insert("Hostname".into(), Value::String(hostname.clone()));
        for (k, v) in dynamic {
            values.insert(k.clone(), v.clone());
        }

        let domain = match dsl::interpolate(&self.name, &values) {
            dsl::Interpolated::Done(domain) => domain.trim_end_matches('.').to_string(),
            dsl::Interpolated::Unresolved(missing) => {
                return Err(ScanError::UnresolvedVariables(missing.join(", ")))
            }
        };

        options.rate_limiter.acquire(&target.id()).await?;

        let resolver = self.resolver.as_ref().ok_or_else(|| ScanError::Protocol {
            target: domain.clone(),
            reason: "request block not compiled".into(),
        })?;

        let started = Instant::now();
        let lookup = resolver.lookup(domain.clone(), self.query_type.record_type()).await;
        options.progress.increment_requests();
        let duration_ms = started.elapsed().as_millis() as i64;

        let event = match lookup {
            Ok(lookup) => {
                let answers: Vec<String> = lookup
                    .record_iter()
                    .map(|record| record.to_string())
                    .collect();
                self.make_event(target, &domain, answers, "NOERROR", duration_ms)
            }
            Err(e) => {
                let message = e.to_string();
                // missing records are a valid answer, not a network failure
                if message.contains("no record") || message.contains("NXDomain") {
                    self.make_event(target, &domain, Vec::new(), "NXDOMAIN", duration_ms)
                } else {
                    return Err(ScanError::Network(NetworkError::Dns {
                        host: domain,
                        reason: message,
                    }));
                }
            }
        };

        let result = self.operators.execute(&event, "answer");
        let positive = result.is_positive(self.operators.has_extractors());
        callback(InternalWrappedEvent {
            template_id: self.template_id.clone(),
            event,
            result,
            positive,
        });
        Ok(positive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_name_is_fqdn_marker() {
        let request = DnsRequest::default();
        assert_eq!(request.name, "{{FQDN}}");
        assert!(request.recursion);
        assert_eq!(request.query_type, DnsQueryType::A);
    }

    #[test]
    fn test_event_projection() {
        let request = DnsRequest::default();
        let target = MetaInput::new("https://example.com/path");
        let event = request.make_event(
            &target,
            "example.com",
            vec!["example.com. 300 IN A 93.184.216.34".into()],
            "NOERROR",
            12,
        );
        assert_eq!(event["name"], Value::from("example.com"));
        assert_eq!(event["rcode"], Value::from("NOERROR"));
        assert!(event["answer"].to_string().contains("93.184.216.34"));
        assert!(matches!(event.get("a"), Some(Value::List(_))));
    }

    #[test]
    fn test_query_type_mapping() {
        assert_eq!(DnsQueryType::TXT.record_type(), RecordType::TXT);
        assert_eq!(DnsQueryType::AAAA.record_type(), RecordType::AAAA);
        assert_eq!(DnsQueryType::MX.as_str(), "MX");
    }
}
