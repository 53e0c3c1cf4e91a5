// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Raw HTTP Request Parsing
 * Parses template raw blocks into method, path, headers and body
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::BTreeMap;
use url::Url;

use crate::errors::ScanError;

/// A parsed raw request from a template `raw` block.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub full_url: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// The exact bytes to put on the wire in unsafe mode, normalization
    /// skipped.
    pub unsafe_bytes: Vec<u8>,
}

/// Parse a rendered raw request against the target base url. A request
/// line carrying an absolute url overrides the Host header; otherwise the
/// host derives from the target.
pub fn parse(raw: &str, base_url: &str, unsafe_mode: bool) -> Result<RawRequest, ScanError> {
    let normalized = raw.replace("\r\n", "\n");
    let mut lines = normalized.split('\n');

    let request_line = lines
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ScanError::Protocol {
            target: base_url.to_string(),
            reason: "raw request is empty".into(),
        })?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ScanError::Protocol {
            target: base_url.to_string(),
            reason: "raw request line has no method".into(),
        })?
        .to_string();
    let request_path = parts.next().unwrap_or("/").to_string();

    let parsed_base = Url::parse(base_url).map_err(|_| {
        ScanError::Network(crate::errors::NetworkError::InvalidUrl {
            url: base_url.to_string(),
        })
    })?;

    let mut headers = BTreeMap::new();
    let mut body = String::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
            continue;
        }
        if line.trim().is_empty() {
            in_body = true;
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    let body = body.trim_end_matches('\n').to_string();

    // absolute url in the request line wins over the target and the Host
    // header
    let (full_url, path) = if request_path.starts_with("http://") || request_path.starts_with("https://")
    {
        let absolute = Url::parse(&request_path).map_err(|_| {
            ScanError::Network(crate::errors::NetworkError::InvalidUrl { url: request_path.clone() })
        })?;
        if let Some(host) = absolute.host_str() {
            let host_value = match absolute.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.insert("Host".to_string(), host_value);
        }
        let path = match absolute.query() {
            Some(query) => format!("{}?{}", absolute.path(), query),
            None => absolute.path().to_string(),
        };
        (absolute.to_string(), path)
    } else {
        let mut joined = parsed_base.clone();
        joined.set_query(None);
        let (clean_path, query) = match request_path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (request_path.clone(), None),
        };
        joined.set_path(&clean_path);
        joined.set_query(query.as_deref());
        if !headers.contains_key("Host") {
            let host = parsed_base.host_str().unwrap_or_default();
            let host_value = match parsed_base.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            };
            headers.insert("Host".to_string(), host_value);
        }
        (joined.to_string(), request_path)
    };

    let mut request = RawRequest {
        method,
        path,
        full_url,
        headers,
        body,
        unsafe_bytes: Vec::new(),
    };

    if unsafe_mode {
        // unsafe requests preserve the template bytes, only the line
        // endings become CRLF
        let mut wire = String::new();
        for (i, line) in normalized.split('\n').enumerate() {
            if i > 0 {
                wire.push_str("\r\n");
            }
            wire.push_str(line);
        }
        if !wire.ends_with("\r\n\r\n") {
            wire.push_str("\r\n\r\n");
        }
        request.unsafe_bytes = wire.into_bytes();
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_raw() {
        let raw = "POST /login HTTP/1.1\nContent-Type: application/x-www-form-urlencoded\n\nuser=a&pass=b";
        let parsed = parse(raw, "http://example.com", false).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, "/login");
        assert_eq!(parsed.full_url, "http://example.com/login");
        assert_eq!(parsed.headers["Host"], "example.com");
        assert_eq!(parsed.headers["Content-Type"], "application/x-www-form-urlencoded");
        assert_eq!(parsed.body, "user=a&pass=b");
    }

    #[test]
    fn test_parse_preserves_target_port() {
        let raw = "GET /x HTTP/1.1\n\n";
        let parsed = parse(raw, "http://example.com:8080", false).unwrap();
        assert_eq!(parsed.headers["Host"], "example.com:8080");
        assert_eq!(parsed.full_url, "http://example.com:8080/x");
    }

    #[test]
    fn test_absolute_url_overrides_host() {
        let raw = "GET http://other.example:9090/admin HTTP/1.1\nHost: original\n\n";
        let parsed = parse(raw, "http://example.com", false).unwrap();
        assert_eq!(parsed.headers["Host"], "other.example:9090");
        assert_eq!(parsed.full_url, "http://other.example:9090/admin");
        assert_eq!(parsed.path, "/admin");
    }

    #[test]
    fn test_query_string_preserved() {
        let raw = "GET /search?q=admin&page=2 HTTP/1.1\n\n";
        let parsed = parse(raw, "http://example.com", false).unwrap();
        assert_eq!(parsed.full_url, "http://example.com/search?q=admin&page=2");
    }

    #[test]
    fn test_unsafe_bytes_use_crlf() {
        let raw = "GET /a HTTP/1.1\nHost: example.com\n\n";
        let parsed = parse(raw, "http://example.com", true).unwrap();
        let wire = String::from_utf8(parsed.unsafe_bytes).unwrap();
        assert!(wire.starts_with("GET /a HTTP/1.1\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_empty_raw_rejected() {
        assert!(parse("", "http://example.com", false).is_err());
    }
}
