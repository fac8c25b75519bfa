//! Usage: Hop-by-hop header stripping and outbound header construction.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

const RESPONSE_STRIPPED: &[&str] = &["content-encoding", "content-length"];

pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

pub fn strip_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str();
        if !HOP_BY_HOP.contains(&lower) && !RESPONSE_STRIPPED.contains(&lower) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Build the base outbound header set for a request: inbound headers with
/// hop-by-hop fields removed, `X-Forwarded-For` appended, and configured custom
/// headers overlaid last (so they win on conflict).
pub fn build_base_headers(inbound: &HeaderMap, client_addr: &str, overlay: &HashMap<String, String>) -> HeaderMap {
    let mut headers = strip_hop_by_hop(inbound);
    append_forwarded_for(&mut headers, client_addr);

    for (key, value) in overlay {
        if let (Ok(name), Ok(val)) = (HeaderName::try_from(key.as_str()), HeaderValue::from_str(value)) {
            headers.insert(name, val);
        }
    }

    headers
}

fn append_forwarded_for(headers: &mut HeaderMap, client_addr: &str) {
    let name = HeaderName::from_static("x-forwarded-for");
    let combined = match headers.get(&name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {client_addr}"),
        _ => client_addr.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert(name, value);
    }
}
