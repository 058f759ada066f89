//! Request-scoped visitor identity extracted from HTTP headers
//!
//! The client IP is resolved in this order:
//! - first entry of `X-Forwarded-For` (the originating client)
//! - `X-Real-IP`
//! - the socket remote address
//!
//! Both IPv4 and IPv6 are accepted; entries that do not parse as an IP are skipped.

use axum::http::{header, HeaderMap};
use std::net::IpAddr;

/// Typed request context carrying who made the request.
///
/// Inserted into request extensions by the visitor middleware; `ip` is empty when
/// no source yielded an address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitorContext {
    pub ip: String,
    pub user_agent: String,
}

impl VisitorContext {
    pub fn from_headers(headers: &HeaderMap, socket_ip: Option<IpAddr>) -> Self {
        let ip = extract_client_ip(headers, socket_ip)
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let user_agent = header_str(headers, header::USER_AGENT.as_str())
            .unwrap_or_default()
            .to_string();

        Self { ip, user_agent }
    }
}

/// Extract the client IP address from proxy headers, falling back to the socket address
pub fn extract_client_ip(headers: &HeaderMap, socket_ip: Option<IpAddr>) -> Option<IpAddr> {
    extract_from_x_forwarded_for(headers)
        .or_else(|| extract_from_x_real_ip(headers))
        .or(socket_ip)
}

/// Leftmost valid entry of X-Forwarded-For
fn extract_from_x_forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    let xff = header_str(headers, "x-forwarded-for")?;

    xff.split(',')
        .find_map(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_from_x_real_ip(headers: &HeaderMap) -> Option<IpAddr> {
    header_str(headers, "x-real-ip")?.trim().parse::<IpAddr>().ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

/// Hostname of a `Host` header value without its port.
///
/// Bracketed IPv6 literals keep their brackets: `[::1]:8080` becomes `[::1]`.
pub fn host_without_port(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Primary language tag of an `Accept-Language` header, e.g. `en-US` from
/// `en-US,en;q=0.9`
pub fn primary_language(accept_language: &str) -> Option<&str> {
    accept_language
        .split(',')
        .next()
        .map(|tag| tag.split(';').next().unwrap_or(tag).trim())
        .filter(|tag| !tag.is_empty() && *tag != "*")
}
