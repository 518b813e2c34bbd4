//! C1 — turns a configuration string (`host`, `host:port`, `[ipv6]` or
//! `[ipv6]:port`) into zero or more socket endpoints.

use std::net::{IpAddr, SocketAddr};

use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Split a `host:port`-shaped string into its host and service parts,
/// following the bracket rule: a leading `[` delimits the host up to the
/// matching `]`, with an optional `:<port>` suffix as the service. Without
/// brackets, the split happens at the first `:`.
///
/// A colon as the very first character of an unbracketed string is treated
/// as belonging to the host rather than splitting it into an empty host —
/// this mirrors the documented behaviour of the original address parser and
/// is covered by the `address_parsing` test below.
pub fn host_service(s: &str) -> (Option<String>, Option<String>) {
    if s.is_empty() {
        return (None, None);
    }

    if let Some(rest) = s.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => {
                let host = rest[..end].to_string();
                let tail = &rest[end + 1..];
                let service = tail.strip_prefix(':').map(|p| p.to_string());
                (Some(host), service)
            }
            None => (Some(s.to_string()), None),
        };
    }

    match s.find(':') {
        None => (Some(s.to_string()), None),
        Some(0) => (Some(s.to_string()), Some(String::new())),
        Some(pos) => (Some(s[..pos].to_string()), Some(s[pos + 1..].to_string())),
    }
}

/// Resolve a configuration string to zero or more socket endpoints, using
/// `default_port` whenever no service is present. Resolution failures are
/// swallowed: an empty vector is returned, never an error.
pub async fn resolve(
    resolver: &TokioAsyncResolver,
    s: &str,
    default_port: u16,
) -> Vec<SocketAddr> {
    let (Some(host), service) = host_service(s) else {
        return vec![];
    };
    let port = service
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(default_port);

    if let Ok(ip) = host.parse::<IpAddr>() {
        return vec![SocketAddr::new(ip, port)];
    }

    match resolver.lookup_ip(host.as_str()).await {
        Ok(lookup) => lookup.iter().map(|ip| SocketAddr::new(ip, port)).collect(),
        Err(_) => vec![],
    }
}

/// Build a default resolver (system config, falling back to Google's public
/// DNS when no local configuration is available).
pub fn default_resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing() {
        assert_eq!(
            host_service("[::1]:8333"),
            (Some("::1".to_string()), Some("8333".to_string()))
        );
        assert_eq!(host_service("example.com"), (Some("example.com".to_string()), None));
        assert_eq!(
            host_service(":8333"),
            (Some(":8333".to_string()), Some(String::new()))
        );
        assert_eq!(host_service(""), (None, None));
    }

    #[test]
    fn bare_bracketed_host_has_no_service() {
        assert_eq!(host_service("[::1]"), (Some("::1".to_string()), None));
    }
}
