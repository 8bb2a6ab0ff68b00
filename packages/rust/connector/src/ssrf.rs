//! Outbound request target checks.
//!
//! Every URL a connector is about to call is resolved and rejected when it
//! points at loopback, private, link-local, or cloud-metadata destinations.
//! [`CheckedResolver`] repeats the address check at connect time, so
//! redirect hops and hosts that re-resolve differently are covered too.

use std::error::Error as StdError;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{debug, warn};
use url::{Host, Url};

use enrichkit_shared::{EnrichError, Result};

/// Hostnames refused regardless of what they resolve to.
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "metadata.goog",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Host suffixes refused regardless of what they resolve to.
const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

type BoxError = Box<dyn StdError + Send + Sync>;

// ---------------------------------------------------------------------------
// Address classification
// ---------------------------------------------------------------------------

/// Check if an IP is in a private/reserved range.
///
/// IPv6 forms that carry an IPv4 address (mapped, compatible, NAT64, 6to4)
/// are judged by the embedded address.
pub fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_multicast()
                // 0.0.0.0/8
                || octets[0] == 0
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        }
        IpAddr::V6(v6) => {
            if let Some(embedded) = embedded_ipv4(v6) {
                return is_blocked_ip(&IpAddr::V4(embedded));
            }
            let segments = v6.segments();
            let first = segments[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                // fc00::/7 (unique local)
                || (first & 0xFE00) == 0xFC00
                // fe80::/10 (link local)
                || (first & 0xFFC0) == 0xFE80
                // 64:ff9b:1::/48 (local-use NAT64)
                || (first == 0x0064 && segments[1] == 0xFF9B && segments[2] == 0x0001)
                // 2001::/32 (Teredo, client address is obfuscated)
                || (first == 0x2001 && segments[1] == 0x0000)
        }
    }
}

/// IPv4 address carried inside an IPv6 one, if any.
fn embedded_ipv4(v6: &Ipv6Addr) -> Option<Ipv4Addr> {
    let s = v6.segments();
    let join = |hi: u16, lo: u16| Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo));

    // ::ffff:a.b.c.d and ::a.b.c.d
    if s[..5].iter().all(|&seg| seg == 0) && (s[5] == 0 || s[5] == 0xFFFF) {
        // :: and ::1 stay with their IPv6 meaning.
        if s[5] == 0 && s[6] == 0 {
            return None;
        }
        return Some(join(s[6], s[7]));
    }
    // 64:ff9b::/96 (well-known NAT64)
    if s[0] == 0x0064 && s[1] == 0xFF9B && s[2..6].iter().all(|&seg| seg == 0) {
        return Some(join(s[6], s[7]));
    }
    // 2002::/16 (6to4)
    if s[0] == 0x2002 {
        return Some(join(s[1], s[2]));
    }
    None
}

fn is_blocked_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    BLOCKED_HOSTNAMES.contains(&host.as_str())
        || BLOCKED_SUFFIXES.iter().any(|suffix| host.ends_with(suffix))
}

/// Only plain HTTP(S) leaves the process, whatever the address policy.
pub fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(EnrichError::ssrf(
            url.as_str(),
            format!("scheme '{other}' is not allowed"),
        )),
    }
}

/// Checks that need no DNS: scheme, hostname blocklist, and IP literals.
///
/// Used directly for redirect hops, where the policy callback is synchronous.
/// Hop hostnames are vetted again by [`CheckedResolver`] when connecting.
pub fn check_url_static(url: &Url) -> Result<()> {
    check_scheme(url)?;

    match url.host() {
        None => Err(EnrichError::ssrf(url.as_str(), "URL has no host")),
        Some(Host::Ipv4(v4)) => check_ip(url, IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => check_ip(url, IpAddr::V6(v6)),
        Some(Host::Domain(domain)) => {
            if is_blocked_hostname(domain) {
                Err(EnrichError::ssrf(
                    url.as_str(),
                    format!("hostname '{domain}' is blocked"),
                ))
            } else {
                Ok(())
            }
        }
    }
}

fn check_ip(url: &Url, ip: IpAddr) -> Result<()> {
    if is_blocked_ip(&ip) {
        Err(EnrichError::ssrf(
            url.as_str(),
            format!("address {ip} is private or reserved"),
        ))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Connect-time resolution
// ---------------------------------------------------------------------------

/// Raised inside the HTTP client when a target is refused.
///
/// Travels through reqwest's error chain and is turned back into
/// [`EnrichError::Ssrf`] by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTarget {
    pub target: String,
    pub reason: String,
}

impl BlockedTarget {
    pub fn new(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BlockedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} refused: {}", self.target, self.reason)
    }
}

impl StdError for BlockedTarget {}

impl From<EnrichError> for BlockedTarget {
    fn from(e: EnrichError) -> Self {
        match e {
            EnrichError::Ssrf { url, reason } => Self::new(url, reason),
            other => Self::new("", other.to_string()),
        }
    }
}

/// Resolve `host` and keep only public addresses.
///
/// Fails with [`BlockedTarget`] when every address is private or reserved.
/// Ports are left at zero; the HTTP client fills in the URL's port.
pub async fn resolve_public(host: &str) -> std::result::Result<Vec<SocketAddr>, BoxError> {
    if is_blocked_hostname(host) {
        return Err(Box::new(BlockedTarget::new(host, "hostname is blocked")));
    }

    let mut allowed = Vec::new();
    let mut dropped = 0usize;
    for addr in tokio::net::lookup_host((host, 0)).await? {
        if is_blocked_ip(&addr.ip()) {
            dropped += 1;
            warn!(host, address = %addr.ip(), "dropping private address from resolution");
        } else {
            allowed.push(addr);
        }
    }

    if allowed.is_empty() {
        let reason = if dropped == 0 {
            "host resolved to no addresses"
        } else {
            "host resolves only to private or reserved addresses"
        };
        return Err(Box::new(BlockedTarget::new(host, reason)));
    }
    debug!(host, allowed = allowed.len(), dropped, "resolved outbound host");
    Ok(allowed)
}

/// DNS resolver for the shared HTTP client.
///
/// Every connection the client opens, including redirect hops, goes through
/// here, so the address actually dialled is the one that was checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckedResolver;

impl Resolve for CheckedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();
        Box::pin(async move {
            let addrs = resolve_public(&host).await?;
            Ok::<Addrs, BoxError>(Box::new(addrs.into_iter()))
        })
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Resolves outbound targets and refuses internal destinations.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfGuard {
    /// Skip address checks (integration tests against a local mock server).
    allow_private: bool,
}

impl SsrfGuard {
    pub fn new(allow_private: bool) -> Self {
        if allow_private {
            warn!("outbound address checks disabled; private addresses are reachable");
        }
        Self { allow_private }
    }

    pub fn allows_private(&self) -> bool {
        self.allow_private
    }

    /// Parse `raw` and verify every address its host resolves to.
    ///
    /// Unresolvable hosts are refused too: the request would fail anyway and
    /// the check must not be skipped on a DNS hiccup. The scheme rule holds
    /// even when private addresses are allowed.
    pub async fn check(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw)
            .map_err(|e| EnrichError::ssrf(raw, format!("unparseable URL: {e}")))?;
        check_scheme(&url)?;
        if self.allow_private {
            return Ok(url);
        }

        check_url_static(&url)?;

        let Some(Host::Domain(domain)) = url.host() else {
            return Ok(url);
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| EnrichError::ssrf(url.as_str(), format!("cannot resolve host: {e}")))?;

        let mut resolved = 0usize;
        for addr in addrs {
            resolved += 1;
            check_ip(&url, addr.ip())?;
        }
        if resolved == 0 {
            return Err(EnrichError::ssrf(url.as_str(), "host resolved to no addresses"));
        }

        debug!(%url, resolved, "outbound target allowed");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn blocks_non_http_schemes() {
        assert!(check_url_static(&url("file:///etc/passwd")).is_err());
        assert!(check_url_static(&url("gopher://example.com/")).is_err());
    }

    #[test]
    fn blocks_private_ip_literals() {
        for target in [
            "http://127.0.0.1/",
            "http://10.0.0.5/",
            "http://172.16.0.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data/",
            "http://100.64.0.1/",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:127.0.0.1]/",
        ] {
            let err = check_url_static(&url(target)).unwrap_err();
            assert!(matches!(err, EnrichError::Ssrf { .. }), "{target}");
        }
    }

    #[test]
    fn blocks_local_hostnames() {
        for target in [
            "http://localhost:8080/",
            "http://LOCALHOST./",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://printer.local/",
            "http://db.internal/",
            "http://app.localhost/",
        ] {
            assert!(check_url_static(&url(target)).is_err(), "{target}");
        }
    }

    #[test]
    fn allows_public_targets() {
        assert!(check_url_static(&url("https://8.8.8.8/")).is_ok());
        assert!(check_url_static(&url("https://api.example.com/v1")).is_ok());
        assert!(check_url_static(&url("http://[2001:4860:4860::8888]/")).is_ok());
    }

    #[tokio::test]
    async fn guard_rejects_metadata_endpoint() {
        let guard = SsrfGuard::default();
        let err = guard
            .check("http://169.254.169.254/latest/meta-data/")
            .await
            .unwrap_err();
        assert!(matches!(err, EnrichError::Ssrf { .. }));
    }

    #[tokio::test]
    async fn guard_rejects_unparseable_url() {
        let err = SsrfGuard::default().check("not a url").await.unwrap_err();
        assert!(matches!(err, EnrichError::Ssrf { .. }));
    }

    #[tokio::test]
    async fn guard_allows_public_ip_literal_without_dns() {
        let url = SsrfGuard::default().check("https://1.1.1.1/dns-query").await.unwrap();
        assert_eq!(url.host_str(), Some("1.1.1.1"));
    }

    #[tokio::test]
    async fn permissive_guard_allows_loopback() {
        let guard = SsrfGuard::new(true);
        assert!(guard.check("http://127.0.0.1:9/").await.is_ok());
    }

    #[tokio::test]
    async fn permissive_guard_still_refuses_other_schemes() {
        let guard = SsrfGuard::new(true);
        for target in ["file:///etc/passwd", "gopher://127.0.0.1:70/_", "ftp://10.0.0.1/"] {
            let err = guard.check(target).await.unwrap_err();
            assert!(matches!(err, EnrichError::Ssrf { .. }), "{target}");
        }
    }

    #[test]
    fn blocks_ipv4_embedded_in_ipv6() {
        for raw in [
            // NAT64 of 169.254.169.254
            "64:ff9b::a9fe:a9fe",
            // NAT64 of 127.0.0.1
            "64:ff9b::7f00:1",
            // IPv4-compatible 169.254.169.254
            "::a9fe:a9fe",
            // IPv4-compatible 10.0.0.1
            "::a00:1",
            // 6to4 of 169.254.169.254
            "2002:a9fe:a9fe::1",
            // 6to4 of 192.168.0.1
            "2002:c0a8:1::",
            "64:ff9b:1::a08:808",
            "2001:0:4136:e378::1",
        ] {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(is_blocked_ip(&ip), "{raw}");
        }
    }

    #[test]
    fn public_ipv4_embeddings_are_allowed() {
        for raw in ["64:ff9b::808:808", "2002:808:808::1", "::ffff:8.8.8.8"] {
            let ip: IpAddr = raw.parse().unwrap();
            assert!(!is_blocked_ip(&ip), "{raw}");
        }
        assert!(check_url_static(&url("http://[64:ff9b::a9fe:a9fe]/latest/")).is_err());
    }

    #[tokio::test]
    async fn resolver_refuses_private_only_hosts() {
        for host in ["127.0.0.1", "169.254.169.254", "::1"] {
            let err = resolve_public(host).await.unwrap_err();
            let blocked = err.downcast_ref::<BlockedTarget>().expect("blocked target");
            assert_eq!(blocked.target, host);
        }
        let err = resolve_public("metadata.google.internal").await.unwrap_err();
        assert!(err.downcast_ref::<BlockedTarget>().is_some());
    }

    #[tokio::test]
    async fn resolver_keeps_public_literals() {
        let addrs = resolve_public("8.8.8.8").await.unwrap();
        assert_eq!(addrs, vec![SocketAddr::from(([8, 8, 8, 8], 0))]);
    }
}
