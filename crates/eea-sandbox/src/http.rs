//! Bounded, SSRF-safe HTTP fetch exposed to predicates as `http.send`.
//!
//! Adapted from the provider registry's SSRF guard: any resolved remote
//! address that is not globally unicast — loopback, RFC1918/private-use,
//! link-local, or otherwise non-public — is rejected before a connection
//! is attempted.

use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use url::Url;

use crate::error::SandboxError;

/// Counts requests rejected for resolving to a non-public address
/// (property P6).
pub static BLOCKED_REQUESTS: AtomicU64 = AtomicU64::new(0);

/// Configuration for the bounded HTTP helper.
#[derive(Debug, Clone)]
pub struct HttpSandboxConfig {
    /// Per-call deadline.
    pub timeout: Duration,
    /// Maximum response body size, in bytes.
    pub max_response_bytes: usize,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for HttpSandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_response_bytes: 1024 * 1024,
            user_agent: "eea-sandbox/0.1".to_owned(),
        }
    }
}

/// Returns whether `addr` is disqualified as an SSRF target: loopback,
/// private-use, link-local, unspecified, or (for IPv6) a mapped/
/// unicast-link-local variant of any of the above, or a Unique Local
/// Address (`fc00::/7`, IPv6's equivalent of RFC1918 space).
#[must_use]
pub fn is_private_or_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_or_link_local(&IpAddr::V4(v4));
            }
            (v6.segments()[0] & 0xffc0) == 0xfe80 || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

fn resolve_host(url: &Url) -> Result<Vec<SocketAddr>, SandboxError> {
    let host = url.host_str().ok_or_else(|| SandboxError::Http("url has no host".to_owned()))?;
    let port = url.port_or_known_default().unwrap_or(443);
    (host, port)
        .to_socket_addrs()
        .map_err(|source| SandboxError::Http(source.to_string()))
        .map(Iterator::collect)
}

/// Performs a bounded GET request to `url`, rejecting any target whose
/// resolved address is not public.
///
/// # Errors
/// Returns [`SandboxError::RemoteAddressNotPublic`] if every resolved
/// address (or the only resolved address) is disqualified, or
/// [`SandboxError::Http`] for any other transport failure.
pub fn send(url_str: &str, config: &HttpSandboxConfig) -> Result<Vec<u8>, SandboxError> {
    let url = Url::parse(url_str).map_err(|source| SandboxError::Http(source.to_string()))?;

    let resolved = resolve_host(&url)?;
    if resolved.is_empty() || resolved.iter().all(|addr| is_private_or_link_local(&addr.ip())) {
        BLOCKED_REQUESTS.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(url = %url, "sandbox http.send rejected non-public address");
        return Err(SandboxError::RemoteAddressNotPublic);
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|source| SandboxError::Http(source.to_string()))?;

    let response =
        client.get(url).send().map_err(|source| SandboxError::Http(source.to_string()))?;
    let bytes = response.bytes().map_err(|source| SandboxError::Http(source.to_string()))?;
    if bytes.len() > config.max_response_bytes {
        return Err(SandboxError::Http(format!(
            "response exceeds {} bytes",
            config.max_response_bytes
        )));
    }
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::net::Ipv6Addr;

    use super::HttpSandboxConfig;
    use super::is_private_or_link_local;
    use super::send;

    #[test]
    fn loopback_v4_is_rejected() {
        assert!(is_private_or_link_local(&Ipv4Addr::LOCALHOST.into()));
    }

    #[test]
    fn private_use_v4_is_rejected() {
        assert!(is_private_or_link_local(&Ipv4Addr::new(10, 0, 0, 1).into()));
        assert!(is_private_or_link_local(&Ipv4Addr::new(192, 168, 1, 1).into()));
    }

    #[test]
    fn link_local_v4_is_rejected() {
        assert!(is_private_or_link_local(&Ipv4Addr::new(169, 254, 1, 1).into()));
    }

    #[test]
    fn public_v4_is_accepted() {
        assert!(!is_private_or_link_local(&Ipv4Addr::new(8, 8, 8, 8).into()));
    }

    #[test]
    fn loopback_v6_is_rejected() {
        assert!(is_private_or_link_local(&Ipv6Addr::LOCALHOST.into()));
    }

    #[test]
    fn unique_local_v6_is_rejected() {
        assert!(is_private_or_link_local(&Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1).into()));
    }

    #[test]
    fn public_v6_is_accepted() {
        assert!(!is_private_or_link_local(&Ipv6Addr::new(0x2606, 0x4700, 0, 0, 0, 0, 0, 1).into()));
    }

    #[test]
    fn send_to_loopback_server_is_blocked() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("binds");
        let addr = server.server_addr();
        let url = format!("http://{addr}/");
        let result = send(&url, &HttpSandboxConfig::default());
        assert!(matches!(result, Err(super::SandboxError::RemoteAddressNotPublic)));
    }
}
