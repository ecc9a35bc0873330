//! Private-network detection for crawl targets.
//!
//! The fetch and link-extraction stages refuse to touch hosts that resolve
//! to private address space, so a crawl seeded from the public web cannot be
//! steered at internal services.

use std::net::IpAddr;

use async_trait::async_trait;
use pipeline::BoxError;

/// Detects whether a host resolves to a private network address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrivateNetworkDetector: Send + Sync {
    async fn is_private(&self, host: &str) -> Result<bool, BoxError>;
}

/// Detector that resolves hostnames through the system resolver.
///
/// A host counts as private if any address it resolves to is private.
#[derive(Debug, Default)]
pub struct ResolvingDetector;

impl ResolvingDetector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PrivateNetworkDetector for ResolvingDetector {
    async fn is_private(&self, host: &str) -> Result<bool, BoxError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(is_private_ip(ip));
        }

        // The port only satisfies the resolver API; it plays no role in the
        // lookup result.
        let addrs = tokio::net::lookup_host((host, 80)).await?;
        Ok(addrs.into_iter().any(|addr| is_private_ip(addr.ip())))
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_unspecified()
                || v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                // Carrier-grade NAT, 100.64.0.0/10.
                || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_unspecified()
                || v6.is_loopback()
                // Unique local, fc00::/7.
                || (segments[0] & 0xfe00) == 0xfc00
                // Link local, fe80::/10.
                || (segments[0] & 0xffc0) == 0xfe80
        }
    }
}
