use ipnetwork::{Ipv4Network, Ipv6Network};
use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use tracing::warn;
use url::{Host, Url};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SsrfError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("blocked hostname: {0}")]
    BlockedHostname(String),

    #[error("address {0} is in a restricted range")]
    RestrictedAddress(IpAddr),

    #[error("DNS resolution failed for {0}")]
    ResolutionFailed(String),
}

/// Outcome of a successful check; the fetcher connects to `resolved_ip` so
/// the address that was validated is the address that gets dialed.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    pub hostname: String,
    pub resolved_ip: IpAddr,
    pub port: u16,
}

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "0.0.0.0",
];

static BLOCKED_V4: Lazy<Vec<Ipv4Network>> = Lazy::new(|| {
    [
        "127.0.0.0/8",    // loopback
        "169.254.0.0/16", // link-local (includes cloud metadata)
        "10.0.0.0/8",     // private
        "172.16.0.0/12",  // private
        "192.168.0.0/16", // private
        "0.0.0.0/8",      // non-routable
        "100.64.0.0/10",  // CGNAT
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("static CIDR"))
    .collect()
});

static BLOCKED_V6: Lazy<Vec<Ipv6Network>> = Lazy::new(|| {
    [
        "::1/128",   // loopback
        "fe80::/10", // link-local
        "fc00::/7",  // unique local
        "fec0::/10", // deprecated site-local
    ]
    .iter()
    .map(|cidr| cidr.parse().expect("static CIDR"))
    .collect()
});

const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

pub struct SsrfGuard;

impl SsrfGuard {
    /// Validates an outbound URL before any socket is opened. Literal IPs
    /// are checked directly; hostnames are resolved and every answer is
    /// checked, so a DNS record pointing inside the perimeter fails closed.
    pub async fn check(raw_url: &str) -> Result<ValidatedTarget, SsrfError> {
        let url = Url::parse(raw_url).map_err(|e| SsrfError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(SsrfError::UnsupportedScheme(scheme.to_string())),
        }

        let host = url
            .host()
            .ok_or_else(|| SsrfError::InvalidUrl("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| SsrfError::InvalidUrl("missing port".to_string()))?;

        match host {
            Host::Domain(domain) => {
                let lowered = domain.to_ascii_lowercase();
                if BLOCKED_HOSTNAMES.contains(&lowered.as_str()) {
                    warn!(host = %domain, "SSRF: blocked hostname");
                    return Err(SsrfError::BlockedHostname(lowered));
                }

                let addrs: Vec<IpAddr> = tokio::net::lookup_host((lowered.as_str(), port))
                    .await
                    .map_err(|_| SsrfError::ResolutionFailed(lowered.clone()))?
                    .map(|sa| sa.ip())
                    .collect();

                if addrs.is_empty() {
                    return Err(SsrfError::ResolutionFailed(lowered));
                }
                for addr in &addrs {
                    Self::validate_addr(*addr)?;
                }

                Ok(ValidatedTarget {
                    hostname: lowered,
                    resolved_ip: addrs[0],
                    port,
                })
            }
            Host::Ipv4(v4) => {
                Self::validate_addr(IpAddr::V4(v4))?;
                Ok(ValidatedTarget {
                    hostname: v4.to_string(),
                    resolved_ip: IpAddr::V4(v4),
                    port,
                })
            }
            Host::Ipv6(v6) => {
                Self::validate_addr(IpAddr::V6(v6))?;
                Ok(ValidatedTarget {
                    hostname: v6.to_string(),
                    resolved_ip: IpAddr::V6(v6),
                    port,
                })
            }
        }
    }

    fn validate_addr(addr: IpAddr) -> Result<(), SsrfError> {
        match addr {
            IpAddr::V4(v4) => Self::validate_v4(v4, addr),
            IpAddr::V6(v6) => {
                // IPv4-mapped addresses are judged by their v4 payload.
                if let Some(mapped) = v6.to_ipv4_mapped() {
                    return Self::validate_v4(mapped, addr);
                }
                if BLOCKED_V6.iter().any(|net| net.contains(v6)) {
                    warn!(%addr, "SSRF: restricted IPv6 range");
                    return Err(SsrfError::RestrictedAddress(addr));
                }
                Ok(())
            }
        }
    }

    fn validate_v4(v4: Ipv4Addr, original: IpAddr) -> Result<(), SsrfError> {
        if v4 == METADATA_V4 || BLOCKED_V4.iter().any(|net| net.contains(v4)) {
            warn!(addr = %original, "SSRF: restricted IPv4 range");
            return Err(SsrfError::RestrictedAddress(original));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        assert!(matches!(
            SsrfGuard::check("ftp://example.com/file").await,
            Err(SsrfError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            SsrfGuard::check("file:///etc/passwd").await,
            Err(SsrfError::UnsupportedScheme(_))
        ));
    }

    #[tokio::test]
    async fn rejects_blocklisted_hostnames() {
        for host in ["localhost", "LOCALHOST", "ip6-loopback", "0.0.0.0"] {
            let url = format!("http://{host}/admin");
            assert!(
                matches!(SsrfGuard::check(&url).await, Err(SsrfError::BlockedHostname(_))),
                "{host} should be blocked"
            );
        }
    }

    #[tokio::test]
    async fn rejects_private_and_special_literals() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.1",
            "[::1]",
            "[fe80::1]",
            "[fc00::1]",
            "[fec0::1]",
            "[::ffff:192.168.1.1]",
        ] {
            let url = format!("http://{ip}/");
            assert!(
                matches!(SsrfGuard::check(&url).await, Err(SsrfError::RestrictedAddress(_))),
                "{ip} should be restricted"
            );
        }
    }

    #[tokio::test]
    async fn allows_public_literals_with_default_ports() {
        let target = SsrfGuard::check("https://8.8.8.8/path").await.unwrap();
        assert_eq!(target.port, 443);

        let target = SsrfGuard::check("http://1.1.1.1/").await.unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.resolved_ip, "1.1.1.1".parse::<IpAddr>().unwrap());
    }
}
