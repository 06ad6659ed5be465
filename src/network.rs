//! Public address discovery.
//!
//! Probes run in priority order: the host's own interface list first, then
//! the per-provider metadata services. A probe answers `Some(addr)` or
//! nothing; it never fails the run. Private addresses are discarded no
//! matter which probe produced them.

use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::thread;
use std::time::Duration;

use crate::process::Cmd;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Metadata services in priority order: (provider, URL).
pub const METADATA_ENDPOINTS: &[(&str, &str)] = &[
    ("vultr", "http://169.254.169.254/v1/interfaces/0/ipv4/address"),
    (
        "digitalocean",
        "http://169.254.169.254/metadata/v1/interfaces/public/0/ipv4/address",
    ),
    ("aws", "http://169.254.169.254/2021-03-23/meta-data/public-ipv4"),
    ("hetzner", "http://169.254.169.254/hetzner/v1/metadata/public-ipv4"),
];

/// Resolved public address, or the display-only `unknown` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicAddress {
    Resolved(Ipv4Addr),
    Unknown,
}

impl PublicAddress {
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self {
            PublicAddress::Resolved(ip) => Some(*ip),
            PublicAddress::Unknown => None,
        }
    }
}

impl fmt::Display for PublicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicAddress::Resolved(ip) => write!(f, "{}", ip),
            PublicAddress::Unknown => f.write_str("unknown"),
        }
    }
}

/// 10/8, 172.16/12, 192.168/16 and 127/8.
pub fn is_private(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback()
}

/// Parse a whole string as a dotted quad; surrounding whitespace is allowed.
pub fn parse_strict_ipv4(text: &str) -> Option<Ipv4Addr> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    text.parse().ok()
}

/// One strategy for finding the public address.
pub trait AddressProbe: Send + Sync {
    fn name(&self) -> &str;

    fn probe(&self) -> Option<Ipv4Addr>;
}

/// First address reported by the host's interfaces.
pub struct InterfaceProbe {
    listing: Option<String>,
}

impl InterfaceProbe {
    /// Ask the running host via `hostname --all-ip-addresses`.
    pub fn system() -> Self {
        Self { listing: None }
    }

    /// Use a fixed, space-separated address listing.
    pub fn with_listing(listing: impl Into<String>) -> Self {
        Self {
            listing: Some(listing.into()),
        }
    }

    fn listing(&self) -> Option<String> {
        if let Some(listing) = &self.listing {
            return Some(listing.clone());
        }
        let out = Cmd::new("hostname")
            .arg("--all-ip-addresses")
            .allow_fail()
            .run()
            .ok()?;
        out.success().then_some(out.stdout)
    }
}

impl AddressProbe for InterfaceProbe {
    fn name(&self) -> &str {
        "interfaces"
    }

    fn probe(&self) -> Option<Ipv4Addr> {
        let listing = self.listing()?;
        let first = listing.split_whitespace().next()?;
        let ip = parse_strict_ipv4(first)?;
        if is_private(ip) {
            tracing::debug!(%ip, "first interface address is private");
            return None;
        }
        Some(ip)
    }
}

/// A provider metadata endpoint to query for the public address.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataEndpoint {
    pub provider: String,
    pub url: String,
}

impl MetadataEndpoint {
    pub fn defaults() -> Vec<MetadataEndpoint> {
        METADATA_ENDPOINTS
            .iter()
            .map(|(provider, url)| MetadataEndpoint {
                provider: provider.to_string(),
                url: url.to_string(),
            })
            .collect()
    }
}

/// HTTP GET against a metadata service; the whole body must be an address.
pub struct MetadataProbe {
    endpoint: MetadataEndpoint,
    timeout: Duration,
}

impl MetadataProbe {
    pub fn new(endpoint: MetadataEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    fn fetch(&self) -> Result<String, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()?;
        client
            .get(&self.endpoint.url)
            .send()?
            .error_for_status()?
            .text()
    }
}

impl AddressProbe for MetadataProbe {
    fn name(&self) -> &str {
        &self.endpoint.provider
    }

    fn probe(&self) -> Option<Ipv4Addr> {
        match self.fetch() {
            Ok(body) => {
                let ip = parse_strict_ipv4(&body);
                if ip.is_none() {
                    tracing::debug!(provider = %self.endpoint.provider, "metadata body is not an IPv4 address");
                }
                ip
            }
            Err(e) => {
                tracing::debug!(provider = %self.endpoint.provider, error = %e, "metadata probe failed");
                None
            }
        }
    }
}

/// The standard chain: interfaces, then every metadata endpoint.
pub fn default_probes(endpoints: &[MetadataEndpoint], timeout: Duration) -> Vec<Box<dyn AddressProbe>> {
    let mut probes: Vec<Box<dyn AddressProbe>> = vec![Box::new(InterfaceProbe::system())];
    probes.extend(
        endpoints
            .iter()
            .cloned()
            .map(|e| Box::new(MetadataProbe::new(e, timeout)) as Box<dyn AddressProbe>),
    );
    probes
}

fn accept(probe: &dyn AddressProbe, result: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
    match result {
        Some(ip) if is_private(ip) => {
            tracing::debug!(probe = probe.name(), %ip, "discarding private address");
            None
        }
        other => other,
    }
}

/// Run probes one at a time, stopping at the first acceptable address.
pub fn resolve_public_address(probes: &[Box<dyn AddressProbe>]) -> PublicAddress {
    for probe in probes {
        if let Some(ip) = accept(probe.as_ref(), probe.probe()) {
            tracing::info!(probe = probe.name(), %ip, "public address resolved");
            return PublicAddress::Resolved(ip);
        }
    }
    tracing::warn!("no probe produced a public address");
    PublicAddress::Unknown
}

/// Run all probes at once and rank the answers by probe priority.
///
/// Waits for every probe, so a slow higher-priority success still beats a
/// fast lower-priority one.
pub fn resolve_public_address_concurrent(probes: &[Box<dyn AddressProbe>]) -> PublicAddress {
    let results: Vec<Option<Ipv4Addr>> = thread::scope(|scope| {
        let handles: Vec<_> = probes
            .iter()
            .map(|probe| scope.spawn(move || accept(probe.as_ref(), probe.probe())))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(None))
            .collect()
    });

    match probes.iter().zip(results).find_map(|(p, r)| r.map(|ip| (p, ip))) {
        Some((probe, ip)) => {
            tracing::info!(probe = probe.name(), %ip, "public address resolved");
            PublicAddress::Resolved(ip)
        }
        None => {
            tracing::warn!("no probe produced a public address");
            PublicAddress::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    struct Fixed {
        name: &'static str,
        answer: Option<Ipv4Addr>,
        delay: Duration,
    }

    impl Fixed {
        fn boxed(name: &'static str, answer: Option<&str>) -> Box<dyn AddressProbe> {
            Self::slow(name, answer, Duration::ZERO)
        }

        fn slow(name: &'static str, answer: Option<&str>, delay: Duration) -> Box<dyn AddressProbe> {
            Box::new(Fixed {
                name,
                answer: answer.map(|a| a.parse().unwrap()),
                delay,
            })
        }
    }

    impl AddressProbe for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn probe(&self) -> Option<Ipv4Addr> {
            thread::sleep(self.delay);
            self.answer
        }
    }

    /// Serve a single HTTP response with `body` and return the URL.
    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}/meta", addr)
    }

    fn metadata_probe(url: String) -> MetadataProbe {
        MetadataProbe::new(
            MetadataEndpoint {
                provider: "test".into(),
                url,
            },
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_private_ranges() {
        for ip in ["10.0.0.1", "172.16.0.1", "172.31.255.255", "192.168.1.5", "127.0.0.1"] {
            assert!(is_private(ip.parse().unwrap()), "{} should be private", ip);
        }
        for ip in ["203.0.113.9", "172.32.0.1", "198.51.100.4", "11.0.0.1"] {
            assert!(!is_private(ip.parse().unwrap()), "{} should be public", ip);
        }
    }

    #[test]
    fn test_parse_strict_ipv4() {
        assert_eq!(parse_strict_ipv4("203.0.113.9\n"), Some(Ipv4Addr::new(203, 0, 113, 9)));
        assert_eq!(parse_strict_ipv4(""), None);
        assert_eq!(parse_strict_ipv4("203.0.113"), None);
        assert_eq!(parse_strict_ipv4("256.0.0.1"), None);
        assert_eq!(parse_strict_ipv4("<html>203.0.113.9</html>"), None);
        assert_eq!(parse_strict_ipv4("203.0.113.9 extra"), None);
        assert_eq!(parse_strict_ipv4("::1"), None);
    }

    #[test]
    fn test_interface_probe_rejects_private_first_address() {
        let probe = InterfaceProbe::with_listing("192.168.1.5 203.0.113.9");
        assert_eq!(probe.probe(), None);

        let probe = InterfaceProbe::with_listing("203.0.113.9 10.0.0.4\n");
        assert_eq!(probe.probe(), Some(Ipv4Addr::new(203, 0, 113, 9)));

        assert_eq!(InterfaceProbe::with_listing("").probe(), None);
    }

    #[test]
    fn test_private_interface_falls_through_to_metadata() {
        let probes: Vec<Box<dyn AddressProbe>> = vec![
            Box::new(InterfaceProbe::with_listing("192.168.1.5")),
            Fixed::boxed("vultr", Some("203.0.113.9")),
        ];
        assert_eq!(
            resolve_public_address(&probes),
            PublicAddress::Resolved(Ipv4Addr::new(203, 0, 113, 9))
        );
    }

    #[test]
    fn test_first_success_wins_in_order() {
        let probes = vec![
            Fixed::boxed("a", None),
            Fixed::boxed("b", Some("198.51.100.4")),
            Fixed::boxed("c", Some("203.0.113.9")),
        ];
        assert_eq!(
            resolve_public_address(&probes),
            PublicAddress::Resolved(Ipv4Addr::new(198, 51, 100, 4))
        );
    }

    #[test]
    fn test_private_metadata_answer_is_discarded() {
        let probes = vec![
            Fixed::boxed("a", Some("10.1.2.3")),
            Fixed::boxed("b", Some("127.0.0.1")),
        ];
        assert_eq!(resolve_public_address(&probes), PublicAddress::Unknown);
        assert_eq!(resolve_public_address_concurrent(&probes), PublicAddress::Unknown);
    }

    #[test]
    fn test_all_probes_fail_yields_unknown_sentinel() {
        let probes = vec![Fixed::boxed("a", None), Fixed::boxed("b", None)];
        let address = resolve_public_address(&probes);
        assert_eq!(address, PublicAddress::Unknown);
        assert_eq!(address.to_string(), "unknown");
        assert_eq!(address.ip(), None);
    }

    #[test]
    fn test_concurrent_resolution_keeps_priority() {
        let probes = vec![
            Fixed::slow("slow-high", Some("203.0.113.9"), Duration::from_millis(200)),
            Fixed::boxed("fast-low", Some("198.51.100.4")),
        ];
        assert_eq!(
            resolve_public_address_concurrent(&probes),
            PublicAddress::Resolved(Ipv4Addr::new(203, 0, 113, 9))
        );
    }

    #[test]
    fn test_concurrent_resolution_runs_probes_together() {
        let probes = vec![
            Fixed::slow("a", None, Duration::from_millis(300)),
            Fixed::slow("b", None, Duration::from_millis(300)),
            Fixed::slow("c", Some("198.51.100.4"), Duration::from_millis(300)),
        ];
        let start = Instant::now();
        let address = resolve_public_address_concurrent(&probes);
        assert_eq!(address, PublicAddress::Resolved(Ipv4Addr::new(198, 51, 100, 4)));
        assert!(start.elapsed() < Duration::from_millis(850));
    }

    #[test]
    fn test_metadata_probe_accepts_bare_address() {
        let url = serve_once("200 OK", "203.0.113.9\n");
        assert_eq!(metadata_probe(url).probe(), Some(Ipv4Addr::new(203, 0, 113, 9)));
    }

    #[test]
    fn test_metadata_probe_rejects_malformed_body() {
        let url = serve_once("200 OK", "{\"ip\": \"203.0.113.9\"}");
        assert_eq!(metadata_probe(url).probe(), None);
    }

    #[test]
    fn test_metadata_probe_rejects_error_status() {
        let url = serve_once("404 Not Found", "203.0.113.9");
        assert_eq!(metadata_probe(url).probe(), None);
    }

    #[test]
    fn test_metadata_probe_unreachable_is_no_result() {
        // Bind and drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let probe = metadata_probe(format!("http://127.0.0.1:{}/meta", port));
        assert_eq!(probe.probe(), None);
    }

    #[test]
    fn test_metadata_probe_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        thread::spawn(move || {
            // Accept and hold the connection open without answering.
            if let Ok((_stream, _)) = listener.accept() {
                let _ = done_rx.recv_timeout(Duration::from_secs(10));
            }
        });

        let timeout = Duration::from_secs(1);
        let probe = MetadataProbe::new(
            MetadataEndpoint {
                provider: "silent".into(),
                url: format!("http://{}/meta", addr),
            },
            timeout,
        );
        let start = Instant::now();
        let result = probe.probe();
        let elapsed = start.elapsed();
        let _ = done_tx.send(());

        assert_eq!(result, None);
        assert!(elapsed >= timeout, "gave up early after {:?}", elapsed);
        assert!(elapsed < timeout * 2, "not bounded by the timeout: {:?}", elapsed);
    }

    #[test]
    fn test_default_probes_order() {
        let probes = default_probes(&MetadataEndpoint::defaults(), DEFAULT_PROBE_TIMEOUT);
        let names: Vec<&str> = probes.iter().map(|p| p.name()).collect();
        assert_eq!(names, ["interfaces", "vultr", "digitalocean", "aws", "hetzner"]);
    }
}
