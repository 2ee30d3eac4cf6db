//! HTTP site probing

use crate::config::{ProxyConfig, SiteConfig};
use crate::errors::Result;
use crate::transport;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Why a probe never got an HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Timeout,
    ConnectionRefused,
    DnsFailure,
    Other(String),
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeErrorKind::Timeout => write!(f, "request timed out"),
            ProbeErrorKind::ConnectionRefused => write!(f, "connection refused"),
            ProbeErrorKind::DnsFailure => write!(f, "DNS resolution failed"),
            ProbeErrorKind::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Result of probing one site once
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub name: String,
    pub url: String,
    pub success: bool,
    /// Absent when the request failed before a response arrived
    pub status_code: Option<u16>,
    pub expected_status: u16,
    pub elapsed: Duration,
    /// Absent on success and on status mismatches
    pub error: Option<ProbeErrorKind>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeOutcome {
    /// Human readable reason for a failed probe, `None` on success
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }

        Some(match (&self.error, self.status_code) {
            (Some(kind), _) => kind.to_string(),
            (None, Some(code)) => format!(
                "unexpected status code {} (expected {})",
                code, self.expected_status
            ),
            (None, None) => String::new(),
        })
    }
}

/// Issues GET probes, optionally through a forward proxy
#[derive(Debug, Clone)]
pub struct SiteProber {
    client: Client,
    proxy: Option<ProxyConfig>,
}

impl SiteProber {
    /// Create a prober; a disabled proxy is treated like no proxy at all
    pub fn new(proxy: Option<&ProxyConfig>) -> Result<Self> {
        let proxy = proxy.filter(|p| p.enabled).cloned();
        let client = transport::probe_client(proxy.as_ref())?;

        Ok(Self { client, proxy })
    }

    /// Probe a single site. Every failure mode ends up in the outcome.
    pub async fn probe(&self, site: &SiteConfig) -> ProbeOutcome {
        if let Some(proxy) = &self.proxy {
            info!("Probing {} via proxy {}", site.url, proxy.url());
        }

        let start = Instant::now();
        let result = self
            .client
            .get(&site.url)
            .timeout(site.timeout_duration())
            .send()
            .await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                let status_code = response.status().as_u16();
                let success = status_code == site.expected_status;

                if success {
                    info!(
                        "✓ {} - status: {}, latency: {}ms",
                        site.url,
                        status_code,
                        elapsed.as_millis()
                    );
                } else {
                    warn!(
                        "✗ {} - status: {} (expected: {}), latency: {}ms",
                        site.url,
                        status_code,
                        site.expected_status,
                        elapsed.as_millis()
                    );
                }

                ProbeOutcome {
                    name: site.name.clone(),
                    url: site.url.clone(),
                    success,
                    status_code: Some(status_code),
                    expected_status: site.expected_status,
                    elapsed,
                    error: None,
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                let kind = classify_error(&e);

                error!(
                    "✗ {} - error: {}, elapsed: {}ms",
                    site.url,
                    kind,
                    elapsed.as_millis()
                );

                ProbeOutcome {
                    name: site.name.clone(),
                    url: site.url.clone(),
                    success: false,
                    status_code: None,
                    expected_status: site.expected_status,
                    elapsed,
                    error: Some(kind),
                    timestamp: Utc::now(),
                }
            }
        }
    }

    /// Probe every site concurrently and return one outcome per site, in input order
    pub async fn probe_all(&self, sites: &[SiteConfig]) -> Vec<ProbeOutcome> {
        info!("Probing {} sites", sites.len());

        let outcomes = join_all(sites.iter().map(|site| self.probe(site))).await;

        let success_count = outcomes.iter().filter(|o| o.success).count();
        info!(
            "Probe round finished - succeeded: {}, failed: {}",
            success_count,
            outcomes.len() - success_count
        );

        outcomes
    }
}

/// Map a reqwest error onto the short classification carried by outcomes
pub fn classify_error(err: &reqwest::Error) -> ProbeErrorKind {
    if err.is_timeout() {
        return ProbeErrorKind::Timeout;
    }

    let mut source = err.source();
    let mut innermost = None;
    while let Some(cause) = source {
        if let Some(kind) = classify_cause(cause) {
            return kind;
        }
        innermost = Some(cause);
        source = cause.source();
    }

    match innermost {
        Some(cause) => ProbeErrorKind::Other(format!("{}: {}", err, cause)),
        None => ProbeErrorKind::Other(err.to_string()),
    }
}

/// Classify one link of an error chain, if it says something specific
fn classify_cause(cause: &(dyn StdError + 'static)) -> Option<ProbeErrorKind> {
    if let Some(io_err) = cause.downcast_ref::<io::Error>() {
        match io_err.kind() {
            io::ErrorKind::ConnectionRefused => return Some(ProbeErrorKind::ConnectionRefused),
            io::ErrorKind::TimedOut => return Some(ProbeErrorKind::Timeout),
            _ => {}
        }
    }

    let message = cause.to_string().to_lowercase();
    if message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
    {
        return Some(ProbeErrorKind::DnsFailure);
    }

    if message.contains("connection refused") {
        return Some(ProbeErrorKind::ConnectionRefused);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyProtocol;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// A loopback URL nothing listens on
    async fn refused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/", addr)
    }

    #[test]
    fn test_classify_cause() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(classify_cause(&refused), Some(ProbeErrorKind::ConnectionRefused));

        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify_cause(&timed_out), Some(ProbeErrorKind::Timeout));

        let dns = io::Error::other("failed to lookup address information: Name or service not known");
        assert_eq!(classify_cause(&dns), Some(ProbeErrorKind::DnsFailure));

        let other = io::Error::other("tls handshake eof");
        assert_eq!(classify_cause(&other), None);
    }

    #[test]
    fn test_failure_reason() {
        let mut outcome = ProbeOutcome {
            name: "A".to_string(),
            url: "http://a.example".to_string(),
            success: false,
            status_code: Some(503),
            expected_status: 200,
            elapsed: Duration::from_millis(12),
            error: None,
            timestamp: Utc::now(),
        };
        assert_eq!(
            outcome.failure_reason().unwrap(),
            "unexpected status code 503 (expected 200)"
        );

        outcome.status_code = None;
        outcome.error = Some(ProbeErrorKind::Timeout);
        assert_eq!(outcome.failure_reason().unwrap(), "request timed out");

        outcome.success = true;
        outcome.error = None;
        assert!(outcome.failure_reason().is_none());
    }

    #[tokio::test]
    async fn test_probe_success_and_status_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/teapot"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let prober = SiteProber::new(None).unwrap();

        let ok = prober
            .probe(&SiteConfig::new("ok", format!("{}/ok", server.uri())))
            .await;
        assert!(ok.success);
        assert_eq!(ok.status_code, Some(200));
        assert!(ok.error.is_none());

        let teapot = prober
            .probe(&SiteConfig::new("teapot", format!("{}/teapot", server.uri())))
            .await;
        assert!(!teapot.success);
        assert_eq!(teapot.status_code, Some(418));
        assert!(teapot.error.is_none());

        let expected_teapot = prober
            .probe(
                &SiteConfig::new("teapot", format!("{}/teapot", server.uri()))
                    .with_expected_status(418),
            )
            .await;
        assert!(expected_teapot.success);
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let prober = SiteProber::new(None).unwrap();
        let site = SiteConfig::new("slow", server.uri()).with_timeout(Duration::from_millis(100));

        let outcome = prober.probe(&site).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error, Some(ProbeErrorKind::Timeout));
        assert!(outcome.elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_probe_connection_refused() {
        let prober = SiteProber::new(None).unwrap();
        let site = SiteConfig::new("closed", refused_url().await);

        let outcome = prober.probe(&site).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error, Some(ProbeErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_probe_all_keeps_every_outcome() {
        let server = MockServer::start().await;
        for ok_path in ["/a", "/b", "/c"] {
            Mock::given(method("GET"))
                .and(path(ok_path))
                .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sites = vec![
            SiteConfig::new("a", format!("{}/a", server.uri())),
            SiteConfig::new("broken", format!("{}/broken", server.uri())),
            SiteConfig::new("b", format!("{}/b", server.uri())),
            SiteConfig::new("closed", refused_url().await),
            SiteConfig::new("c", format!("{}/c", server.uri())),
        ];

        let prober = SiteProber::new(None).unwrap();
        let outcomes = prober.probe_all(&sites).await;

        assert_eq!(outcomes.len(), 5);
        let by_name: Vec<(&str, bool)> = outcomes
            .iter()
            .map(|o| (o.name.as_str(), o.success))
            .collect();
        assert_eq!(
            by_name,
            vec![
                ("a", true),
                ("broken", false),
                ("b", true),
                ("closed", false),
                ("c", true),
            ]
        );
        assert_eq!(outcomes[1].status_code, Some(500));
        assert_eq!(outcomes[3].error, Some(ProbeErrorKind::ConnectionRefused));
    }

    #[tokio::test]
    async fn test_enabled_proxy_forwards_requests() {
        let proxy_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&proxy_server)
            .await;

        let proxy = ProxyConfig {
            enabled: true,
            host: proxy_server.address().ip().to_string(),
            port: proxy_server.address().port(),
            protocol: ProxyProtocol::Http,
        };
        let prober = SiteProber::new(Some(&proxy)).unwrap();
        let site = SiteConfig::new("via-proxy", "http://example.invalid/")
            .with_timeout(Duration::from_secs(5))
            .with_expected_status(204);

        let outcome = prober.probe(&site).await;
        assert_eq!(outcome.status_code, Some(204));
        assert!(outcome.success);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_environment_proxy_is_ignored() {
        let env_proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(0)
            .mount(&env_proxy)
            .await;

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/direct"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Every other client in this crate disables proxies, so the variable only matters here.
        unsafe { std::env::set_var("HTTP_PROXY", env_proxy.uri()) };
        let prober = SiteProber::new(None).unwrap();
        let outcome = prober
            .probe(&SiteConfig::new("direct", format!("{}/direct", server.uri())))
            .await;
        unsafe { std::env::remove_var("HTTP_PROXY") };

        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let prober = SiteProber::new(None).unwrap();
        let site = SiteConfig::new("nowhere", "http://nonexistent.invalid/")
            .with_timeout(Duration::from_secs(5));

        let outcome = prober.probe(&site).await;
        assert!(!outcome.success);
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.error, Some(ProbeErrorKind::DnsFailure));
    }
}
