//! HTTP client construction shared by the prober, the Clash client and the notifier

use crate::config::ProxyConfig;
use crate::errors::{ProberError, Result};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;
use tracing::debug;

fn base_builder() -> ClientBuilder {
    Client::builder().user_agent(format!("site_prober/{}", env!("CARGO_PKG_VERSION")))
}

/// Build the client used for site probes.
///
/// With an enabled proxy every request (http and https) is tunnelled through it.
/// Without one, proxying is switched off entirely so `HTTP_PROXY`-style
/// environment variables are never picked up. Timeouts are set per request.
pub fn probe_client(proxy: Option<&ProxyConfig>) -> Result<Client> {
    let builder = match proxy.filter(|p| p.enabled) {
        Some(proxy) => {
            let proxy_url = proxy.url();
            debug!("Probe client routed through proxy {}", proxy_url);
            base_builder().proxy(Proxy::all(&proxy_url).map_err(|e| {
                ProberError::Config(format!("invalid proxy url {}: {}", proxy_url, e))
            })?)
        }
        None => base_builder().no_proxy(),
    };

    builder.build().map_err(ProberError::Http)
}

/// Build a direct client with a fixed timeout for API and webhook calls
pub fn api_client(timeout: Duration) -> Result<Client> {
    base_builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(ProberError::Http)
}

/// Headers for the management API, with `Authorization: Bearer` when a secret is set
pub fn auth_headers(secret: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        match HeaderValue::from_str(&format!("Bearer {}", secret)) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => debug!("Bearer secret contains characters not allowed in a header, skipping"),
        }
    }

    headers
}
