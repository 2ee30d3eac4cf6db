//! Configuration loading and validation for the site prober

use crate::errors::{ProberError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default per-site request timeout in milliseconds
pub const DEFAULT_SITE_TIMEOUT_MS: u64 = 10_000;

/// Default status code a probed site must answer with
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Default number of consecutive failures before an alert is sent
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Seconds between two probe cycles
    #[serde(default)]
    pub interval: i64,

    /// Forward proxy every probe is routed through
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Proxy-management API used to resolve the active upstream node
    #[serde(default)]
    pub clash: Option<ClashConfig>,

    /// Sites to probe, identified by URL
    #[serde(default)]
    pub sites: Vec<SiteConfig>,

    /// Webhook notifications and the alert threshold
    #[serde(default)]
    pub feishu: FeishuConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_site_timeout")]
    pub timeout: u64,

    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    #[default]
    Http,
    Https,
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyProtocol::Http => write!(f, "http"),
            ProxyProtocol::Https => write!(f, "https"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub protocol: ProxyProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClashConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the management API, e.g. `http://127.0.0.1:9090`
    #[serde(default)]
    pub api_url: String,

    /// Bearer secret, sent as `Authorization: Bearer <secret>`
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeishuConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub webhook: String,

    /// Consecutive failures that put a site into the alerting state
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub template_id: String,

    #[serde(default)]
    pub template_version: String,

    /// Free-form tag identifying this prober instance in cards
    #[serde(default)]
    pub origin: String,
}

fn default_site_timeout() -> u64 {
    DEFAULT_SITE_TIMEOUT_MS
}

fn default_expected_status() -> u16 {
    DEFAULT_EXPECTED_STATUS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook: String::new(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            template_id: String::new(),
            template_version: String::new(),
            origin: String::new(),
        }
    }
}

impl SiteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout: DEFAULT_SITE_TIMEOUT_MS,
            expected_status: DEFAULT_EXPECTED_STATUS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_millis() as u64;
        self
    }

    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = status;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl ProxyConfig {
    /// Proxy URL in the form reqwest expects, e.g. `http://127.0.0.1:7890`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl ClashConfig {
    /// Join an API path onto the configured base URL
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl Config {
    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ProberError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate().map_err(ProberError::Config)?;
        Ok(config)
    }

    /// Time between two cycles. Only meaningful after `validate` succeeded.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1) as u64)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.feishu.failure_threshold
    }

    /// The forward proxy, if one is configured and enabled
    pub fn active_proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref().filter(|p| p.enabled)
    }

    /// The upstream API settings, if configured and enabled
    pub fn active_clash(&self) -> Option<&ClashConfig> {
        self.clash.as_ref().filter(|c| c.enabled)
    }

    /// Validate the configuration, reporting every problem found
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut problems = Vec::new();

        if self.interval <= 0 {
            problems.push("interval must be greater than 0".to_string());
        }

        if self.sites.is_empty() {
            problems.push("at least one site must be configured".to_string());
        }

        let mut seen_urls = HashSet::new();
        for (index, site) in self.sites.iter().enumerate() {
            let label = if site.name.is_empty() {
                format!("sites[{}]", index)
            } else {
                format!("sites[{}] ({})", index, site.name)
            };

            if site.name.trim().is_empty() {
                problems.push(format!("{}: name cannot be empty", label));
            }

            if site.url.trim().is_empty() {
                problems.push(format!("{}: url cannot be empty", label));
            } else if !is_http_url(&site.url) {
                problems.push(format!(
                    "{}: invalid url '{}', must start with http:// or https://",
                    label, site.url
                ));
            } else if !seen_urls.insert(site.url.as_str()) {
                problems.push(format!("{}: duplicate url '{}'", label, site.url));
            }

            if site.timeout == 0 {
                problems.push(format!("{}: timeout must be greater than 0", label));
            }

            if !(100..=599).contains(&site.expected_status) {
                problems.push(format!(
                    "{}: expectedStatus {} is not a valid HTTP status code",
                    label, site.expected_status
                ));
            }
        }

        if self.feishu.failure_threshold == 0 {
            problems.push("feishu.failureThreshold must be at least 1".to_string());
        }

        if self.feishu.enabled {
            let required = [
                ("webhook", &self.feishu.webhook),
                ("templateId", &self.feishu.template_id),
                ("templateVersion", &self.feishu.template_version),
                ("origin", &self.feishu.origin),
            ];
            for (field, value) in required {
                if value.trim().is_empty() {
                    problems.push(format!(
                        "feishu.{} is required when notifications are enabled",
                        field
                    ));
                }
            }
        }

        if let Some(clash) = self.active_clash() {
            if clash.api_url.trim().is_empty() {
                problems.push("clash.apiUrl is required when the Clash API is enabled".to_string());
            } else if !is_http_url(&clash.api_url) {
                problems.push(format!(
                    "clash.apiUrl '{}' must start with http:// or https://",
                    clash.api_url
                ));
            }
        }

        if let Some(proxy) = self.active_proxy() {
            if proxy.host.trim().is_empty() {
                problems.push("proxy.host is required when the proxy is enabled".to_string());
            }
            if proxy.port == 0 {
                problems.push("proxy.port is required when the proxy is enabled".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
