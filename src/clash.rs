//! Clash management API client, used to name the upstream node in notifications

use crate::config::ClashConfig;
use crate::errors::{ProberError, Result};
use crate::transport;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node name reported whenever the active node cannot be determined
pub const UNKNOWN_NODE: &str = "unknown";

/// Timeout for every management API call
pub const API_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the built-in global selector group
const GLOBAL_GROUP: &str = "GLOBAL";

/// Group names that denote the outbound traffic selector
fn selector_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)国外流量|节点选择|proxy").unwrap())
}

#[derive(Debug, Deserialize)]
struct ProxiesResponse {
    #[serde(default)]
    proxies: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: Option<String>,
}

/// Resolves the node the proxy is currently routing through
#[derive(Debug, Clone)]
pub struct NodeResolver {
    client: Option<Client>,
    config: Option<ClashConfig>,
}

impl NodeResolver {
    /// Create a resolver. A missing or disabled config yields a resolver that
    /// never performs network I/O.
    pub fn new(config: Option<&ClashConfig>) -> Result<Self> {
        let config = config.filter(|c| c.enabled).cloned();
        let client = match config {
            Some(_) => Some(transport::api_client(API_TIMEOUT)?),
            None => None,
        };

        Ok(Self { client, config })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Name of the currently selected node, or [`UNKNOWN_NODE`]. Never fails.
    pub async fn current_node(&self) -> String {
        let (Some(client), Some(config)) = (&self.client, &self.config) else {
            return UNKNOWN_NODE.to_string();
        };

        match fetch_proxies(client, config).await {
            Ok(proxies) => {
                let node = select_node(&proxies).unwrap_or_else(|| UNKNOWN_NODE.to_string());
                debug!("Current Clash node: {}", node);
                node
            }
            Err(e) => {
                warn!("Failed to resolve current Clash node: {}", e);
                UNKNOWN_NODE.to_string()
            }
        }
    }

    /// One-shot reachability check against the version endpoint
    pub async fn test_connection(&self) -> bool {
        let (Some(client), Some(config)) = (&self.client, &self.config) else {
            return false;
        };

        let url = config.endpoint("version");
        let result = async {
            let response = client
                .get(&url)
                .headers(transport::auth_headers(config.secret.as_deref()))
                .send()
                .await?
                .error_for_status()?;
            let version: VersionResponse = response.json().await?;
            Ok::<_, ProberError>(version)
        }
        .await;

        match result {
            Ok(version) => {
                info!(
                    "✓ Clash API reachable at {} (version {})",
                    config.api_url,
                    version.version.as_deref().unwrap_or(UNKNOWN_NODE)
                );
                true
            }
            Err(e) => {
                warn!("✗ Clash API connection failed: {}", e);
                false
            }
        }
    }
}

async fn fetch_proxies(client: &Client, config: &ClashConfig) -> Result<Map<String, Value>> {
    let response = client
        .get(config.endpoint("proxies"))
        .headers(transport::auth_headers(config.secret.as_deref()))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProberError::Transport(format!(
            "proxies endpoint answered with status {}",
            status
        )));
    }

    let body: ProxiesResponse = response.json().await?;
    Ok(body.proxies)
}

/// Pick the active node out of the group listing.
///
/// Priority: a group whose name matches the selector pattern, then `GLOBAL`,
/// then the first group that has a selection. Groups without a non-empty
/// `now` are skipped at every step.
pub fn select_node(proxies: &Map<String, Value>) -> Option<String> {
    let selected = |group: &Value| {
        group
            .get("now")
            .and_then(Value::as_str)
            .filter(|now| !now.is_empty())
            .map(str::to_string)
    };

    let pattern = selector_pattern();
    proxies
        .iter()
        .filter(|(name, _)| pattern.is_match(name))
        .find_map(|(_, group)| selected(group))
        .or_else(|| proxies.get(GLOBAL_GROUP).and_then(selected))
        .or_else(|| proxies.values().find_map(selected))
}
