//! Webhook notifications for failing and recovered sites
//!
//! Cards are sent as Feishu template messages: the card layout lives in the
//! template referenced by `templateId`/`templateVersion`, this module only
//! fills in its variables.

use crate::config::FeishuConfig;
use crate::errors::{ProberError, Result};
use crate::transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Shanghai;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Timeout for one webhook delivery
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Error text shown on recovery cards
pub const RECOVERED_TEXT: &str = "已恢复正常";

/// Sink for failure and recovery events.
///
/// Both calls report whether the remote end acknowledged the event and never fail.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Whether events are delivered at all
    fn is_enabled(&self) -> bool;

    async fn notify_failure(
        &self,
        site_name: &str,
        url: &str,
        failure_count: u32,
        last_error: &str,
        node: &str,
    ) -> bool;

    async fn notify_recovery(&self, site_name: &str, url: &str, node: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Failure,
    Recovery,
}

impl EventKind {
    /// `result_status` value the card template expects
    pub fn result_status(&self) -> &'static str {
        match self {
            EventKind::Failure => "失败",
            EventKind::Recovery => "恢复",
        }
    }

    pub fn theme(&self) -> &'static str {
        match self {
            EventKind::Failure => "red",
            EventKind::Recovery => "green",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMessage {
    pub msg_type: String,
    pub card: Card,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: CardData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardData {
    pub template_id: String,
    pub template_version_name: String,
    pub template_variable: CardVariables,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardVariables {
    pub result_status: String,
    pub result_theme: String,
    pub site: String,
    pub site_name: String,
    pub error: String,
    pub proxy: String,
    pub origin: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
struct WebhookAck {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

/// Card timestamp in Asia/Shanghai local time, e.g. `2025/01/31 08:05:09`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Shanghai)
        .format("%Y/%m/%d %H:%M:%S")
        .to_string()
}

/// Notifier posting template cards to a Feishu bot webhook
#[derive(Debug, Clone)]
pub struct FeishuNotifier {
    client: Client,
    config: FeishuConfig,
}

impl FeishuNotifier {
    pub fn new(config: FeishuConfig) -> Result<Self> {
        let client = transport::api_client(WEBHOOK_TIMEOUT)?;
        Ok(Self { client, config })
    }

    /// Build the card payload for one event
    pub fn build_card(
        &self,
        kind: EventKind,
        site_name: &str,
        url: &str,
        error: &str,
        node: &str,
        at: DateTime<Utc>,
    ) -> CardMessage {
        CardMessage {
            msg_type: "interactive".to_string(),
            card: Card {
                kind: "template".to_string(),
                data: CardData {
                    template_id: self.config.template_id.clone(),
                    template_version_name: self.config.template_version.clone(),
                    template_variable: CardVariables {
                        result_status: kind.result_status().to_string(),
                        result_theme: kind.theme().to_string(),
                        site: url.to_string(),
                        site_name: site_name.to_string(),
                        error: error.to_string(),
                        proxy: node.to_string(),
                        origin: self.config.origin.clone(),
                        time: format_timestamp(at),
                    },
                },
            },
        }
    }

    async fn send_card(
        &self,
        kind: EventKind,
        site_name: &str,
        url: &str,
        error: &str,
        node: &str,
    ) -> bool {
        if !self.config.enabled {
            info!("Notifications disabled, skipping {:?} card for {}", kind, site_name);
            return false;
        }

        let card = self.build_card(kind, site_name, url, error, node, Utc::now());
        info!("Sending card notification: {} - {}", site_name, kind.result_status());

        match self.post(&card).await {
            Ok(()) => {
                info!("✓ Card notification delivered for {}", site_name);
                true
            }
            Err(e) => {
                error!("✗ Card notification for {} failed: {}", site_name, e);
                false
            }
        }
    }

    async fn post(&self, card: &CardMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.config.webhook)
            .json(card)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let ack: WebhookAck = serde_json::from_str(&body).map_err(|_| {
            ProberError::Transport(format!("unexpected webhook response ({}): {}", status, body))
        })?;

        if ack.code == 0 {
            Ok(())
        } else {
            Err(ProberError::Transport(format!(
                "webhook rejected card with code {}: {}",
                ack.code,
                ack.msg.unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl Notifier for FeishuNotifier {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn notify_failure(
        &self,
        site_name: &str,
        url: &str,
        failure_count: u32,
        last_error: &str,
        node: &str,
    ) -> bool {
        let error = if last_error.is_empty() {
            format!("failed {} consecutive times", failure_count)
        } else {
            last_error.to_string()
        };

        self.send_card(EventKind::Failure, site_name, url, &error, node)
            .await
    }

    async fn notify_recovery(&self, site_name: &str, url: &str, node: &str) -> bool {
        self.send_card(EventKind::Recovery, site_name, url, RECOVERED_TEXT, node)
            .await
    }
}
