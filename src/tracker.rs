//! Per-site failure tracking and the alert/recovery decision

use crate::config::SiteConfig;
use crate::probe::ProbeOutcome;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// Health of a site derived from its failure streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteState {
    /// No failures since the last success
    Healthy,
    /// Failing, still below the threshold
    Degraded,
    /// At or above the threshold, alert not delivered yet
    AlertPending,
    /// At or above the threshold, alert delivered
    AlertSent,
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteState::Healthy => write!(f, "healthy"),
            SiteState::Degraded => write!(f, "degraded"),
            SiteState::AlertPending => write!(f, "alert pending"),
            SiteState::AlertSent => write!(f, "alerted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteStatus {
    pub url: String,
    pub name: String,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    /// Set only while an alert for the current failure streak has been delivered
    pub notification_sent: bool,
}

impl SiteStatus {
    fn new(site: &SiteConfig) -> Self {
        Self {
            url: site.url.clone(),
            name: site.name.clone(),
            consecutive_failures: 0,
            last_failure: None,
            last_success: None,
            notification_sent: false,
        }
    }

    pub fn state(&self, threshold: u32) -> SiteState {
        match self.consecutive_failures {
            0 => SiteState::Healthy,
            n if n < threshold => SiteState::Degraded,
            _ if self.notification_sent => SiteState::AlertSent,
            _ => SiteState::AlertPending,
        }
    }
}

/// Notification the tracker wants delivered after a state update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Failure {
        site_name: String,
        url: String,
        consecutive_failures: u32,
        last_error: String,
    },
    Recovery {
        site_name: String,
        url: String,
    },
}

impl Notification {
    pub fn url(&self) -> &str {
        match self {
            Notification::Failure { url, .. } | Notification::Recovery { url, .. } => url,
        }
    }
}

/// Snapshot of one site that is not healthy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhealthySite {
    pub name: String,
    pub url: String,
    pub consecutive_failures: u32,
    pub state: SiteState,
}

/// Cycle summary over all tracked sites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub total: usize,
    pub healthy: usize,
    /// Sites with at least one failure, alerting ones included
    pub failing: usize,
    pub alerting: usize,
    pub unhealthy: Vec<UnhealthySite>,
}

/// Owns one `SiteStatus` per configured site URL.
///
/// The set of sites is fixed at construction. Updates are applied from a
/// single task after a probe round completes, so no locking is involved.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    threshold: u32,
    statuses: Vec<SiteStatus>,
    index: HashMap<String, usize>,
}

impl StatusTracker {
    pub fn new(sites: &[SiteConfig], threshold: u32) -> Self {
        let mut statuses = Vec::with_capacity(sites.len());
        let mut index = HashMap::with_capacity(sites.len());

        for site in sites {
            if index.contains_key(&site.url) {
                continue;
            }
            index.insert(site.url.clone(), statuses.len());
            statuses.push(SiteStatus::new(site));
        }

        Self {
            threshold: threshold.max(1),
            statuses,
            index,
        }
    }

    pub fn status(&self, url: &str) -> Option<&SiteStatus> {
        self.index.get(url).map(|&i| &self.statuses[i])
    }

    /// All statuses in configuration order
    pub fn statuses(&self) -> &[SiteStatus] {
        &self.statuses
    }

    /// Apply one probe outcome and decide whether a notification is due
    pub fn record(&mut self, outcome: &ProbeOutcome) -> Option<Notification> {
        let threshold = self.threshold;
        let Some(&i) = self.index.get(&outcome.url) else {
            warn!("Ignoring probe outcome for untracked site {}", outcome.url);
            return None;
        };
        let status = &mut self.statuses[i];

        if outcome.success {
            let recovered = status.consecutive_failures >= threshold && status.notification_sent;
            if recovered {
                info!(
                    "Site {} recovered after {} consecutive failures",
                    outcome.name, status.consecutive_failures
                );
            }

            status.consecutive_failures = 0;
            status.notification_sent = false;
            status.last_success = Some(outcome.timestamp);

            return recovered.then(|| Notification::Recovery {
                site_name: outcome.name.clone(),
                url: outcome.url.clone(),
            });
        }

        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.last_failure = Some(outcome.timestamp);

        warn!(
            "Site {} failed {} consecutive times",
            outcome.name, status.consecutive_failures
        );

        if status.consecutive_failures < threshold || status.notification_sent {
            return None;
        }

        warn!("Site {} reached the alert threshold", outcome.name);

        let last_error = outcome
            .failure_reason()
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| format!("failed {} consecutive times", status.consecutive_failures));

        Some(Notification::Failure {
            site_name: outcome.name.clone(),
            url: outcome.url.clone(),
            consecutive_failures: status.consecutive_failures,
            last_error,
        })
    }

    /// Record that the alert for a site's current streak was delivered.
    ///
    /// Has no effect unless the site is still at or above the threshold.
    pub fn mark_alert_sent(&mut self, url: &str) -> bool {
        let threshold = self.threshold;
        match self.index.get(url).map(|&i| &mut self.statuses[i]) {
            Some(status) if status.consecutive_failures >= threshold => {
                status.notification_sent = true;
                true
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> StatusSummary {
        let unhealthy: Vec<UnhealthySite> = self
            .statuses
            .iter()
            .filter(|s| s.consecutive_failures > 0)
            .map(|s| UnhealthySite {
                name: s.name.clone(),
                url: s.url.clone(),
                consecutive_failures: s.consecutive_failures,
                state: s.state(self.threshold),
            })
            .collect();

        let alerting = unhealthy
            .iter()
            .filter(|s| s.consecutive_failures >= self.threshold)
            .count();

        StatusSummary {
            total: self.statuses.len(),
            healthy: self.statuses.len() - unhealthy.len(),
            failing: unhealthy.len(),
            alerting,
            unhealthy,
        }
    }
}
