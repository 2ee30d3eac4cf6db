//! Probe cycle orchestration: fan out probes, update state, notify, summarize

use crate::clash::NodeResolver;
use crate::config::{Config, SiteConfig};
use crate::errors::Result;
use crate::notifier::{FeishuNotifier, Notifier};
use crate::probe::SiteProber;
use crate::tracker::{Notification, SiteStatus, StatusSummary, StatusTracker};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Runs probe cycles over the configured sites and owns their status
pub struct SiteMonitor {
    sites: Vec<SiteConfig>,
    prober: SiteProber,
    resolver: NodeResolver,
    notifier: Arc<dyn Notifier>,
    tracker: StatusTracker,
    cycles: u64,
}

impl SiteMonitor {
    /// Build a monitor with the webhook notifier described by the config
    pub fn new(config: &Config) -> Result<Self> {
        let notifier = Arc::new(FeishuNotifier::new(config.feishu.clone())?);
        Self::with_notifier(config, notifier)
    }

    /// Build a monitor delivering notifications through `notifier`
    pub fn with_notifier(config: &Config, notifier: Arc<dyn Notifier>) -> Result<Self> {
        Ok(Self {
            sites: config.sites.clone(),
            prober: SiteProber::new(config.proxy.as_ref())?,
            resolver: NodeResolver::new(config.clash.as_ref())?,
            notifier,
            tracker: StatusTracker::new(&config.sites, config.failure_threshold()),
            cycles: 0,
        })
    }

    pub fn resolver(&self) -> &NodeResolver {
        &self.resolver
    }

    pub fn status(&self, url: &str) -> Option<&SiteStatus> {
        self.tracker.status(url)
    }

    pub fn statuses(&self) -> &[SiteStatus] {
        self.tracker.statuses()
    }

    /// Number of cycles completed so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run one probe cycle and return the resulting summary
    #[instrument(skip(self), fields(cycle = self.cycles + 1))]
    pub async fn run_cycle(&mut self) -> StatusSummary {
        info!("Starting probe cycle");

        let outcomes = self.prober.probe_all(&self.sites).await;
        let node = self.resolver.current_node().await;

        let notifications: Vec<Notification> = outcomes
            .iter()
            .filter_map(|outcome| self.tracker.record(outcome))
            .collect();

        if !notifications.is_empty() {
            let delivered = join_all(
                notifications
                    .iter()
                    .map(|notification| self.dispatch(notification, &node)),
            )
            .await;

            for (notification, delivered) in notifications.iter().zip(delivered) {
                if delivered && matches!(notification, Notification::Failure { .. }) {
                    self.tracker.mark_alert_sent(notification.url());
                }
            }
        }

        self.cycles += 1;

        let summary = self.tracker.summary();
        log_summary(&summary);
        info!("Probe cycle finished");
        summary
    }

    async fn dispatch(&self, notification: &Notification, node: &str) -> bool {
        if !self.notifier.is_enabled() {
            debug!(
                "Notifications disabled, nothing sent for {}",
                notification.url()
            );
            return false;
        }

        match notification {
            Notification::Failure {
                site_name,
                url,
                consecutive_failures,
                last_error,
            } => {
                warn!("Sending failure alert for {}", site_name);
                let sent = self
                    .notifier
                    .notify_failure(site_name, url, *consecutive_failures, last_error, node)
                    .await;
                if !sent {
                    error!(
                        "Failure alert for {} was not delivered, retrying next cycle",
                        site_name
                    );
                }
                sent
            }
            Notification::Recovery { site_name, url } => {
                info!("Sending recovery notice for {}", site_name);
                let sent = self.notifier.notify_recovery(site_name, url, node).await;
                if !sent {
                    error!("Recovery notice for {} was not delivered", site_name);
                }
                sent
            }
        }
    }
}

fn log_summary(summary: &StatusSummary) {
    info!(
        "Status summary - total: {}, healthy: {}, failing: {}, alerting: {}",
        summary.total, summary.healthy, summary.failing, summary.alerting
    );

    for site in &summary.unhealthy {
        info!(
            "  - {} ({}): {} consecutive failures [{}]",
            site.url, site.name, site.consecutive_failures, site.state
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeishuConfig;
    use crate::tracker::SiteState;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Failure(String, u32),
        Recovery(String),
    }

    /// Records every call; delivery succeeds while `accept` is set
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Sent>>,
        accept: AtomicBool,
        disabled: AtomicBool,
    }

    impl RecordingNotifier {
        fn accepting(accept: bool) -> Arc<Self> {
            let notifier = Self::default();
            notifier.accept.store(accept, Ordering::SeqCst);
            Arc::new(notifier)
        }

        fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn is_enabled(&self) -> bool {
            !self.disabled.load(Ordering::SeqCst)
        }

        async fn notify_failure(
            &self,
            site_name: &str,
            _url: &str,
            count: u32,
            _last_error: &str,
            _node: &str,
        ) -> bool {
            self.sent.lock().unwrap().push(Sent::Failure(site_name.to_string(), count));
            self.accept.load(Ordering::SeqCst)
        }

        async fn notify_recovery(&self, site_name: &str, _url: &str, _node: &str) -> bool {
            self.sent.lock().unwrap().push(Sent::Recovery(site_name.to_string()));
            self.accept.load(Ordering::SeqCst)
        }
    }

    fn config(server: &MockServer, threshold: u32) -> Config {
        Config {
            interval: 1,
            proxy: None,
            clash: None,
            sites: vec![
                SiteConfig::new("up", format!("{}/up", server.uri())),
                SiteConfig::new("flaky", format!("{}/flaky", server.uri())),
            ],
            feishu: FeishuConfig {
                failure_threshold: threshold,
                ..FeishuConfig::default()
            },
        }
    }

    async fn mount(server: &MockServer, route: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_alert_and_recovery_through_cycles() {
        let server = MockServer::start().await;
        mount(&server, "/up", 200).await;
        mount(&server, "/flaky", 500).await;

        let notifier = RecordingNotifier::accepting(true);
        let config = config(&server, 2);
        let mut monitor = SiteMonitor::with_notifier(&config, notifier.clone()).unwrap();
        let flaky_url = config.sites[1].url.clone();

        let summary = monitor.run_cycle().await;
        assert_eq!(summary.failing, 1);
        assert_eq!(summary.alerting, 0);
        assert!(notifier.take().is_empty());

        let summary = monitor.run_cycle().await;
        assert_eq!(summary.alerting, 1);
        assert_eq!(notifier.take(), vec![Sent::Failure("flaky".to_string(), 2)]);
        assert_eq!(
            monitor.status(&flaky_url).unwrap().state(2),
            SiteState::AlertSent
        );

        monitor.run_cycle().await;
        assert!(notifier.take().is_empty());

        server.reset().await;
        mount(&server, "/up", 200).await;
        mount(&server, "/flaky", 200).await;

        let summary = monitor.run_cycle().await;
        assert_eq!(summary.healthy, 2);
        assert_eq!(notifier.take(), vec![Sent::Recovery("flaky".to_string())]);
        assert_eq!(monitor.status(&flaky_url).unwrap().consecutive_failures, 0);
        assert_eq!(monitor.cycles(), 4);
    }

    #[tokio::test]
    async fn test_undelivered_alert_is_retried() {
        let server = MockServer::start().await;
        mount(&server, "/up", 200).await;
        mount(&server, "/flaky", 503).await;

        let notifier = RecordingNotifier::accepting(false);
        let mut monitor = SiteMonitor::with_notifier(&config(&server, 1), notifier.clone()).unwrap();

        monitor.run_cycle().await;
        assert_eq!(notifier.take(), vec![Sent::Failure("flaky".to_string(), 1)]);

        notifier.accept.store(true, Ordering::SeqCst);
        monitor.run_cycle().await;
        assert_eq!(notifier.take(), vec![Sent::Failure("flaky".to_string(), 2)]);

        monitor.run_cycle().await;
        assert!(notifier.take().is_empty());
        assert!(monitor.statuses()[1].notification_sent);
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_never_called() {
        let server = MockServer::start().await;
        mount(&server, "/up", 200).await;
        mount(&server, "/flaky", 500).await;

        let notifier = RecordingNotifier::accepting(true);
        notifier.disabled.store(true, Ordering::SeqCst);
        let config = config(&server, 1);
        let mut monitor = SiteMonitor::with_notifier(&config, notifier.clone()).unwrap();

        let summary = monitor.run_cycle().await;
        monitor.run_cycle().await;

        assert!(notifier.take().is_empty());
        assert_eq!(summary.alerting, 1);
        assert_eq!(
            monitor.status(&config.sites[1].url).unwrap().state(1),
            SiteState::AlertPending
        );
    }
}
