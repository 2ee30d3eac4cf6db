//! Site Prober Library
//!
//! This library periodically probes a set of HTTP sites, optionally through a
//! forward proxy, tracks consecutive failures per site and sends webhook cards
//! when a site crosses the failure threshold and when it recovers.

pub mod config;
pub mod errors;
pub mod transport;
pub mod probe;
pub mod clash;
pub mod tracker;
pub mod notifier;
pub mod monitor;
pub mod scheduler;

pub use config::{Config, SiteConfig, ProxyConfig, ClashConfig, FeishuConfig};
pub use errors::{ProberError, Result};
pub use probe::{SiteProber, ProbeOutcome, ProbeErrorKind};
pub use clash::{NodeResolver, UNKNOWN_NODE};
pub use tracker::{StatusTracker, SiteStatus, SiteState, StatusSummary, Notification};
pub use notifier::{Notifier, FeishuNotifier};
pub use monitor::SiteMonitor;
pub use scheduler::{Scheduler, SchedulerHandle, CycleRunner};
