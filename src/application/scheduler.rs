//! RelayScheduler - Background service that decides when the relay runs.
//!
//! Two triggers wake the relay:
//! 1. **Notifications** from the store's insert trigger (low latency, best effort)
//! 2. **A fixed poll interval** (guarantees pickup when notifications are lost
//!    or disabled, and catches rows whose backoff has elapsed)
//!
//! Every wake-up runs a drain: up to `workers` concurrent loops, each calling
//! [`OutboxRelay::process_next`] until the store has no eligible row.
//!
//! ## Configuration
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `poll_interval` | 15s | Fallback wake-up period |
//! | `workers` | 1 | Concurrent claim loops per drain |
//! | `notify_channel` | `outbox_events` | Channel passed to the notifier |
//! | `reconnect_delay` | 5s | Wait before re-subscribing after a lost stream |
//!
//! ## Graceful Shutdown
//!
//! Once the shutdown signal flips, no worker issues another claim. Publishes
//! already in flight finish and finalize before the drain returns.

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::domain::foundation::DomainError;
use crate::ports::{ChangeNotification, ChangeNotifier, NotificationStream};

use super::relay::{OutboxRelay, RelayOutcome};

/// Configuration for the RelayScheduler service.
#[derive(Debug, Clone)]
pub struct RelaySchedulerConfig {
    /// Fallback wake-up period.
    pub poll_interval: Duration,

    /// Concurrent claim loops per drain (at least one).
    pub workers: usize,

    /// Channel name handed to the change notifier.
    pub notify_channel: String,

    /// Delay before re-subscribing after the notification stream ends.
    pub reconnect_delay: Duration,
}

impl Default for RelaySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            workers: 1,
            notify_channel: "outbox_events".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl RelaySchedulerConfig {
    /// Create config with custom poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create config with a custom worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_notify_channel(mut self, channel: impl Into<String>) -> Self {
        self.notify_channel = channel.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Rows handled by one drain, by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
}

impl DrainStats {
    pub fn processed(&self) -> usize {
        self.published + self.retried + self.failed
    }

    fn record(&mut self, outcome: &RelayOutcome) {
        match outcome {
            RelayOutcome::Idle => {}
            RelayOutcome::Published { .. } => self.published += 1,
            RelayOutcome::Retried { .. } => self.retried += 1,
            RelayOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

impl AddAssign for DrainStats {
    fn add_assign(&mut self, other: Self) {
        self.published += other.published;
        self.retried += other.retried;
        self.failed += other.failed;
    }
}

/// Background service that wakes the relay on notifications and on a timer.
///
/// Without a notifier the scheduler polls only; every delivery guarantee
/// still holds, pickup latency is bounded by the poll interval instead.
pub struct RelayScheduler {
    relay: Arc<OutboxRelay>,
    notifier: Option<Arc<dyn ChangeNotifier>>,
    config: RelaySchedulerConfig,
}

impl RelayScheduler {
    /// Create a poll-only scheduler with default configuration.
    pub fn new(relay: Arc<OutboxRelay>) -> Self {
        Self {
            relay,
            notifier: None,
            config: RelaySchedulerConfig::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_config(mut self, config: RelaySchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until the shutdown signal is received.
    ///
    /// Drain failures are logged and retried on the next trigger; they never
    /// stop the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        info!(
            workers = self.config.workers,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            notifications = self.notifier.is_some(),
            "Relay scheduler started"
        );

        let mut poll = time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut notifications: Option<NotificationStream> = None;
        let mut resubscribe_at: Option<Instant> = self.notifier.as_ref().map(|_| Instant::now());

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                item = next_notification(&mut notifications), if notifications.is_some() => {
                    match item {
                        Some(Ok(notification)) => {
                            debug!(
                                outbox_id = %notification.id,
                                shard = ?notification.shard,
                                "Outbox notification received"
                            );
                            self.drain_logged(&shutdown, "notification").await;
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "Outbox notification stream failed, resubscribing");
                            notifications = None;
                            resubscribe_at = Some(Instant::now() + self.config.reconnect_delay);
                        }
                        None => {
                            warn!("Outbox notification stream closed, resubscribing");
                            notifications = None;
                            resubscribe_at = Some(Instant::now() + self.config.reconnect_delay);
                        }
                    }
                }

                _ = time::sleep_until(resubscribe_at.unwrap_or_else(Instant::now)),
                    if resubscribe_at.is_some() =>
                {
                    resubscribe_at = None;
                    match self.subscribe().await {
                        Ok(stream) => {
                            info!(
                                channel = %self.config.notify_channel,
                                "Subscribed to outbox notifications"
                            );
                            notifications = Some(stream);
                            // Rows committed before LISTEN took effect raised no notification.
                            self.drain_logged(&shutdown, "subscribe").await;
                        }
                        Err(err) => {
                            warn!(
                                error = %err,
                                retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                                "Outbox notification subscribe failed"
                            );
                            resubscribe_at = Some(Instant::now() + self.config.reconnect_delay);
                        }
                    }
                }

                _ = poll.tick() => {
                    self.drain_logged(&shutdown, "poll").await;
                }
            }
        }

        info!("Relay scheduler stopped");
        Ok(())
    }

    /// Run concurrent claim loops until no row is eligible.
    ///
    /// Each worker checks the shutdown flag before every claim. If a worker
    /// hits a storage error it stops; the others finish and the first error is
    /// returned.
    pub async fn drain(&self, shutdown: &watch::Receiver<bool>) -> Result<DrainStats, DomainError> {
        let mut workers: FuturesUnordered<_> = (0..self.config.workers.max(1))
            .map(|_| self.worker_loop(shutdown.clone()))
            .collect();

        let mut stats = DrainStats::default();
        let mut first_error = None;

        while let Some(result) = workers.next().await {
            match result {
                Ok(worker_stats) => stats += worker_stats,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }

    async fn worker_loop(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<DrainStats, DomainError> {
        let mut stats = DrainStats::default();
        loop {
            if *shutdown.borrow() {
                return Ok(stats);
            }
            let outcome = self.relay.process_next().await?;
            if outcome.is_idle() {
                return Ok(stats);
            }
            stats.record(&outcome);
        }
    }

    async fn drain_logged(&self, shutdown: &watch::Receiver<bool>, trigger: &'static str) {
        match self.drain(shutdown).await {
            Ok(stats) if stats.processed() > 0 => {
                debug!(
                    trigger,
                    published = stats.published,
                    retried = stats.retried,
                    failed = stats.failed,
                    "Outbox drain finished"
                );
            }
            Ok(_) => {}
            Err(err) => error!(trigger, error = %err, "Outbox drain aborted"),
        }
    }

    async fn subscribe(&self) -> Result<NotificationStream, DomainError> {
        match &self.notifier {
            Some(notifier) => notifier.subscribe(&self.config.notify_channel).await,
            None => Ok(futures::stream::empty().boxed()),
        }
    }
}

async fn next_notification(
    notifications: &mut Option<NotificationStream>,
) -> Option<Result<ChangeNotification, DomainError>> {
    match notifications {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}
