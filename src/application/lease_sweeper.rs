//! LeaseSweeper - Recovers rows stranded in `publishing`.
//!
//! A relay that crashes (or loses its database connection) between claim and
//! finalize leaves its row in `publishing`, where no claim will ever select it
//! again. The sweeper treats every lease older than `lease_timeout` as a
//! failed attempt, so the row either goes back to `pending` with backoff or
//! becomes `failed` once its attempts are used up.
//!
//! The timeout must comfortably exceed the longest expected publish; a
//! reclaimed lease whose publish later succeeds is delivered twice, which
//! at-least-once delivery permits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::domain::foundation::{DomainError, Timestamp};
use crate::domain::outbox::RetryPolicy;
use crate::ports::OutboxStore;

/// Periodic requeue of expired leases.
pub struct LeaseSweeper {
    store: Arc<dyn OutboxStore>,
    policy: RetryPolicy,
    lease_timeout: Duration,
    interval: Duration,
}

impl LeaseSweeper {
    /// Create a sweeper that ticks every minute.
    pub fn new(store: Arc<dyn OutboxStore>, policy: RetryPolicy, lease_timeout: Duration) -> Self {
        Self {
            store,
            policy,
            lease_timeout,
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// A zero timeout disables sweeping.
    pub fn is_enabled(&self) -> bool {
        !self.lease_timeout.is_zero()
    }

    /// Requeue every lease taken more than `lease_timeout` ago.
    ///
    /// Returns the number of rows moved out of `publishing`.
    pub async fn sweep_once(&self) -> Result<u64, DomainError> {
        let now = Timestamp::now();
        let leased_before = now.minus(self.lease_timeout);

        let requeued = self
            .store
            .requeue_expired_leases(leased_before, &self.policy, now)
            .await?;

        if requeued > 0 {
            warn!(
                requeued,
                lease_timeout_secs = self.lease_timeout.as_secs(),
                "Requeued expired outbox leases"
            );
        }

        Ok(requeued)
    }

    /// Run until the shutdown signal is received.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DomainError> {
        if !self.is_enabled() {
            info!("Lease sweeper disabled");
            return Ok(());
        }

        info!(
            lease_timeout_secs = self.lease_timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Lease sweeper started"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        error!(error = %err, "Lease sweep failed");
                    }
                }
            }
        }

        info!("Lease sweeper stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryOutboxStore;
    use crate::domain::foundation::EventId;
    use crate::domain::outbox::{NewOutboxEvent, OutboxStatus};
    use crate::ports::OutboxWriter;

    fn event(event_id: &str) -> NewOutboxEvent {
        NewOutboxEvent::new("documents", EventId::parse(event_id).unwrap(), b"{}".to_vec())
            .unwrap()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(1), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn fresh_leases_are_left_alone() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store.write(&event("evt-1")).await.unwrap();
        store.claim_next(Timestamp::now()).await.unwrap().unwrap();

        let sweeper = LeaseSweeper::new(store.clone(), policy(5), Duration::from_secs(300));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.status_counts().publishing, 1);
    }

    #[tokio::test]
    async fn expired_lease_goes_back_to_pending() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store.write(&event("evt-1")).await.unwrap();
        let claimed = store.claim_next(Timestamp::now()).await.unwrap().unwrap();
        store.backdate_lease(claimed.id, Timestamp::now().minus(Duration::from_secs(600)));

        let sweeper = LeaseSweeper::new(store.clone(), policy(5), Duration::from_secs(300));

        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
        let row = store.find_by_id(claimed.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Pending);
        assert_eq!(row.attempts, 1);
        assert!(row.leased_at.is_none());
    }

    #[tokio::test]
    async fn expired_lease_on_last_attempt_fails_the_row() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store.write(&event("evt-1")).await.unwrap();
        let claimed = store.claim_next(Timestamp::now()).await.unwrap().unwrap();
        store.backdate_lease(claimed.id, Timestamp::now().minus(Duration::from_secs(600)));

        let sweeper = LeaseSweeper::new(store.clone(), policy(1), Duration::from_secs(300));
        sweeper.sweep_once().await.unwrap();

        let row = store.find_by_id(claimed.id).await.unwrap().unwrap();
        assert_eq!(row.status, OutboxStatus::Failed);
    }

    #[tokio::test]
    async fn zero_timeout_disables_run() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let sweeper = LeaseSweeper::new(store, policy(5), Duration::ZERO);
        let (_tx, shutdown) = watch::channel(false);

        assert!(!sweeper.is_enabled());
        assert!(sweeper.run(shutdown).await.is_ok());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let store = Arc::new(InMemoryOutboxStore::new());
        let sweeper = LeaseSweeper::new(store, policy(5), Duration::from_secs(300))
            .with_interval(Duration::from_millis(10));
        let (tx, shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move { sweeper.run(shutdown).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        assert!(handle.await.unwrap().is_ok());
    }
}
