//! Reminder scheduler loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    Clock, DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_SEND_TIMEOUT, DEFAULT_WINDOW, DeliveryLedger,
    Dispatcher, PushProvider, ReminderError, ReminderSource, ReminderStore, SchedulerState,
    TickReport, WindowPolicy,
};

/// Default cadence between ticks (one minute).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted cadence (one day).
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tuning for the reminder scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cadence between ticks; ticks are aligned to multiples of it.
    pub tick_interval: Duration,
    /// Size of the trailing delivery window.
    pub window: Duration,
    /// Bound on a single push send.
    pub send_timeout: Duration,
    /// Maximum sends in flight within one tick.
    pub max_concurrent_sends: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            window: DEFAULT_WINDOW,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }
}

/// First multiple of `cadence` since the Unix epoch strictly after `after`.
///
/// With a 60 second cadence this is the next wall-clock minute. Saturates
/// at the latest representable instant.
pub fn next_boundary(after: DateTime<Utc>, cadence: Duration) -> DateTime<Utc> {
    let step = cadence.as_millis().clamp(1, i64::MAX as u128) as i64;
    after
        .timestamp_millis()
        .div_euclid(step)
        .checked_add(1)
        .and_then(|n| n.checked_mul(step))
        .and_then(DateTime::from_timestamp_millis)
        .or_else(|| {
            chrono::Duration::try_milliseconds(step).and_then(|d| after.checked_add_signed(d))
        })
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Clears the in-flight flag when a tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the scan-and-dispatch pass on a fixed cadence.
pub struct ReminderScheduler {
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
    source: ReminderSource,
    dispatcher: Dispatcher,
    tick_interval: Duration,
    ticking: AtomicBool,
    ledger: Mutex<DeliveryLedger>,
}

impl ReminderScheduler {
    /// Create a scheduler. The push provider must already be initialized.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn ReminderStore>,
        provider: Arc<dyn PushProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ReminderError> {
        if config.tick_interval.is_zero() {
            return Err(ReminderError::InvalidConfig(
                "tick interval must be longer than zero".to_string(),
            ));
        }
        if config.tick_interval > MAX_TICK_INTERVAL {
            return Err(ReminderError::InvalidConfig(format!(
                "tick interval of {}s exceeds the maximum of {}s",
                config.tick_interval.as_secs(),
                MAX_TICK_INTERVAL.as_secs()
            )));
        }
        let policy = WindowPolicy::new(config.window)?;

        if config.window < config.tick_interval {
            warn!(
                window_secs = config.window.as_secs_f64(),
                tick_interval_secs = config.tick_interval.as_secs_f64(),
                "delivery window is shorter than the tick interval, some reminders will never be sent"
            );
        }

        let dispatcher = Dispatcher::new(provider)
            .with_send_timeout(config.send_timeout)
            .with_max_concurrent_sends(config.max_concurrent_sends);

        Ok(Self {
            clock,
            policy,
            source: ReminderSource::new(store),
            dispatcher,
            tick_interval: config.tick_interval,
            ticking: AtomicBool::new(false),
            ledger: Mutex::new(DeliveryLedger::new()),
        })
    }

    pub fn state(&self) -> SchedulerState {
        if self.ticking.load(Ordering::Acquire) {
            SchedulerState::Ticking
        } else {
            SchedulerState::Idle
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Run one scan-and-dispatch pass now.
    ///
    /// Fails with [`ReminderError::TickInProgress`] if another pass is still
    /// running.
    pub async fn run_tick(&self) -> Result<TickReport, ReminderError> {
        self.tick_at(self.clock.now()).await
    }

    #[tracing::instrument(skip(self))]
    async fn tick_at(&self, started_at: DateTime<Utc>) -> Result<TickReport, ReminderError> {
        let _guard = TickGuard::acquire(&self.ticking).ok_or(ReminderError::TickInProgress)?;

        let window = self.policy.window_at(started_at);
        let candidates = self.source.fetch(&window).await?;
        let candidate_count = candidates.len();

        let mut ledger = self.ledger.lock().await;
        ledger.prune(&window);
        let (fresh, mut results) = ledger.filter_new(candidates);

        let attempted = self.dispatcher.dispatch(fresh).await;
        ledger.record(&attempted);
        results.extend(attempted);

        Ok(TickReport {
            started_at,
            window,
            candidates: candidate_count,
            results,
        })
    }

    /// Run a tick, log how it went and return when it started.
    async fn tick_and_log(&self) -> DateTime<Utc> {
        let started_at = self.clock.now();

        match self.tick_at(started_at).await {
            Ok(report) if report.candidates > 0 => {
                info!(
                    window = %report.window,
                    candidates = report.candidates,
                    delivered = report.delivered(),
                    skipped = report.skipped(),
                    suppressed = report.suppressed(),
                    failed = report.failed(),
                    "reminder tick complete"
                );
            }
            Ok(report) => {
                debug!(window = %report.window, "no reminders due");
            }
            Err(e) => {
                error!(error = %e, "reminder tick failed");
            }
        }

        started_at
    }

    /// Run the scheduler loop until `shutdown_rx` turns true.
    ///
    /// Ticks once immediately, then at every cadence boundary. A tick that
    /// overruns one or more boundaries is followed by exactly one immediate
    /// tick. Failed ticks are logged and never end the loop.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            tick_interval_secs = self.tick_interval.as_secs_f64(),
            window_secs = self.policy.size().num_seconds(),
            "reminder scheduler starting"
        );

        let mut last_start = self.tick_and_log().await;

        'outer: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let target = next_boundary(last_start, self.tick_interval);

            // Wall-clock and timer can disagree slightly; keep sleeping until
            // the clock has actually reached the boundary.
            loop {
                let now = self.clock.now();
                if now >= target {
                    break;
                }
                let wait = (target - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("reminder scheduler received shutdown signal");
                            break 'outer;
                        }
                    }
                    _ = sleep(wait) => {}
                }
            }

            last_start = self.tick_and_log().await;
        }

        info!("reminder scheduler shut down gracefully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use crate::{
        DeliveryError, DeliveryOutcome, DeliveryWindow, DueReminder, ManualClock, StoreError,
    };

    struct StaticStore(Vec<DueReminder>);

    #[async_trait]
    impl ReminderStore for StaticStore {
        async fn due_reminders(
            &self,
            window: &DeliveryWindow,
        ) -> Result<Vec<DueReminder>, StoreError> {
            Ok(self
                .0
                .iter()
                .filter(|r| window.contains(r.due_at))
                .cloned()
                .collect())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ReminderStore for FailingStore {
        async fn due_reminders(
            &self,
            _window: &DeliveryWindow,
        ) -> Result<Vec<DueReminder>, StoreError> {
            Err(StoreError::Query("no such table: notes".to_string()))
        }
    }

    /// Fails sends to subscriptions starting with "bad".
    #[derive(Default)]
    struct CountingProvider {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl PushProvider for CountingProvider {
        async fn send(&self, subscription: &str, _payload: &str) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if subscription.starts_with("bad") {
                return Err(DeliveryError::Timeout(Duration::from_secs(10)));
            }
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 14, 10, 15, 0).unwrap()
    }

    fn note(note_id: i64, due_at: DateTime<Utc>, subscription: Option<&str>) -> DueReminder {
        DueReminder {
            note_id,
            title: format!("Note {}", note_id),
            body_excerpt: "remember".to_string(),
            recipient_id: 100 + note_id,
            subscription: subscription.map(str::to_string),
            due_at,
        }
    }

    fn scheduler(
        store: impl ReminderStore + 'static,
        provider: Arc<CountingProvider>,
        clock: ManualClock,
    ) -> ReminderScheduler {
        ReminderScheduler::new(
            SchedulerConfig::default(),
            Arc::new(store),
            provider,
            Arc::new(clock),
        )
        .unwrap()
    }

    #[test]
    fn test_next_boundary_aligns_to_minutes() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        assert_eq!(
            next_boundary(t, DEFAULT_TICK_INTERVAL),
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap()
        );
    }

    #[test]
    fn test_next_boundary_is_strictly_after() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap();
        assert_eq!(
            next_boundary(t, DEFAULT_TICK_INTERVAL),
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 2, 0).unwrap()
        );
    }

    #[test]
    fn test_next_boundary_saturates_for_huge_cadence() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        let boundary = next_boundary(t, Duration::from_secs(u64::MAX / 2000));
        assert!(boundary > t);
        assert_eq!(
            next_boundary(DateTime::<Utc>::MAX_UTC, DEFAULT_TICK_INTERVAL),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_out_of_range_config_rejected_before_ticking() {
        for config in [
            SchedulerConfig {
                tick_interval: MAX_TICK_INTERVAL + Duration::from_secs(1),
                ..Default::default()
            },
            SchedulerConfig {
                window: Duration::from_secs(10_000_000_000_000),
                ..Default::default()
            },
        ] {
            let result = ReminderScheduler::new(
                config,
                Arc::new(StaticStore(vec![])),
                Arc::new(CountingProvider::default()),
                Arc::new(ManualClock::new(now())),
            );
            assert!(matches!(result, Err(ReminderError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let config = SchedulerConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        let result = ReminderScheduler::new(
            config,
            Arc::new(StaticStore(vec![])),
            Arc::new(CountingProvider::default()),
            Arc::new(ManualClock::new(now())),
        );
        assert!(matches!(result, Err(ReminderError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_due_note_with_subscription_is_delivered() {
        let provider = Arc::new(CountingProvider::default());
        let store = StaticStore(vec![note(1, now(), Some("sub-a"))]);
        let scheduler = scheduler(store, provider.clone(), ManualClock::new(now()));

        let report = scheduler.run_tick().await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.delivered(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_note_outside_window_is_not_sent() {
        let provider = Arc::new(CountingProvider::default());
        let store = StaticStore(vec![note(2, now() - chrono::Duration::seconds(90), Some("sub-b"))]);
        let scheduler = scheduler(store, provider.clone(), ManualClock::new(now()));

        let report = scheduler.run_tick().await.unwrap();

        assert_eq!(report.candidates, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_recipient_is_a_successful_tick() {
        let provider = Arc::new(CountingProvider::default());
        let store = StaticStore(vec![note(3, now(), None)]);
        let scheduler = scheduler(store, provider.clone(), ManualClock::new(now()));

        let report = scheduler.run_tick().await.unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_for_one_recipient_does_not_stop_others() {
        let provider = Arc::new(CountingProvider::default());
        let store = StaticStore(vec![
            note(4, now(), Some("bad-d")),
            note(5, now(), Some("sub-e")),
        ]);
        let scheduler = scheduler(store, provider.clone(), ManualClock::new(now()));

        let report = scheduler.run_tick().await.unwrap();

        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.delivered(), 1);
        let failed = report
            .results
            .iter()
            .find(|r| matches!(r.outcome, DeliveryOutcome::Failed { .. }))
            .unwrap();
        assert_eq!(failed.note_id, 4);
    }

    #[tokio::test]
    async fn test_store_failure_is_a_tick_error() {
        let provider = Arc::new(CountingProvider::default());
        let scheduler = scheduler(FailingStore, provider, ManualClock::new(now()));

        let err = scheduler.run_tick().await.unwrap_err();
        assert!(matches!(err, ReminderError::Store(_)));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_ticks_do_not_send_twice() {
        let provider = Arc::new(CountingProvider::default());
        let clock = ManualClock::new(now());
        let store = StaticStore(vec![note(6, now(), Some("sub-f"))]);
        let scheduler = scheduler(store, provider.clone(), clock.clone());

        let first = scheduler.run_tick().await.unwrap();
        clock.advance(chrono::Duration::seconds(20));
        let second = scheduler.run_tick().await.unwrap();

        assert_eq!(first.delivered(), 1);
        assert_eq!(second.suppressed(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_while_in_window() {
        struct FlakyProvider(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl PushProvider for FlakyProvider {
            async fn send(&self, _subscription: &str, _payload: &str) -> Result<(), DeliveryError> {
                if self.0.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(DeliveryError::Transport("connection reset".to_string()));
                }
                Ok(())
            }
        }

        let provider = Arc::new(FlakyProvider(Default::default()));
        let clock = ManualClock::new(now());
        let scheduler = ReminderScheduler::new(
            SchedulerConfig::default(),
            Arc::new(StaticStore(vec![note(7, now(), Some("sub-g"))])),
            provider.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap();

        let first = scheduler.run_tick().await.unwrap();
        clock.advance(chrono::Duration::seconds(30));
        let second = scheduler.run_tick().await.unwrap();

        assert_eq!(first.failed(), 1);
        assert_eq!(second.delivered(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_tick_is_rejected() {
        let provider = Arc::new(CountingProvider::default());
        let scheduler = scheduler(StaticStore(vec![]), provider, ManualClock::new(now()));

        let _guard = TickGuard::acquire(&scheduler.ticking).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Ticking);

        let err = scheduler.run_tick().await.unwrap_err();
        assert!(matches!(err, ReminderError::TickInProgress));
    }
}
