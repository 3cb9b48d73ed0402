//! Snapshot scheduling.
//!
//! One cron timeline per period kind, both running on the scheduler's own
//! task in the configured time zone. A fire lists active users and generates
//! one report per user; the dedupe key on the Report Store makes re-fires for
//! the same nominal instant harmless, and a missed fire is simply skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, FixedOffset, Utc};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::error::TrendError;
use crate::generator::ReportGenerator;
use crate::models::Period;
use crate::store::{EventStore, ReportStore};

/// Monday 00:05 in the configured zone, after the week closes.
pub const DEFAULT_WEEK_CRON: &str = "0 5 0 * * Mon";
/// Monday 00:10 in the configured zone, looking back at Fri-Sun.
pub const DEFAULT_WEEKEND_CRON: &str = "0 10 0 * * Mon";

/// Constructor-time scheduler configuration. Fire instants and the window
/// lengths are policy, not constants: the 3-day weekend window only means
/// Fri-Sun while the weekend cron stays on early Monday.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub week_cron: String,
    pub weekend_cron: String,
    pub utc_offset: FixedOffset,
    pub week_window_days: i64,
    pub weekend_window_days: i64,
}

impl SchedulerConfig {
    pub fn new(utc_offset: FixedOffset) -> Self {
        Self {
            week_cron: DEFAULT_WEEK_CRON.to_string(),
            weekend_cron: DEFAULT_WEEKEND_CRON.to_string(),
            utc_offset,
            week_window_days: Period::Week.default_window_days(),
            weekend_window_days: Period::Weekend.default_window_days(),
        }
    }
}

/// Outcome of one scheduled fire across all active users.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FireSummary {
    pub generated: u64,
    pub deduped: u64,
    pub failed: u64,
}

/// Generate one report per active user for `period`, anchored at `now`.
///
/// A single user's failure is logged and counted, never aborting the batch.
/// Errors only surface when the user listing itself cannot be fetched.
pub async fn run_fire(
    generator: &ReportGenerator,
    events: &dyn EventStore,
    period: Period,
    now: DateTime<Utc>,
) -> Result<FireSummary, TrendError> {
    let users = events.active_users().await?;
    let mut summary = FireSummary::default();

    for user_id in users {
        match generator.generate(user_id, period, now).await {
            Ok(outcome) if outcome.created => summary.generated += 1,
            Ok(_) => summary.deduped += 1,
            Err(err) => {
                summary.failed += 1;
                warn!(
                    %user_id,
                    %period,
                    error = %err,
                    retryable = err.is_retryable(),
                    "report generation failed, continuing batch"
                );
            }
        }
    }

    Ok(summary)
}

/// The nominal instant of a fire: wall clock truncated to the minute, so
/// every process firing the same cron tick derives the same dedupe key.
fn nominal_instant(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::minutes(1)).unwrap_or(now)
}

pub struct SnapshotScheduler {
    scheduler: JobScheduler,
    config: SchedulerConfig,
    generator: Arc<ReportGenerator>,
    events: Arc<dyn EventStore>,
    failure_count: Arc<AtomicU64>,
    fire_guard: Arc<Mutex<()>>,
}

impl SnapshotScheduler {
    pub async fn new(
        config: SchedulerConfig,
        events: Arc<dyn EventStore>,
        reports: Arc<dyn ReportStore>,
    ) -> Result<Self, TrendError> {
        let scheduler = JobScheduler::new().await.map_err(TrendError::upstream)?;
        let generator = Arc::new(
            ReportGenerator::new(Arc::clone(&events), reports)
                .with_window_days(config.week_window_days, config.weekend_window_days),
        );
        Ok(Self {
            scheduler,
            config,
            generator,
            events,
            failure_count: Arc::new(AtomicU64::new(0)),
            fire_guard: Arc::new(Mutex::new(())),
        })
    }

    /// Register both period timelines and start the scheduling task.
    pub async fn start(&self) -> Result<(), TrendError> {
        self.register(Period::Week, self.config.week_cron.clone())
            .await?;
        self.register(Period::Weekend, self.config.weekend_cron.clone())
            .await?;
        self.scheduler.start().await.map_err(TrendError::upstream)?;
        info!(
            week_cron = %self.config.week_cron,
            weekend_cron = %self.config.weekend_cron,
            offset = %self.config.utc_offset,
            "snapshot scheduler started"
        );
        Ok(())
    }

    /// Stop scheduling. Every fire holds the fire guard for its whole batch,
    /// so acquiring it here waits out an in-flight fire, and keeping it held
    /// across the cron stop blocks a racing fire from starting half-done work
    /// the runtime would then cancel. Each report write is a single insert,
    /// so nothing partial is ever persisted either way.
    pub async fn shutdown(&mut self) -> Result<(), TrendError> {
        let _fire = self.fire_guard.lock().await;
        self.scheduler
            .shutdown()
            .await
            .map_err(TrendError::upstream)?;
        info!("snapshot scheduler shut down");
        Ok(())
    }

    /// Total per-user generation failures since start, for observability.
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    async fn register(&self, period: Period, cron: String) -> Result<(), TrendError> {
        let generator = Arc::clone(&self.generator);
        let events = Arc::clone(&self.events);
        let failures = Arc::clone(&self.failure_count);
        let fire_guard = Arc::clone(&self.fire_guard);

        let job = Job::new_async_tz(cron.as_str(), self.config.utc_offset, move |_uuid, _lock| {
            let generator = Arc::clone(&generator);
            let events = Arc::clone(&events);
            let failures = Arc::clone(&failures);
            let fire_guard = Arc::clone(&fire_guard);
            Box::pin(async move {
                let _fire = fire_guard.lock().await;
                let now = nominal_instant(Utc::now());
                match run_fire(&generator, events.as_ref(), period, now).await {
                    Ok(summary) => {
                        failures.fetch_add(summary.failed, Ordering::Relaxed);
                        info!(
                            %period,
                            generated = summary.generated,
                            deduped = summary.deduped,
                            failed = summary.failed,
                            "scheduled fire finished"
                        );
                    }
                    Err(err) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!(%period, error = %err, "scheduled fire aborted");
                    }
                }
            })
        })
        .map_err(TrendError::upstream)?;

        self.scheduler.add(job).await.map_err(TrendError::upstream)?;
        info!(%period, %cron, "registered report timeline");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RatingEvent, Report, WindowSpec};
    use crate::store::{MemoryEventStore, MemoryReportStore, ReportStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn fire_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, 4, 5, 0).unwrap()
    }

    fn store_with_users(users: &[Uuid]) -> Arc<MemoryEventStore> {
        let store = Arc::new(MemoryEventStore::new());
        for (i, user) in users.iter().enumerate() {
            store.push_event(RatingEvent {
                id: Uuid::new_v4(),
                user_id: *user,
                place_id: Uuid::from_bytes([(i + 1) as u8; 16]),
                place_name: format!("place-{i}"),
                category: "cafe".into(),
                address: String::new(),
                score: 8,
                occurred_at: fire_instant() - Duration::days(1),
            });
        }
        store
    }

    /// Report store that refuses writes for one user, for batch-continuation
    /// tests.
    struct RejectingReportStore {
        inner: MemoryReportStore,
        reject_user: Uuid,
    }

    #[async_trait]
    impl ReportStore for RejectingReportStore {
        async fn insert(&self, report: Report) -> Result<bool, TrendError> {
            if report.user_id == self.reject_user {
                return Err(TrendError::upstream("simulated write failure"));
            }
            self.inner.insert(report).await
        }

        async fn find_by_key(
            &self,
            user_id: Uuid,
            period: Period,
            range_start: DateTime<Utc>,
        ) -> Result<Option<Report>, TrendError> {
            self.inner.find_by_key(user_id, period, range_start).await
        }

        async fn recent_by_user_and_period(
            &self,
            user_id: Uuid,
            period: Period,
            limit: i64,
        ) -> Result<Vec<Report>, TrendError> {
            self.inner
                .recent_by_user_and_period(user_id, period, limit)
                .await
        }
    }

    #[tokio::test]
    async fn fire_generates_one_report_per_active_user() {
        let users = [Uuid::from_bytes([1; 16]), Uuid::from_bytes([2; 16])];
        let events = store_with_users(&users);
        let reports = Arc::new(MemoryReportStore::new());
        let generator = ReportGenerator::new(
            Arc::clone(&events) as Arc<dyn EventStore>,
            Arc::clone(&reports) as Arc<dyn ReportStore>,
        );

        let now = fire_instant();
        let summary = run_fire(&generator, events.as_ref(), Period::Week, now)
            .await
            .unwrap();
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(reports.len(), 2);

        for user in users {
            let recent = reports
                .recent_by_user_and_period(user, Period::Week, 10)
                .await
                .unwrap();
            assert_eq!(recent.len(), 1);
            assert_eq!(recent[0].range_start, now - Duration::days(7));
            assert_eq!(recent[0].range_end, now);
        }
    }

    #[tokio::test]
    async fn refiring_the_same_instant_adds_nothing() {
        let users = [Uuid::from_bytes([1; 16])];
        let events = store_with_users(&users);
        let reports = Arc::new(MemoryReportStore::new());
        let generator = ReportGenerator::new(
            Arc::clone(&events) as Arc<dyn EventStore>,
            Arc::clone(&reports) as Arc<dyn ReportStore>,
        );

        let now = fire_instant();
        let first = run_fire(&generator, events.as_ref(), Period::Week, now)
            .await
            .unwrap();
        let second = run_fire(&generator, events.as_ref(), Period::Week, now)
            .await
            .unwrap();
        assert_eq!(first.generated, 1);
        assert_eq!(second.generated, 0);
        assert_eq!(second.deduped, 1);
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_user_does_not_abort_the_batch() {
        let users = [
            Uuid::from_bytes([1; 16]),
            Uuid::from_bytes([2; 16]),
            Uuid::from_bytes([3; 16]),
        ];
        let events = store_with_users(&users);
        let reports = Arc::new(RejectingReportStore {
            inner: MemoryReportStore::new(),
            reject_user: users[1],
        });
        let generator = ReportGenerator::new(
            Arc::clone(&events) as Arc<dyn EventStore>,
            Arc::clone(&reports) as Arc<dyn ReportStore>,
        );

        let summary = run_fire(&generator, events.as_ref(), Period::Week, fire_instant())
            .await
            .unwrap();
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(reports.inner.len(), 2);
    }

    #[tokio::test]
    async fn shutdown_waits_for_an_in_flight_fire() {
        let events = store_with_users(&[Uuid::from_bytes([1; 16])]);
        let reports = Arc::new(MemoryReportStore::new());
        let config = SchedulerConfig::new(FixedOffset::west_opt(4 * 3600).unwrap());
        let mut scheduler = SnapshotScheduler::new(
            config,
            Arc::clone(&events) as Arc<dyn EventStore>,
            reports as Arc<dyn ReportStore>,
        )
        .await
        .unwrap();
        scheduler.start().await.unwrap();

        // hold the fire guard the way a running batch does
        let held = Arc::clone(&scheduler.fire_guard).lock_owned().await;
        let fire_done = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&fire_done);
        let fire = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            done.store(true, Ordering::SeqCst);
            drop(held);
        });

        scheduler.shutdown().await.unwrap();
        assert!(
            fire_done.load(Ordering::SeqCst),
            "shutdown returned while a fire was still running"
        );
        fire.await.unwrap();
    }

    #[tokio::test]
    async fn fires_in_the_same_minute_share_a_dedupe_key() {
        let users = [Uuid::from_bytes([1; 16])];
        let events = store_with_users(&users);
        let reports = Arc::new(MemoryReportStore::new());
        let generator = ReportGenerator::new(
            Arc::clone(&events) as Arc<dyn EventStore>,
            Arc::clone(&reports) as Arc<dyn ReportStore>,
        );

        // two processes firing the same cron tick observe slightly different
        // wall clocks; truncation collapses them onto one nominal instant
        let tick = fire_instant();
        let first = nominal_instant(tick + Duration::milliseconds(120));
        let second = nominal_instant(tick + Duration::milliseconds(830));
        assert_eq!(first, tick);
        assert_eq!(second, tick);

        run_fire(&generator, events.as_ref(), Period::Week, first)
            .await
            .unwrap();
        let replay = run_fire(&generator, events.as_ref(), Period::Week, second)
            .await
            .unwrap();
        assert_eq!(replay.generated, 0);
        assert_eq!(replay.deduped, 1);
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_starts_and_shuts_down_cleanly() {
        let events = store_with_users(&[Uuid::from_bytes([1; 16])]);
        let reports = Arc::new(MemoryReportStore::new());
        let config = SchedulerConfig::new(FixedOffset::west_opt(4 * 3600).unwrap());
        let mut scheduler = SnapshotScheduler::new(
            config,
            Arc::clone(&events) as Arc<dyn EventStore>,
            reports as Arc<dyn ReportStore>,
        )
        .await
        .unwrap();

        scheduler.start().await.unwrap();
        assert_eq!(scheduler.failure_count(), 0);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn fire_window_is_rejected_before_any_write_when_degenerate() {
        // window derivation itself validates start < end, so a zero-day
        // configuration surfaces InvalidWindow instead of writing garbage
        let events = store_with_users(&[Uuid::from_bytes([1; 16])]);
        let reports = Arc::new(MemoryReportStore::new());
        let generator = ReportGenerator::new(
            Arc::clone(&events) as Arc<dyn EventStore>,
            Arc::clone(&reports) as Arc<dyn ReportStore>,
        )
        .with_window_days(0, 0);

        let summary = run_fire(&generator, events.as_ref(), Period::Week, fire_instant())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert!(reports.is_empty());
    }

    #[test]
    fn window_spec_backs_the_dedupe_key_maths() {
        let now = fire_instant();
        let window = WindowSpec::new(now - Duration::days(7), now, None).unwrap();
        assert_eq!(window.end - window.start, Duration::days(7));
    }
}
