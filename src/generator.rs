//! Periodic report generation.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::analytics;
use crate::error::TrendError;
use crate::models::{Period, RankingEntry, Report, WindowSpec};
use crate::store::{EventStore, ReportStore};

/// Places kept in a snapshot payload.
pub const REPORT_RANKING_LIMIT: usize = 10;

/// Result of one generation call. `created` is false when the dedupe key
/// already had a report, in which case `report` is the existing one.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub report: Report,
    pub created: bool,
}

/// Computes a ranking snapshot for a period and persists it as an immutable
/// report. Never mutates source events; the payload is a frozen copy.
pub struct ReportGenerator {
    events: Arc<dyn EventStore>,
    reports: Arc<dyn ReportStore>,
    week_window_days: i64,
    weekend_window_days: i64,
}

impl ReportGenerator {
    pub fn new(events: Arc<dyn EventStore>, reports: Arc<dyn ReportStore>) -> Self {
        Self {
            events,
            reports,
            week_window_days: Period::Week.default_window_days(),
            weekend_window_days: Period::Weekend.default_window_days(),
        }
    }

    /// Override the trailing window lengths. The weekend length in particular
    /// is deployment policy: 3 days only covers Fri-Sun when the fire instant
    /// is early Monday in the configured zone.
    pub fn with_window_days(mut self, week: i64, weekend: i64) -> Self {
        self.week_window_days = week;
        self.weekend_window_days = weekend;
        self
    }

    fn window_days(&self, period: Period) -> i64 {
        match period {
            Period::Week => self.week_window_days,
            Period::Weekend => self.weekend_window_days,
        }
    }

    /// Generate the snapshot for `(user_id, period)` with the window anchored
    /// at `now`. Idempotent per `(user_id, period, range_start)`: a repeat
    /// call for the same nominal instant returns the already-persisted report
    /// without writing a second one.
    pub async fn generate(
        &self,
        user_id: Uuid,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<GenerateOutcome, TrendError> {
        let window = WindowSpec::new(now - Duration::days(self.window_days(period)), now, None)?;

        if let Some(existing) = self
            .reports
            .find_by_key(user_id, period, window.start)
            .await?
        {
            debug!(%user_id, %period, range_start = %window.start, "report already exists, skipping");
            return Ok(GenerateOutcome {
                report: existing,
                created: false,
            });
        }

        let events = self.events.events_in_range(&window).await?;
        let ranking = analytics::rank_by_activity(
            analytics::aggregate_places(&events),
            REPORT_RANKING_LIMIT,
        );
        let entries: Vec<RankingEntry> = ranking
            .into_iter()
            .map(|agg| RankingEntry {
                place_id: agg.place_id,
                event_count: agg.event_count,
                mean_score: agg.mean_score.unwrap_or(0.0),
            })
            .collect();
        let payload = serde_json::to_string(&entries).map_err(TrendError::upstream)?;

        let report = Report {
            id: Uuid::new_v4(),
            user_id,
            period,
            range_start: window.start,
            range_end: window.end,
            payload,
            created_at: now,
        };

        if self.reports.insert(report.clone()).await? {
            return Ok(GenerateOutcome {
                report,
                created: true,
            });
        }

        // lost the race to a concurrent generation for the same key
        match self
            .reports
            .find_by_key(user_id, period, window.start)
            .await?
        {
            Some(existing) => Ok(GenerateOutcome {
                report: existing,
                created: false,
            }),
            None => Err(TrendError::upstream(
                "report insert deduped but existing report not found",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RatingEvent;
    use crate::store::{MemoryEventStore, MemoryReportStore};
    use chrono::TimeZone;

    fn nominal_fire_instant() -> DateTime<Utc> {
        // Monday 00:05 local (UTC-4)
        Utc.with_ymd_and_hms(2026, 3, 16, 4, 5, 0).unwrap()
    }

    fn seeded_stores() -> (Arc<MemoryEventStore>, Arc<MemoryReportStore>) {
        let events = Arc::new(MemoryEventStore::new());
        let now = nominal_fire_instant();
        for (place, score, days_ago) in [(1u8, 9, 1), (1, 7, 2), (2, 10, 1), (1, 8, 20)] {
            events.push_event(RatingEvent {
                id: Uuid::new_v4(),
                user_id: Uuid::from_bytes([42; 16]),
                place_id: Uuid::from_bytes([place; 16]),
                place_name: format!("place-{place}"),
                category: "cafe".into(),
                address: String::new(),
                score,
                occurred_at: now - Duration::days(days_ago),
            });
        }
        (events, Arc::new(MemoryReportStore::new()))
    }

    #[tokio::test]
    async fn week_report_freezes_activity_ranking_for_trailing_seven_days() {
        let (events, reports) = seeded_stores();
        let generator =
            ReportGenerator::new(events, Arc::clone(&reports) as Arc<dyn ReportStore>);
        let now = nominal_fire_instant();

        let outcome = generator
            .generate(Uuid::from_bytes([42; 16]), Period::Week, now)
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.report.range_start, now - Duration::days(7));
        assert_eq!(outcome.report.range_end, now);

        let entries: Vec<RankingEntry> = serde_json::from_str(&outcome.report.payload).unwrap();
        // the 20-day-old event is outside the window, so P1 has two events
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].place_id, Uuid::from_bytes([1; 16]));
        assert_eq!(entries[0].event_count, 2);
        assert_eq!(entries[0].mean_score, 8.0);
        assert_eq!(entries[1].event_count, 1);
    }

    #[tokio::test]
    async fn repeated_generation_for_same_instant_is_deduped() {
        let (events, reports) = seeded_stores();
        let generator =
            ReportGenerator::new(events, Arc::clone(&reports) as Arc<dyn ReportStore>);
        let user = Uuid::from_bytes([42; 16]);
        let now = nominal_fire_instant();

        let first = generator.generate(user, Period::Week, now).await.unwrap();
        let second = generator.generate(user, Period::Week, now).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.report.id, second.report.id);
        assert_eq!(reports.len(), 1);
    }

    #[tokio::test]
    async fn weekend_window_is_three_days_by_default() {
        let (events, reports) = seeded_stores();
        let generator = ReportGenerator::new(events, reports);
        let now = nominal_fire_instant();

        let outcome = generator
            .generate(Uuid::from_bytes([42; 16]), Period::Weekend, now)
            .await
            .unwrap();
        assert_eq!(outcome.report.range_start, now - Duration::days(3));
    }

    #[tokio::test]
    async fn week_and_weekend_reports_do_not_collide() {
        let (events, reports) = seeded_stores();
        let generator =
            ReportGenerator::new(events, Arc::clone(&reports) as Arc<dyn ReportStore>);
        let user = Uuid::from_bytes([42; 16]);
        let now = nominal_fire_instant();

        generator.generate(user, Period::Week, now).await.unwrap();
        generator.generate(user, Period::Weekend, now).await.unwrap();
        assert_eq!(reports.len(), 2);
    }

    #[tokio::test]
    async fn payload_survives_later_event_changes() {
        let (events, reports) = seeded_stores();
        let generator = ReportGenerator::new(Arc::clone(&events) as Arc<dyn EventStore>, reports);
        let user = Uuid::from_bytes([42; 16]);
        let now = nominal_fire_instant();

        let before = generator.generate(user, Period::Week, now).await.unwrap();

        // new events arrive after the snapshot; re-reading must not change it
        events.push_event(RatingEvent {
            id: Uuid::new_v4(),
            user_id: user,
            place_id: Uuid::from_bytes([9; 16]),
            place_name: "late".into(),
            category: "bar".into(),
            address: String::new(),
            score: 10,
            occurred_at: now - Duration::hours(1),
        });
        let after = generator.generate(user, Period::Week, now).await.unwrap();
        assert_eq!(before.report.payload, after.report.payload);
    }
}
