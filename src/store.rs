//! Store capability interfaces and their implementations.
//!
//! The engine only ever reads events and appends reports, so the interfaces
//! are deliberately narrow: any backend that can answer a range query and an
//! append-plus-recent-N lookup can host it. Postgres is the production
//! backend; the in-memory stores back the tests and double as a reference
//! implementation.

use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::TrendError;
use crate::models::{Period, PlaceRecord, RatingEvent, Report, WindowSpec};

/// Read-only access to the rating event stream.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events with `start <= occurred_at < end`, restricted to the window's
    /// category filter when one is set. Order is unspecified; aggregation
    /// sorts deterministically on its own.
    async fn events_in_range(&self, window: &WindowSpec) -> Result<Vec<RatingEvent>, TrendError>;

    /// The full place catalog.
    async fn places(&self) -> Result<Vec<PlaceRecord>, TrendError>;

    /// Distinct users that have recorded at least one event.
    async fn active_users(&self) -> Result<Vec<Uuid>, TrendError>;

    async fn count_events(&self) -> Result<u64, TrendError>;

    async fn count_places(&self) -> Result<u64, TrendError>;
}

/// Append-only storage for report snapshots.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a report. Returns `false` without writing when a report with
    /// the same `(user_id, period, range_start)` dedupe key already exists.
    async fn insert(&self, report: Report) -> Result<bool, TrendError>;

    async fn find_by_key(
        &self,
        user_id: Uuid,
        period: Period,
        range_start: DateTime<Utc>,
    ) -> Result<Option<Report>, TrendError>;

    /// Most recent reports for one user and period, newest first.
    async fn recent_by_user_and_period(
        &self,
        user_id: Uuid,
        period: Period,
        limit: i64,
    ) -> Result<Vec<Report>, TrendError>;
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn events_in_range(&self, window: &WindowSpec) -> Result<Vec<RatingEvent>, TrendError> {
        let mut query = String::from(
            "SELECT e.id, e.user_id, e.place_id, e.score, e.occurred_at, \
             p.name, p.category, p.address \
             FROM place_trends.rating_events e \
             JOIN place_trends.places p ON p.id = e.place_id \
             WHERE e.occurred_at >= $1 AND e.occurred_at < $2",
        );
        if window.category_filter.is_some() {
            query.push_str(" AND p.category = $3");
        }

        let mut rows = sqlx::query(&query).bind(window.start).bind(window.end);
        if let Some(category) = &window.category_filter {
            rows = rows.bind(category);
        }

        let records = rows
            .fetch_all(&self.pool)
            .await
            .map_err(TrendError::upstream)?;

        let mut events = Vec::with_capacity(records.len());
        for row in records {
            events.push(RatingEvent {
                id: row.get("id"),
                user_id: row.get("user_id"),
                place_id: row.get("place_id"),
                place_name: row.get("name"),
                category: row.get("category"),
                address: row.get("address"),
                score: row.get("score"),
                occurred_at: row.get("occurred_at"),
            });
        }
        Ok(events)
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>, TrendError> {
        let rows = sqlx::query(
            "SELECT id, name, category, address FROM place_trends.places ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(TrendError::upstream)?;

        Ok(rows
            .into_iter()
            .map(|row| PlaceRecord {
                id: row.get("id"),
                name: row.get("name"),
                category: row.get("category"),
                address: row.get("address"),
            })
            .collect())
    }

    async fn active_users(&self) -> Result<Vec<Uuid>, TrendError> {
        let rows = sqlx::query(
            "SELECT DISTINCT user_id FROM place_trends.rating_events ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(TrendError::upstream)?;

        Ok(rows.into_iter().map(|row| row.get("user_id")).collect())
    }

    async fn count_events(&self) -> Result<u64, TrendError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM place_trends.rating_events")
            .fetch_one(&self.pool)
            .await
            .map_err(TrendError::upstream)?;
        Ok(row.get::<i64, _>("total") as u64)
    }

    async fn count_places(&self) -> Result<u64, TrendError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM place_trends.places")
            .fetch_one(&self.pool)
            .await
            .map_err(TrendError::upstream)?;
        Ok(row.get::<i64, _>("total") as u64)
    }
}

pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn report_from_row(row: &sqlx::postgres::PgRow) -> Result<Report, TrendError> {
    let period: String = row.get("period");
    Ok(Report {
        id: row.get("id"),
        user_id: row.get("user_id"),
        period: Period::from_str(&period)?,
        range_start: row.get("range_start"),
        range_end: row.get("range_end"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn insert(&self, report: Report) -> Result<bool, TrendError> {
        let result = sqlx::query(
            r#"
            INSERT INTO place_trends.reports
            (id, user_id, period, range_start, range_end, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, period, range_start) DO NOTHING
            "#,
        )
        .bind(report.id)
        .bind(report.user_id)
        .bind(report.period.as_str())
        .bind(report.range_start)
        .bind(report.range_end)
        .bind(&report.payload)
        .bind(report.created_at)
        .execute(&self.pool)
        .await
        .map_err(TrendError::upstream)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_by_key(
        &self,
        user_id: Uuid,
        period: Period,
        range_start: DateTime<Utc>,
    ) -> Result<Option<Report>, TrendError> {
        let row = sqlx::query(
            "SELECT id, user_id, period, range_start, range_end, payload, created_at \
             FROM place_trends.reports \
             WHERE user_id = $1 AND period = $2 AND range_start = $3",
        )
        .bind(user_id)
        .bind(period.as_str())
        .bind(range_start)
        .fetch_optional(&self.pool)
        .await
        .map_err(TrendError::upstream)?;

        row.map(|row| report_from_row(&row)).transpose()
    }

    async fn recent_by_user_and_period(
        &self,
        user_id: Uuid,
        period: Period,
        limit: i64,
    ) -> Result<Vec<Report>, TrendError> {
        let rows = sqlx::query(
            "SELECT id, user_id, period, range_start, range_end, payload, created_at \
             FROM place_trends.reports \
             WHERE user_id = $1 AND period = $2 \
             ORDER BY created_at DESC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(period.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(TrendError::upstream)?;

        rows.iter().map(report_from_row).collect()
    }
}

/// In-memory Event Store used by tests and as a reference backend.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryEvents>,
}

#[derive(Default)]
struct MemoryEvents {
    places: Vec<PlaceRecord>,
    events: Vec<RatingEvent>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_place(&self, place: PlaceRecord) {
        self.inner.lock().expect("event store poisoned").places.push(place);
    }

    pub fn push_event(&self, event: RatingEvent) {
        self.inner.lock().expect("event store poisoned").events.push(event);
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn events_in_range(&self, window: &WindowSpec) -> Result<Vec<RatingEvent>, TrendError> {
        let inner = self.inner.lock().expect("event store poisoned");
        Ok(inner
            .events
            .iter()
            .filter(|event| window.includes(event))
            .cloned()
            .collect())
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>, TrendError> {
        Ok(self.inner.lock().expect("event store poisoned").places.clone())
    }

    async fn active_users(&self) -> Result<Vec<Uuid>, TrendError> {
        let inner = self.inner.lock().expect("event store poisoned");
        let mut users: Vec<Uuid> = inner.events.iter().map(|event| event.user_id).collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn count_events(&self) -> Result<u64, TrendError> {
        Ok(self.inner.lock().expect("event store poisoned").events.len() as u64)
    }

    async fn count_places(&self) -> Result<u64, TrendError> {
        Ok(self.inner.lock().expect("event store poisoned").places.len() as u64)
    }
}

/// In-memory Report Store with the same dedupe-key semantics as Postgres.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: Mutex<Vec<Report>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().expect("report store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn insert(&self, report: Report) -> Result<bool, TrendError> {
        let mut reports = self.reports.lock().expect("report store poisoned");
        let duplicate = reports.iter().any(|existing| {
            existing.user_id == report.user_id
                && existing.period == report.period
                && existing.range_start == report.range_start
        });
        if duplicate {
            return Ok(false);
        }
        reports.push(report);
        Ok(true)
    }

    async fn find_by_key(
        &self,
        user_id: Uuid,
        period: Period,
        range_start: DateTime<Utc>,
    ) -> Result<Option<Report>, TrendError> {
        let reports = self.reports.lock().expect("report store poisoned");
        Ok(reports
            .iter()
            .find(|report| {
                report.user_id == user_id
                    && report.period == period
                    && report.range_start == range_start
            })
            .cloned())
    }

    async fn recent_by_user_and_period(
        &self,
        user_id: Uuid,
        period: Period,
        limit: i64,
    ) -> Result<Vec<Report>, TrendError> {
        let reports = self.reports.lock().expect("report store poisoned");
        let mut matching: Vec<Report> = reports
            .iter()
            .filter(|report| report.user_id == user_id && report.period == period)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn report_at(user: Uuid, created_offset_min: i64, range_start_offset: i64) -> Report {
        let base = Utc.with_ymd_and_hms(2026, 3, 2, 0, 5, 0).unwrap();
        Report {
            id: Uuid::new_v4(),
            user_id: user,
            period: Period::Week,
            range_start: base + Duration::days(range_start_offset),
            range_end: base + Duration::days(range_start_offset + 7),
            payload: "[]".to_string(),
            created_at: base + Duration::minutes(created_offset_min),
        }
    }

    #[tokio::test]
    async fn memory_report_store_dedupes_on_key() {
        let store = MemoryReportStore::new();
        let user = Uuid::new_v4();
        assert!(store.insert(report_at(user, 0, 0)).await.unwrap());
        assert!(!store.insert(report_at(user, 5, 0)).await.unwrap());
        assert_eq!(store.len(), 1);

        // different range_start is a different logical window
        assert!(store.insert(report_at(user, 10, 7)).await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn recent_reports_come_back_newest_first_for_owner_only() {
        let store = MemoryReportStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        store.insert(report_at(owner, 0, 0)).await.unwrap();
        store.insert(report_at(owner, 60, 7)).await.unwrap();
        store.insert(report_at(other, 120, 0)).await.unwrap();

        let recent = store
            .recent_by_user_and_period(owner, Period::Week, 10)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].created_at > recent[1].created_at);
        assert!(recent.iter().all(|r| r.user_id == owner));

        let weekend = store
            .recent_by_user_and_period(owner, Period::Weekend, 10)
            .await
            .unwrap();
        assert!(weekend.is_empty());
    }

    #[tokio::test]
    async fn memory_event_store_filters_by_window_and_category() {
        let store = MemoryEventStore::new();
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        for (category, offset) in [("cafe", 0), ("bar", 1), ("bar", 40)] {
            store.push_event(RatingEvent {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                place_id: Uuid::new_v4(),
                place_name: "p".into(),
                category: category.into(),
                address: String::new(),
                score: 7,
                occurred_at: base + Duration::days(offset),
            });
        }

        let window = WindowSpec::new(base, base + Duration::days(30), Some("bar".into())).unwrap();
        let events = store.events_in_range(&window).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, "bar");
    }
}
