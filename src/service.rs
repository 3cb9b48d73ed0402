//! On-demand query surface over the stores.
//!
//! Every operation here is stateless and side-effect-free: fetch, delegate to
//! the pure aggregation code, return. Calendar boundaries (today, week,
//! month) are taken in the configured zone; the calendar week starts Monday.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use uuid::Uuid;

use crate::analytics;
use crate::error::TrendError;
use crate::models::{
    AggregateSummary, CategoryStats, DailyBucket, Overview, Period, PlaceAggregate, Report,
    ScoreBucket, TrendingCategory, WindowSpec,
};
use crate::series;
use crate::store::{EventStore, ReportStore};

pub const TOP_OF_WEEK_LIMIT: usize = 10;
pub const BEST_ALL_TIME_LIMIT: usize = 20;
pub const SERIES_DAYS: u64 = 30;
pub const TRENDING_WINDOW_DAYS: i64 = 7;
pub const RECENT_REPORTS_LIMIT: i64 = 10;

pub struct TrendService {
    events: Arc<dyn EventStore>,
    reports: Arc<dyn ReportStore>,
    tz: FixedOffset,
}

fn local_midnight_utc(date: NaiveDate, tz: FixedOffset) -> DateTime<Utc> {
    let naive_utc = date.and_time(NaiveTime::MIN) - Duration::seconds(tz.local_minus_utc() as i64);
    DateTime::from_naive_utc_and_offset(naive_utc, Utc)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

impl TrendService {
    pub fn new(events: Arc<dyn EventStore>, reports: Arc<dyn ReportStore>, tz: FixedOffset) -> Self {
        Self {
            events,
            reports,
            tz,
        }
    }

    async fn events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category_filter: Option<String>,
    ) -> Result<Vec<crate::models::RatingEvent>, TrendError> {
        if start >= end {
            // degenerate range right at a boundary instant, nothing to fetch
            return Ok(Vec::new());
        }
        let window = WindowSpec::new(start, end, category_filter)?;
        self.events.events_in_range(&window).await
    }

    /// Full aggregate summary for a caller-supplied window. The window comes
    /// in pre-validated through [`WindowSpec::new`], so reversed bounds are
    /// rejected before any fetch happens.
    pub async fn summary(&self, window: &WindowSpec) -> Result<AggregateSummary, TrendError> {
        let events = self.events.events_in_range(window).await?;
        Ok(analytics::aggregate(&events, window))
    }

    /// Today / this-week / this-month counters plus grand totals.
    pub async fn overview(&self, now: DateTime<Utc>) -> Result<Overview, TrendError> {
        let today = now.with_timezone(&self.tz).date_naive();
        let today_start = local_midnight_utc(today, self.tz);
        let week_start = local_midnight_utc(today.week(Weekday::Mon).first_day(), self.tz);
        let month_start = local_midnight_utc(month_start(today), self.tz);

        let earliest = today_start.min(week_start).min(month_start);
        let events = self.events_between(earliest, now, None).await?;

        let mut today_count = 0;
        let mut week_count = 0;
        let mut month_count = 0;
        for event in &events {
            if event.occurred_at >= today_start {
                today_count += 1;
            }
            if event.occurred_at >= week_start {
                week_count += 1;
            }
            if event.occurred_at >= month_start {
                month_count += 1;
            }
        }

        Ok(Overview {
            today_count,
            week_count,
            month_count,
            total_events: self.events.count_events().await?,
            total_places: self.events.count_places().await?,
        })
    }

    /// Most active places of the current calendar week, limit 10.
    pub async fn top_of_week(
        &self,
        category_filter: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlaceAggregate>, TrendError> {
        let today = now.with_timezone(&self.tz).date_naive();
        let week_start = local_midnight_utc(today.week(Weekday::Mon).first_day(), self.tz);
        let events = self.events_between(week_start, now, category_filter).await?;
        Ok(analytics::rank_by_activity(
            analytics::aggregate_places(&events),
            TOP_OF_WEEK_LIMIT,
        ))
    }

    /// Best rated places of all time (minimum 3 events), limit 20.
    pub async fn best_all_time(
        &self,
        category_filter: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<PlaceAggregate>, TrendError> {
        let events = self
            .events_between(DateTime::UNIX_EPOCH, now, category_filter)
            .await?;
        Ok(analytics::rank_by_quality(
            analytics::aggregate_places(&events),
            BEST_ALL_TIME_LIMIT,
        ))
    }

    /// One row per catalog category, zero-event categories included.
    pub async fn category_stats(&self, now: DateTime<Utc>) -> Result<Vec<CategoryStats>, TrendError> {
        let places = self.events.places().await?;
        let events = self.events_between(DateTime::UNIX_EPOCH, now, None).await?;
        Ok(analytics::category_stats(&places, &events))
    }

    /// Dense trailing 30-day series, one bucket per local calendar day.
    pub async fn series_30_days(
        &self,
        category_filter: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyBucket>, TrendError> {
        let today = now.with_timezone(&self.tz).date_naive();
        let start_date = today - Duration::days(SERIES_DAYS as i64 - 1);
        let events = self
            .events_between(local_midnight_utc(start_date, self.tz), now, category_filter)
            .await?;
        let sparse = series::bucket_daily(&events, self.tz);
        Ok(series::fill_daily_series(&sparse, start_date, SERIES_DAYS))
    }

    /// Score distribution over all time, always all five buckets.
    pub async fn histogram(
        &self,
        category_filter: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<[ScoreBucket; 5], TrendError> {
        let events = self
            .events_between(DateTime::UNIX_EPOCH, now, category_filter)
            .await?;
        Ok(analytics::histogram(&events))
    }

    /// Category with the most events in the trailing seven days. `None` is
    /// the explicit sentinel for an empty window.
    pub async fn trending_category(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<TrendingCategory>, TrendError> {
        let events = self
            .events_between(now - Duration::days(TRENDING_WINDOW_DAYS), now, None)
            .await?;
        Ok(analytics::trending_category(&events))
    }

    /// Most recent snapshots for one user and period, newest first.
    pub async fn reports_by_user_and_period(
        &self,
        user_id: Uuid,
        period: Period,
    ) -> Result<Vec<Report>, TrendError> {
        self.reports
            .recent_by_user_and_period(user_id, period, RECENT_REPORTS_LIMIT)
            .await
    }
}
