use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TrendError;

/// A single rating event as read from the Event Store. Place metadata is
/// denormalized onto the record by the fetch join; the engine never writes
/// events back.
#[derive(Debug, Clone)]
pub struct RatingEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub place_id: Uuid,
    pub place_name: String,
    pub category: String,
    pub address: String,
    /// 0..=10 inclusive, enforced by the store schema.
    pub score: i32,
    pub occurred_at: DateTime<Utc>,
}

/// A row of the place catalog, used to count zero-event places per category.
#[derive(Debug, Clone)]
pub struct PlaceRecord {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub address: String,
}

/// Half-open time range `[start, end)` with an optional category filter.
#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub category_filter: Option<String>,
}

impl WindowSpec {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category_filter: Option<String>,
    ) -> Result<Self, TrendError> {
        if start >= end {
            return Err(TrendError::InvalidWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            category_filter,
        })
    }

    /// An event is included iff it falls in `[start, end)` and matches the
    /// category filter when one is set.
    pub fn includes(&self, event: &RatingEvent) -> bool {
        if event.occurred_at < self.start || event.occurred_at >= self.end {
            return false;
        }
        match &self.category_filter {
            Some(category) => event.category == *category,
            None => true,
        }
    }
}

/// Report cadence. Each period has its own fire instant and window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    Week,
    Weekend,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Week => "WEEK",
            Period::Weekend => "WEEKEND",
        }
    }

    /// Trailing window length in days when none is configured.
    pub fn default_window_days(&self) -> i64 {
        match self {
            Period::Week => 7,
            Period::Weekend => 3,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = TrendError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "WEEK" => Ok(Period::Week),
            "WEEKEND" => Ok(Period::Weekend),
            _ => Err(TrendError::UnknownPeriod(value.to_string())),
        }
    }
}

/// Per-place summary for one window. Derived fresh per query, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PlaceAggregate {
    pub place_id: Uuid,
    pub name: String,
    pub category: String,
    pub address: String,
    pub event_count: u64,
    /// `None` only when `event_count` is zero.
    pub mean_score: Option<f64>,
}

/// One calendar day of a daily series. Zero-event days carry an explicit
/// `0.0` mean so the series stays dense for charting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub event_count: u64,
    pub mean_score: f64,
}

/// One row of a frozen report payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub place_id: Uuid,
    pub event_count: u64,
    pub mean_score: f64,
}

/// A persisted ranking snapshot. Immutable after insert and owned by
/// `user_id`; the payload is a frozen JSON copy of the ranking, so later
/// changes to places or events never alter it.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub user_id: Uuid,
    pub period: Period,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Headline counters for the overview query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub today_count: u64,
    pub week_count: u64,
    pub month_count: u64,
    pub total_events: u64,
    pub total_places: u64,
}

/// Fixed score histogram bucket. The five labels are always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBucket {
    pub label: &'static str,
    pub count: u64,
}

/// Per-category slice of an aggregate summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    pub place_count: u64,
    pub event_count: u64,
    pub mean_score: Option<f64>,
    pub unique_users: u64,
}

/// Full windowed summary returned by the Aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateSummary {
    pub total_count: u64,
    pub category_breakdown: BTreeMap<String, CategoryBreakdown>,
    pub histogram: [ScoreBucket; 5],
}

/// One row of the category statistics table. Categories with places but no
/// events appear with zero counts and no mean.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryStats {
    pub category: String,
    pub place_count: u64,
    pub event_count: u64,
    pub mean_score: Option<f64>,
    pub unique_users: u64,
}

/// The category with the most events in the trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendingCategory {
    pub category: String,
    pub event_count: u64,
}
