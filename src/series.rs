//! Daily bucketing and gap-filling for the 30-day trend series.

use std::collections::BTreeMap;

use chrono::{Days, FixedOffset, NaiveDate};

use crate::models::{DailyBucket, RatingEvent};

/// Bucket events by calendar day in the given zone. Output is sparse (days
/// with no events are absent) and ascending by date.
pub fn bucket_daily(events: &[RatingEvent], tz: FixedOffset) -> Vec<DailyBucket> {
    let mut by_day: BTreeMap<NaiveDate, (u64, i64)> = BTreeMap::new();

    for event in events {
        let date = event.occurred_at.with_timezone(&tz).date_naive();
        let entry = by_day.entry(date).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += event.score as i64;
    }

    by_day
        .into_iter()
        .map(|(date, (count, score_sum))| DailyBucket {
            date,
            event_count: count,
            mean_score: score_sum as f64 / count as f64,
        })
        .collect()
}

/// Normalize a sparse series into exactly `days` buckets, one per date from
/// `start` onward in ascending order. Missing days are synthesized with a
/// zero count and a `0.0` sentinel mean. Filling an already-dense series
/// returns it unchanged.
pub fn fill_daily_series(sparse: &[DailyBucket], start: NaiveDate, days: u64) -> Vec<DailyBucket> {
    let by_date: BTreeMap<NaiveDate, &DailyBucket> =
        sparse.iter().map(|bucket| (bucket.date, bucket)).collect();

    (0..days)
        .filter_map(|offset| start.checked_add_days(Days::new(offset)))
        .map(|date| match by_date.get(&date) {
            Some(bucket) => (*bucket).clone(),
            None => DailyBucket {
                date,
                event_count: 0,
                mean_score: 0.0,
            },
        })
        .collect()
}
