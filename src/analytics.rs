//! Windowed statistics over rating events.
//!
//! Everything in this module is a pure, synchronous transform over
//! already-fetched data. Given identical input the output is identical down
//! to ordering, which the ranking tie-breaks below guarantee.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::models::{
    AggregateSummary, CategoryBreakdown, CategoryStats, PlaceAggregate, PlaceRecord, RatingEvent,
    ScoreBucket, TrendingCategory, WindowSpec,
};

/// Histogram bucket labels, highest range first. Buckets are half-open score
/// ranges: `[9,10]`, `[7,9)`, `[5,7)`, `[3,5)`, `[0,3)`.
pub const HISTOGRAM_LABELS: [&str; 5] = ["9-10", "7-8", "5-6", "3-4", "0-2"];

/// Minimum events a place needs before it is eligible for quality ranking.
/// Guards against a single 10/10 review dominating the leaderboard.
pub const QUALITY_RANKING_FLOOR: u64 = 3;

fn bucket_index(score: i32) -> usize {
    match score {
        s if s >= 9 => 0,
        s if s >= 7 => 1,
        s if s >= 5 => 2,
        s if s >= 3 => 3,
        _ => 4,
    }
}

fn empty_histogram() -> [ScoreBucket; 5] {
    HISTOGRAM_LABELS.map(|label| ScoreBucket { label, count: 0 })
}

/// Count events per fixed score bucket. All five labels are always present,
/// and the counts sum to the number of input events.
pub fn histogram(events: &[RatingEvent]) -> [ScoreBucket; 5] {
    let mut buckets = empty_histogram();
    for event in events {
        buckets[bucket_index(event.score)].count += 1;
    }
    buckets
}

/// Group events by place. Output is ordered by place id so downstream
/// rankings start from a deterministic base.
pub fn aggregate_places(events: &[RatingEvent]) -> Vec<PlaceAggregate> {
    let mut by_place: BTreeMap<uuid::Uuid, (u64, i64, &RatingEvent)> = BTreeMap::new();

    for event in events {
        let entry = by_place.entry(event.place_id).or_insert((0, 0, event));
        entry.0 += 1;
        entry.1 += event.score as i64;
    }

    by_place
        .into_iter()
        .map(|(place_id, (count, score_sum, sample))| PlaceAggregate {
            place_id,
            name: sample.place_name.clone(),
            category: sample.category.clone(),
            address: sample.address.clone(),
            event_count: count,
            mean_score: if count == 0 {
                None
            } else {
                Some(score_sum as f64 / count as f64)
            },
        })
        .collect()
}

/// "Best rated" ranking: mean score descending, event count descending, then
/// place id ascending. Places below [`QUALITY_RANKING_FLOOR`] are excluded.
pub fn rank_by_quality(mut aggregates: Vec<PlaceAggregate>, limit: usize) -> Vec<PlaceAggregate> {
    aggregates.retain(|agg| agg.event_count >= QUALITY_RANKING_FLOOR);
    aggregates.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.event_count.cmp(&a.event_count))
            .then(a.place_id.cmp(&b.place_id))
    });
    aggregates.truncate(limit);
    aggregates
}

/// "Most active" ranking: event count descending, mean score descending, then
/// place id ascending. No minimum-sample floor.
pub fn rank_by_activity(mut aggregates: Vec<PlaceAggregate>, limit: usize) -> Vec<PlaceAggregate> {
    aggregates.sort_by(|a, b| {
        b.event_count
            .cmp(&a.event_count)
            .then(
                b.mean_score
                    .partial_cmp(&a.mean_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.place_id.cmp(&b.place_id))
    });
    aggregates.truncate(limit);
    aggregates
}

/// Full windowed summary: total count, per-category breakdown, and the fixed
/// five-bucket histogram, all restricted to events the window includes.
pub fn aggregate(events: &[RatingEvent], window: &WindowSpec) -> AggregateSummary {
    struct CategoryAcc {
        places: BTreeSet<uuid::Uuid>,
        users: HashSet<uuid::Uuid>,
        event_count: u64,
        score_sum: i64,
    }

    let mut total_count = 0u64;
    let mut histogram = empty_histogram();
    let mut by_category: BTreeMap<String, CategoryAcc> = BTreeMap::new();

    for event in events.iter().filter(|e| window.includes(e)) {
        total_count += 1;
        histogram[bucket_index(event.score)].count += 1;

        let acc = by_category
            .entry(event.category.clone())
            .or_insert_with(|| CategoryAcc {
                places: BTreeSet::new(),
                users: HashSet::new(),
                event_count: 0,
                score_sum: 0,
            });
        acc.places.insert(event.place_id);
        acc.users.insert(event.user_id);
        acc.event_count += 1;
        acc.score_sum += event.score as i64;
    }

    let category_breakdown = by_category
        .into_iter()
        .map(|(category, acc)| {
            (
                category,
                CategoryBreakdown {
                    place_count: acc.places.len() as u64,
                    event_count: acc.event_count,
                    mean_score: Some(acc.score_sum as f64 / acc.event_count as f64),
                    unique_users: acc.users.len() as u64,
                },
            )
        })
        .collect();

    AggregateSummary {
        total_count,
        category_breakdown,
        histogram,
    }
}

/// Per-category statistics including catalog categories with zero events,
/// mirroring a left join from places onto events. Ordered by event count
/// descending with category name as the tie-break.
pub fn category_stats(places: &[PlaceRecord], events: &[RatingEvent]) -> Vec<CategoryStats> {
    struct CategoryAcc {
        place_count: u64,
        event_count: u64,
        score_sum: i64,
        users: HashSet<uuid::Uuid>,
    }

    let mut by_category: BTreeMap<String, CategoryAcc> = BTreeMap::new();
    let blank = || CategoryAcc {
        place_count: 0,
        event_count: 0,
        score_sum: 0,
        users: HashSet::new(),
    };

    for place in places {
        by_category
            .entry(place.category.clone())
            .or_insert_with(blank)
            .place_count += 1;
    }

    for event in events {
        let acc = by_category.entry(event.category.clone()).or_insert_with(blank);
        acc.event_count += 1;
        acc.score_sum += event.score as i64;
        acc.users.insert(event.user_id);
    }

    let mut rows: Vec<CategoryStats> = by_category
        .into_iter()
        .map(|(category, acc)| CategoryStats {
            category,
            place_count: acc.place_count,
            event_count: acc.event_count,
            mean_score: if acc.event_count == 0 {
                None
            } else {
                Some(acc.score_sum as f64 / acc.event_count as f64)
            },
            unique_users: acc.users.len() as u64,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.event_count
            .cmp(&a.event_count)
            .then_with(|| a.category.cmp(&b.category))
    });
    rows
}

/// The category with the most events, or `None` when there are no events at
/// all. Ties resolve to the lexicographically first category name.
pub fn trending_category(events: &[RatingEvent]) -> Option<TrendingCategory> {
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for event in events {
        *counts.entry(event.category.as_str()).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(category, event_count)| TrendingCategory {
            category: category.to_string(),
            event_count,
        })
}
