//! Weekly aggregation of issue open/close events.
//!
//! Every issue contributes one open event at `created_at` and, once closed, one close
//! event at `closed_at`. Events are counted into contiguous calendar-week buckets and a
//! running open count is carried across them.

use crate::error::ReportError;
use crate::types::{IssueRecord, IssueState};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::Serialize;

/// Activity for one calendar week.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WeekBucket {
    /// First day of the week.
    pub week_start: NaiveDate,
    /// Issues created during the week.
    pub opened_count: u64,
    /// Issues closed during the week.
    pub closed_count: u64,
    /// Issues opened but not yet closed as of the end of the week.
    pub cumulative_open: i64,
}

/// Totals across a bucket sequence.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeeklySummary {
    pub total_opened: u64,
    pub total_closed: u64,
    pub currently_open: i64,
}

impl WeeklySummary {
    pub fn from_buckets(buckets: &[WeekBucket]) -> Self {
        Self {
            total_opened: buckets.iter().map(|b| b.opened_count).sum(),
            total_closed: buckets.iter().map(|b| b.closed_count).sum(),
            currently_open: buckets.last().map_or(0, |b| b.cumulative_open),
        }
    }
}

/// Maps a timestamp to the start date of its week, with weeks beginning on `anchor` at
/// 00:00 UTC.
pub fn week_start(timestamp: DateTime<Utc>, anchor: Weekday) -> NaiveDate {
    let date = timestamp.date_naive();
    let offset =
        (7 + date.weekday().num_days_from_monday() - anchor.num_days_from_monday()) % 7;
    date - Duration::days(i64::from(offset))
}

/// Rejects records that cannot be aggregated consistently.
pub fn validate(records: &[IssueRecord]) -> Result<(), ReportError> {
    for record in records {
        match (record.state, record.closed_at) {
            (_, Some(closed_at)) if closed_at < record.created_at => {
                return Err(ReportError::Data(format!(
                    "issue #{} closed at {} before it was created at {}",
                    record.number, closed_at, record.created_at
                )));
            }
            (IssueState::Closed, None) => {
                return Err(ReportError::Data(format!(
                    "issue #{} is closed but has no closing timestamp",
                    record.number
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Buckets issue activity into contiguous weeks.
///
/// The range runs from the week of the earliest `created_at` through the week holding the
/// latest of `today`, any `closed_at` and any `created_at`. Weeks without activity are
/// still emitted. An empty input yields an empty sequence.
///
/// # Arguments
/// * `records` - Every issue fetched for the repository, in any order.
/// * `today` - The run's reference time; the sequence always reaches its week.
/// * `anchor` - The weekday each bucket starts on.
pub fn aggregate_weekly(
    records: &[IssueRecord],
    today: DateTime<Utc>,
    anchor: Weekday,
) -> Result<Vec<WeekBucket>, ReportError> {
    let Some(first_created) = records.iter().map(|r| r.created_at).min() else {
        return Ok(Vec::new());
    };

    validate(records)?;

    let last_activity = records
        .iter()
        .flat_map(|r| std::iter::once(r.created_at).chain(r.closed_at))
        .fold(today, |latest, t| latest.max(t));

    let first_week = week_start(first_created, anchor);
    let last_week = week_start(last_activity, anchor);
    let week_count = (last_week - first_week).num_weeks() + 1;

    let mut buckets: Vec<WeekBucket> = (0..week_count)
        .map(|i| WeekBucket {
            week_start: first_week + Duration::weeks(i),
            opened_count: 0,
            closed_count: 0,
            cumulative_open: 0,
        })
        .collect();

    // Every event falls on or after `first_week` and on or before `last_week`.
    let index_of = |timestamp: DateTime<Utc>| -> usize {
        (week_start(timestamp, anchor) - first_week).num_weeks() as usize
    };

    for record in records {
        buckets[index_of(record.created_at)].opened_count += 1;
        if let Some(closed_at) = record.closed_at {
            buckets[index_of(closed_at)].closed_count += 1;
        }
    }

    let mut running: i64 = 0;
    for bucket in &mut buckets {
        running += bucket.opened_count as i64 - bucket.closed_count as i64;
        if running < 0 {
            return Err(ReportError::Data(format!(
                "more issues closed than opened by the week of {}",
                bucket.week_start
            )));
        }
        bucket.cumulative_open = running;
    }

    Ok(buckets)
}
