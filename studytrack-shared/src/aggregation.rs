/// Derived views over an account group's tasks
///
/// Every operation takes a pre-resolved [`AccountGroup`] and reads only tasks
/// created by its members. Results are plain serde structs for the
/// presentation layer.
///
/// # Completion rate
///
/// Rates are percentages rounded to one decimal place, and `0.0` when there
/// are no tasks.
///
/// # Streak
///
/// Walks backward from today. A day with no tasks ends the walk (a missing
/// day is a break, not a skip), so a student who has logged nothing today has
/// a streak of zero. Days whose tasks are all completed count. The walk is
/// bounded by the configured lookback and returns the partial count when the
/// bound is reached.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::clock::{month_bounds, week_bounds, Clock, DayBoundary};
use crate::error::{CoreError, CoreResult};
use crate::graph::AccountGroup;
use crate::models::{Subject, Task};
use crate::store::Store;

/// Completion state of one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    /// Every task done
    Completed,

    /// Some tasks done
    Partial,

    /// Nothing done yet
    Pending,
}

impl DayStatus {
    /// Status for a day with `total > 0` tasks
    pub fn from_counts(total: u32, completed: u32) -> Self {
        if completed == 0 {
            DayStatus::Pending
        } else if completed >= total {
            DayStatus::Completed
        } else {
            DayStatus::Partial
        }
    }
}

/// Task counts for one subject
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub total: u32,
    pub completed: u32,
}

impl Tally {
    fn add(&mut self, task: &Task) {
        self.total += 1;
        if task.is_completed {
            self.completed += 1;
        }
    }

    pub fn completion_rate(&self) -> f64 {
        completion_rate(self.completed, self.total)
    }

    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// One non-empty day of a calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub total: u32,
    pub completed: u32,
    pub status: DayStatus,
    pub subjects: BTreeMap<Subject, Tally>,
}

/// Per-subject statistics with their own rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectStats {
    pub total: u32,
    pub completed: u32,
    pub completion_rate: f64,
}

impl From<Tally> for SubjectStats {
    fn from(tally: Tally) -> Self {
        Self {
            total: tally.total,
            completed: tally.completed,
            completion_rate: tally.completion_rate(),
        }
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Aggregate over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: u32,
    pub completed: u32,
    pub completion_rate: f64,
    pub subjects: BTreeMap<Subject, SubjectStats>,
    pub date_range: DateRange,
}

/// Calendar period relative to today
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Sunday through Saturday
    Week,
    Month,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Week => f.write_str("week"),
            Period::Month => f.write_str("month"),
        }
    }
}

impl FromStr for Period {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            other => Err(CoreError::Validation(format!("unknown period: {}", other))),
        }
    }
}

/// Percentage rounded to one decimal, 0 when `total` is 0
pub fn completion_rate(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (f64::from(completed) * 1000.0 / f64::from(total)).round() / 10.0
}

/// Computes calendar rollups, statistics and streaks
#[derive(Clone)]
pub struct TaskAggregator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    boundary: DayBoundary,
    streak_lookback_days: u32,
}

impl TaskAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        boundary: DayBoundary,
        streak_lookback_days: u32,
    ) -> Self {
        Self {
            store,
            clock,
            boundary,
            streak_lookback_days,
        }
    }

    /// Per-day rollup of a month; days without tasks are omitted
    ///
    /// # Errors
    ///
    /// `InvalidDate` for an impossible year/month.
    pub async fn calendar_rollup(
        &self,
        group: &AccountGroup,
        year: i32,
        month: u32,
    ) -> CoreResult<Vec<DayRecord>> {
        let (start, end) = month_bounds(year, month)
            .ok_or_else(|| CoreError::InvalidDate(format!("{:04}-{:02}", year, month)))?;

        let tasks = self.store.list_tasks_in_range(group.ids(), start, end).await?;

        let mut days: BTreeMap<NaiveDate, (Tally, BTreeMap<Subject, Tally>)> = BTreeMap::new();
        for task in &tasks {
            let (day, subjects) = days.entry(task.date).or_default();
            day.add(task);
            subjects.entry(task.subject).or_default().add(task);
        }

        debug!(year, month, days = days.len(), tasks = tasks.len(), "Built calendar rollup");

        Ok(days
            .into_iter()
            .map(|(date, (day, subjects))| DayRecord {
                date,
                total: day.total,
                completed: day.completed,
                status: DayStatus::from_counts(day.total, day.completed),
                subjects,
            })
            .collect())
    }

    /// Totals and completion rates over an inclusive range
    ///
    /// # Errors
    ///
    /// `InvalidRange` when `start` is after `end`.
    pub async fn range_stats(
        &self,
        group: &AccountGroup,
        start: NaiveDate,
        end: NaiveDate,
    ) -> CoreResult<StatsSummary> {
        if start > end {
            return Err(CoreError::InvalidRange { start, end });
        }

        let tasks = self.store.list_tasks_in_range(group.ids(), start, end).await?;

        let mut overall = Tally::default();
        let mut subjects: BTreeMap<Subject, Tally> = BTreeMap::new();
        for task in &tasks {
            overall.add(task);
            subjects.entry(task.subject).or_default().add(task);
        }

        Ok(StatsSummary {
            total: overall.total,
            completed: overall.completed,
            completion_rate: overall.completion_rate(),
            subjects: subjects
                .into_iter()
                .map(|(subject, tally)| (subject, SubjectStats::from(tally)))
                .collect(),
            date_range: DateRange { start, end },
        })
    }

    /// Consecutive fully-completed days ending today
    pub async fn streak_days(&self, group: &AccountGroup) -> CoreResult<u32> {
        if self.streak_lookback_days == 0 {
            return Ok(0);
        }

        let today = self.boundary.today(self.clock.as_ref());
        let earliest = today - Duration::days(i64::from(self.streak_lookback_days) - 1);
        let tasks = self
            .store
            .list_tasks_in_range(group.ids(), earliest, today)
            .await?;

        let mut by_day: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
        for task in &tasks {
            by_day.entry(task.date).or_default().add(task);
        }

        let mut streak = 0;
        let mut day = today;
        while day >= earliest {
            match by_day.get(&day) {
                Some(tally) if tally.all_completed() => streak += 1,
                _ => break,
            }
            day = match day.pred_opt() {
                Some(previous) => previous,
                None => break,
            };
        }

        debug!(%today, streak, "Computed streak");
        Ok(streak)
    }

    /// Tasks of one day, oldest first
    pub async fn tasks_on(&self, group: &AccountGroup, date: NaiveDate) -> CoreResult<Vec<Task>> {
        let mut tasks = self.store.list_tasks_in_range(group.ids(), date, date).await?;
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Statistics for the current week or month
    pub async fn period_stats(&self, group: &AccountGroup, period: Period) -> CoreResult<StatsSummary> {
        let today = self.boundary.today(self.clock.as_ref());
        let (start, end) = match period {
            Period::Week => week_bounds(today),
            Period::Month => month_bounds(today.year(), today.month())
                .ok_or_else(|| CoreError::InvalidDate(today.to_string()))?,
        };
        self.range_stats(group, start, end).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate_rounding() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(1, 3), 33.3);
        assert_eq!(completion_rate(2, 3), 66.7);
        assert_eq!(completion_rate(3, 4), 75.0);
        assert_eq!(completion_rate(5, 5), 100.0);
    }

    #[test]
    fn test_day_status() {
        assert_eq!(DayStatus::from_counts(4, 0), DayStatus::Pending);
        assert_eq!(DayStatus::from_counts(4, 3), DayStatus::Partial);
        assert_eq!(DayStatus::from_counts(4, 4), DayStatus::Completed);
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("Week".parse::<Period>().unwrap(), Period::Week);
        assert_eq!("month".parse::<Period>().unwrap(), Period::Month);
        assert!("year".parse::<Period>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(DayStatus::Partial).unwrap(), "partial");
    }
}
