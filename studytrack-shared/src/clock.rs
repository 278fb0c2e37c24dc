/// Time source and local calendar-day arithmetic
///
/// All "today" decisions in the core (task expiry, streaks, past-date checks,
/// invitation expiry) go through a [`Clock`] so tests can pin time, and all
/// instant-to-day conversions go through a [`DayBoundary`] so that a task
/// stamped late in the evening is attributed to the local day rather than the
/// UTC day.
///
/// # Example
///
/// ```
/// use chrono::{NaiveDate, TimeZone, Utc};
/// use studytrack_shared::clock::DayBoundary;
///
/// // UTC+8: 20:00 UTC is already the next local day
/// let boundary = DayBoundary::from_offset_minutes(8 * 60).unwrap();
/// let instant = Utc.with_ymd_and_hms(2025, 3, 1, 20, 0, 0).unwrap();
/// assert_eq!(boundary.local_date(instant), NaiveDate::from_ymd_opt(2025, 3, 2).unwrap());
/// ```

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable instant, for tests and reports
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the clock to a new instant
    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    /// Moves the clock forward
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Maps instants onto local calendar days using a fixed UTC offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}

impl DayBoundary {
    /// Day boundary at UTC midnight
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Builds a boundary from an offset east of UTC in minutes
    ///
    /// Returns `None` when the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }

    /// Local calendar day of an instant
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Local calendar day of the clock's current instant
    pub fn today(&self, clock: &dyn Clock) -> NaiveDate {
        self.local_date(clock.now())
    }
}

/// First and last day of a calendar month
///
/// Returns `None` for an impossible year/month pair.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year.checked_add(1)?, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

/// Sunday-to-Saturday week containing `date`
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let from_sunday = date.weekday().num_days_from_sunday() as i64;
    let start = date - Duration::days(from_sunday);
    (start, start + Duration::days(6))
}
