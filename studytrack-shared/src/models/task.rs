/// Task model and database operations
///
/// A task is a unit of study work that belongs to one calendar day. Tasks are
/// owned by the account that created them but are always read through an
/// account-group scope, so every query here takes the group's id list.
///
/// # Expiry
///
/// A task is expired once today's local date is strictly after the local date
/// of its deadline, or of its `date` when it has no deadline. Expired tasks
/// are immutable.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_subject AS ENUM (
///     'chinese', 'math', 'english', 'dance', 'sports',
///     'reading', 'programming', 'habit_building', 'other'
/// );
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
///     title VARCHAR(100) NOT NULL,
///     description VARCHAR(500) NOT NULL DEFAULT '',
///     subject task_subject NOT NULL,
///     date DATE NOT NULL,
///     deadline TIMESTAMPTZ,
///     is_completed BOOLEAN NOT NULL DEFAULT FALSE,
///     completed_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use studytrack_shared::models::task::{Task, TaskPatch};
/// use studytrack_shared::db::pool::{create_pool, DatabaseConfig};
/// use chrono::Utc;
/// use uuid::Uuid;
///
/// # async fn example(task_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let patch = TaskPatch { is_completed: Some(true), ..Default::default() };
/// Task::update_many(&pool, &[task_id], &patch, Utc::now()).await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::clock::DayBoundary;
use crate::error::CoreError;

/// Fixed set of study subjects
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "task_subject", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Chinese,
    Math,
    English,
    Dance,
    Sports,
    Reading,
    Programming,
    HabitBuilding,
    Other,
}

impl Subject {
    pub const ALL: [Subject; 9] = [
        Subject::Chinese,
        Subject::Math,
        Subject::English,
        Subject::Dance,
        Subject::Sports,
        Subject::Reading,
        Subject::Programming,
        Subject::HabitBuilding,
        Subject::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Chinese => "chinese",
            Subject::Math => "math",
            Subject::English => "english",
            Subject::Dance => "dance",
            Subject::Sports => "sports",
            Subject::Reading => "reading",
            Subject::Programming => "programming",
            Subject::HabitBuilding => "habit_building",
            Subject::Other => "other",
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subject {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Subject::ALL
            .into_iter()
            .find(|subject| subject.as_str() == wanted)
            .ok_or_else(|| CoreError::UnknownSubject(s.to_string()))
    }
}

/// Task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,

    /// Creating account
    pub user_id: Uuid,

    pub title: String,

    pub description: String,

    pub subject: Subject,

    /// Local calendar day the task belongs to
    pub date: NaiveDate,

    pub deadline: Option<DateTime<Utc>>,

    pub is_completed: bool,

    /// Set exactly while `is_completed` is true
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Local day after which the task becomes immutable
    pub fn effective_due_date(&self, boundary: &DayBoundary) -> NaiveDate {
        match self.deadline {
            Some(deadline) => boundary.local_date(deadline),
            None => self.date,
        }
    }

    /// True when `today` is strictly after the task's due day
    pub fn is_expired(&self, today: NaiveDate, boundary: &DayBoundary) -> bool {
        self.effective_due_date(boundary) < today
    }

    /// Applies a patch in place, following the completion stamping rule
    ///
    /// - `is_completed` false → true stamps `completed_at = now`
    /// - `is_completed` → false clears `completed_at`
    /// - true → true, or no `is_completed` in the patch, leaves it untouched
    pub fn apply_patch(&mut self, patch: &TaskPatch, now: DateTime<Utc>) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(subject) = patch.subject {
            self.subject = subject;
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = deadline;
        }
        match patch.is_completed {
            Some(true) if !self.is_completed => {
                self.is_completed = true;
                self.completed_at = Some(now);
            }
            Some(false) => {
                self.is_completed = false;
                self.completed_at = None;
            }
            _ => {}
        }
        self.updated_at = now;
    }
}

/// Input for creating a task
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewTask {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: String,

    pub subject: Subject,

    pub date: NaiveDate,

    pub deadline: Option<DateTime<Utc>>,
}

impl NewTask {
    /// Trims free-text fields before validation
    pub fn normalized(mut self) -> Self {
        self.title = self.title.trim().to_string();
        self.description = self.description.trim().to_string();
        self
    }
}

/// Partial update for one or many tasks
///
/// `deadline: Some(None)` clears the deadline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct TaskPatch {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: Option<String>,

    pub subject: Option<Subject>,

    pub deadline: Option<Option<DateTime<Utc>>>,

    pub is_completed: Option<bool>,
}

impl TaskPatch {
    /// Trims free-text fields before validation
    pub fn normalized(mut self) -> Self {
        self.title = self.title.map(|t| t.trim().to_string());
        self.description = self.description.map(|d| d.trim().to_string());
        self
    }
}

pub(crate) const TASK_COLUMNS: &str = "id, user_id, title, description, subject, date, deadline, \
                            is_completed, completed_at, created_at, updated_at";

impl Task {
    /// Inserts a task owned by `user_id`
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        data: NewTask,
        now: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(&format!(
            r#"
            INSERT INTO tasks (user_id, title, description, subject, date, deadline,
                               is_completed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
            RETURNING {}
            "#,
            TASK_COLUMNS
        ))
        .bind(user_id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.subject)
        .bind(data.date)
        .bind(data.deadline)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(task)
    }

    /// Finds a task visible to an account group
    pub async fn find_in_group(
        pool: &PgPool,
        id: Uuid,
        group: &[Uuid],
    ) -> Result<Option<Self>, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE id = $1 AND user_id = ANY($2)",
            TASK_COLUMNS
        ))
        .bind(id)
        .bind(group)
        .fetch_optional(pool)
        .await?;

        Ok(task)
    }

    /// Loads the subset of `ids` visible to an account group
    pub async fn find_many_in_group(
        pool: &PgPool,
        ids: &[Uuid],
        group: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks WHERE id = ANY($1) AND user_id = ANY($2)",
            TASK_COLUMNS
        ))
        .bind(ids)
        .bind(group)
        .fetch_all(pool)
        .await?;

        Ok(tasks)
    }

    /// Lists a group's tasks in an inclusive date range
    ///
    /// Ordered by date, then creation time.
    pub async fn list_in_range(
        pool: &PgPool,
        group: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let tasks = sqlx::query_as::<_, Task>(&format!(
            r#"
            SELECT {}
            FROM tasks
            WHERE user_id = ANY($1) AND date >= $2 AND date <= $3
            ORDER BY date ASC, created_at ASC
            "#,
            TASK_COLUMNS
        ))
        .bind(group)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(tasks)
    }

    /// Applies one patch to many tasks in a single statement
    ///
    /// Mirrors [`Task::apply_patch`]. Returns the number of rows touched.
    pub async fn update_many(
        pool: &PgPool,
        ids: &[Uuid],
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                subject = COALESCE($4, subject),
                deadline = CASE WHEN $5 THEN $6 ELSE deadline END,
                is_completed = COALESCE($7, is_completed),
                completed_at = CASE
                    WHEN $7 IS NULL THEN completed_at
                    WHEN $7 AND is_completed THEN completed_at
                    WHEN $7 THEN $8
                    ELSE NULL
                END,
                updated_at = $8
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(patch.title.as_deref())
        .bind(patch.description.as_deref())
        .bind(patch.subject)
        .bind(patch.deadline.is_some())
        .bind(patch.deadline.flatten())
        .bind(patch.is_completed)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes a task
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn task(on: NaiveDate) -> Task {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Read chapter 3".to_string(),
            description: String::new(),
            subject: Subject::Reading,
            date: on,
            deadline: None,
            is_completed: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_subject_round_trip_names() {
        for subject in Subject::ALL {
            assert_eq!(subject.as_str().parse::<Subject>().unwrap(), subject);
        }
        assert_eq!(" Habit_Building ".parse::<Subject>().unwrap(), Subject::HabitBuilding);
        assert!(matches!(
            "astrology".parse::<Subject>(),
            Err(CoreError::UnknownSubject(_))
        ));
    }

    #[test]
    fn test_expiry_by_date() {
        let boundary = DayBoundary::utc();
        let t = task(date(2025, 3, 1));
        assert!(!t.is_expired(date(2025, 3, 1), &boundary));
        assert!(t.is_expired(date(2025, 3, 2), &boundary));
    }

    #[test]
    fn test_expiry_prefers_deadline() {
        let boundary = DayBoundary::utc();
        let mut t = task(date(2025, 3, 1));
        t.deadline = Some(Utc.with_ymd_and_hms(2025, 3, 5, 18, 0, 0).unwrap());
        assert!(!t.is_expired(date(2025, 3, 5), &boundary));
        assert!(t.is_expired(date(2025, 3, 6), &boundary));

        // A deadline before the task date wins too
        t.deadline = Some(Utc.with_ymd_and_hms(2025, 2, 27, 18, 0, 0).unwrap());
        assert!(t.is_expired(date(2025, 3, 1), &boundary));
    }

    #[test]
    fn test_expiry_uses_local_day_of_deadline() {
        // 17:00 UTC on the 5th is already the 6th in UTC+8
        let boundary = DayBoundary::from_offset_minutes(8 * 60).unwrap();
        let mut t = task(date(2025, 3, 1));
        t.deadline = Some(Utc.with_ymd_and_hms(2025, 3, 5, 17, 0, 0).unwrap());
        assert_eq!(t.effective_due_date(&boundary), date(2025, 3, 6));
        assert!(!t.is_expired(date(2025, 3, 6), &boundary));
    }

    #[test]
    fn test_apply_patch_completion_rule() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let later = now + Duration::hours(2);
        let mut t = task(date(2025, 3, 1));

        let complete = TaskPatch {
            is_completed: Some(true),
            ..Default::default()
        };
        t.apply_patch(&complete, now);
        assert!(t.is_completed);
        assert_eq!(t.completed_at, Some(now));

        // Completing again keeps the original stamp
        t.apply_patch(&complete, later);
        assert_eq!(t.completed_at, Some(now));
        assert_eq!(t.updated_at, later);

        // Unrelated edits leave it alone
        let retitle = TaskPatch {
            title: Some("Read chapter 4".to_string()),
            ..Default::default()
        };
        t.apply_patch(&retitle, later);
        assert_eq!(t.completed_at, Some(now));
        assert_eq!(t.title, "Read chapter 4");

        let reopen = TaskPatch {
            is_completed: Some(false),
            ..Default::default()
        };
        t.apply_patch(&reopen, later);
        assert!(!t.is_completed);
        assert_eq!(t.completed_at, None);
    }

    #[test]
    fn test_apply_patch_clears_deadline() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let mut t = task(date(2025, 3, 1));
        t.deadline = Some(now);

        t.apply_patch(
            &TaskPatch {
                deadline: Some(None),
                ..Default::default()
            },
            now,
        );
        assert_eq!(t.deadline, None);
    }

    #[test]
    fn test_new_task_validation() {
        let data = NewTask {
            title: "   ".to_string(),
            description: String::new(),
            subject: Subject::Math,
            date: date(2025, 3, 1),
            deadline: None,
        }
        .normalized();
        assert!(data.validate().is_err());

        let data = NewTask {
            title: "  Fractions worksheet ".to_string(),
            description: "x".repeat(501),
            subject: Subject::Math,
            date: date(2025, 3, 1),
            deadline: None,
        }
        .normalized();
        assert_eq!(data.title, "Fractions worksheet");
        assert!(data.validate().is_err());
    }
}
