//! Shared fixtures for the integration tests
//!
//! Services run over a `MemoryStore` with a `FixedClock` pinned to
//! Wednesday 2025-03-12 10:00 UTC.

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use studytrack_shared::aggregation::TaskAggregator;
use studytrack_shared::clock::{DayBoundary, FixedClock};
use studytrack_shared::graph::{AccountGroup, GroupResolver};
use studytrack_shared::invitations::InvitationManager;
use studytrack_shared::models::{Account, NewAccount, NewTask, Subject, Task, TaskPatch};
use studytrack_shared::mutation::TaskMutator;
use studytrack_shared::store::{AccountStore, MemoryStore, TaskStore};
use uuid::Uuid;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, 10, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn today() -> NaiveDate {
    date(2025, 3, 12)
}

pub fn days_ago(n: i64) -> NaiveDate {
    today() - Duration::days(n)
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: FixedClock,
    pub invitations: InvitationManager,
    pub resolver: GroupResolver,
    pub aggregator: TaskAggregator,
    pub mutator: TaskMutator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_lookback(30)
    }

    pub fn with_lookback(streak_lookback_days: u32) -> Self {
        Self::build(start(), DayBoundary::utc(), streak_lookback_days)
    }

    /// Clock at `now`, local days `offset_minutes` east of UTC
    pub fn with_offset(now: DateTime<Utc>, offset_minutes: i32) -> Self {
        let boundary = DayBoundary::from_offset_minutes(offset_minutes).expect("valid offset");
        Self::build(now, boundary, 30)
    }

    fn build(now: DateTime<Utc>, boundary: DayBoundary, streak_lookback_days: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = FixedClock::new(now);

        Self {
            invitations: InvitationManager::new(
                store.clone(),
                Arc::new(clock.clone()),
                Duration::days(7),
            ),
            resolver: GroupResolver::new(store.clone()),
            aggregator: TaskAggregator::new(
                store.clone(),
                Arc::new(clock.clone()),
                boundary,
                streak_lookback_days,
            ),
            mutator: TaskMutator::new(store.clone(), Arc::new(clock.clone()), boundary),
            store,
            clock,
        }
    }

    pub async fn master(&self, email: &str) -> Account {
        self.store
            .create_account(NewAccount::new(email))
            .await
            .expect("create account")
    }

    /// Links `email` under `master` through the invitation flow
    pub async fn linked_sub(&self, master: &Account, email: &str) -> Account {
        let ticket = self
            .invitations
            .invite(master.id, email)
            .await
            .expect("invite");
        self.invitations
            .accept(&ticket.invite_token)
            .await
            .expect("accept")
    }

    pub async fn reload(&self, id: Uuid) -> Account {
        self.store
            .find_account(id)
            .await
            .expect("find account")
            .expect("account exists")
    }

    pub async fn group(&self, id: Uuid) -> AccountGroup {
        self.resolver.resolve_group(id).await
    }

    /// Inserts a task directly, bypassing the past-date check
    pub async fn seed_task(
        &self,
        owner: Uuid,
        on: NaiveDate,
        subject: Subject,
        completed: bool,
    ) -> Task {
        let task = self
            .store
            .create_task(owner, new_task("Practice", subject, on), self.clock_now())
            .await
            .expect("create task");

        if completed {
            let patch = TaskPatch {
                is_completed: Some(true),
                ..Default::default()
            };
            self.store
                .update_tasks(&[task.id], &patch, self.clock_now())
                .await
                .expect("complete task");
        }

        self.store
            .find_task_in_group(task.id, &[owner])
            .await
            .expect("find task")
            .expect("task exists")
    }

    /// Seeds `total` tasks on one day, the first `completed` of them done
    pub async fn seed_day(&self, owner: Uuid, on: NaiveDate, total: usize, completed: usize) {
        for i in 0..total {
            self.seed_task(owner, on, Subject::Math, i < completed).await;
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use studytrack_shared::clock::Clock;
        self.clock.now()
    }
}

pub fn new_task(title: &str, subject: Subject, on: NaiveDate) -> NewTask {
    NewTask {
        title: title.to_string(),
        description: String::new(),
        subject,
        date: on,
        deadline: None,
    }
}
