/// Task writes with the expiry policy
///
/// Tasks are immutable once expired: today's local date is strictly after
/// their deadline's local date, or after their `date` when they have no
/// deadline. Every write loads its targets first and checks them before
/// touching the store; a batch is rejected as a whole if any target fails.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::clock::{Clock, DayBoundary};
use crate::error::{CoreError, CoreResult};
use crate::graph::AccountGroup;
use crate::models::{NewTask, Task, TaskPatch};
use crate::store::Store;

/// Result of a batch update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Distinct tasks that passed the checks
    pub matched: u64,

    /// Rows the store wrote
    pub modified: u64,
}

/// Creates, updates and deletes tasks
#[derive(Clone)]
pub struct TaskMutator {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    boundary: DayBoundary,
}

impl TaskMutator {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, boundary: DayBoundary) -> Self {
        Self {
            store,
            clock,
            boundary,
        }
    }

    /// Creates a task owned by `actor`
    ///
    /// # Errors
    ///
    /// `Validation` for bad title/description, `PastDate` when the task's
    /// date is before today.
    pub async fn create(&self, actor: Uuid, data: NewTask) -> CoreResult<Task> {
        let data = data.normalized();
        data.validate()?;

        if data.date < self.boundary.today(self.clock.as_ref()) {
            return Err(CoreError::PastDate);
        }

        let task = self.store.create_task(actor, data, self.clock.now()).await?;
        info!(task_id = %task.id, user_id = %actor, date = %task.date, "Task created");
        Ok(task)
    }

    /// Applies `patch` to one task the actor created
    ///
    /// # Errors
    ///
    /// `TaskNotFound` when the task is outside `group`, `NotTaskOwner` when
    /// `actor` did not create it, `TaskExpired` when it has expired.
    pub async fn update(
        &self,
        actor: Uuid,
        group: &AccountGroup,
        id: Uuid,
        patch: TaskPatch,
    ) -> CoreResult<Task> {
        let patch = patch.normalized();
        patch.validate()?;

        let task = self.load_mutable(actor, group, id).await?;
        self.store
            .update_tasks(&[task.id], &patch, self.clock.now())
            .await?;

        debug!(task_id = %id, ?patch, "Task updated");
        self.store
            .find_task_in_group(id, group.ids())
            .await?
            .ok_or(CoreError::TaskNotFound)
    }

    /// Deletes one task the actor created
    pub async fn delete(&self, actor: Uuid, group: &AccountGroup, id: Uuid) -> CoreResult<()> {
        self.load_mutable(actor, group, id).await?;

        if !self.store.delete_task(id).await? {
            return Err(CoreError::TaskNotFound);
        }
        info!(task_id = %id, user_id = %actor, "Task deleted");
        Ok(())
    }

    /// Applies one patch to many tasks, all or nothing
    ///
    /// Every id must belong to `group` and none may be expired; otherwise
    /// nothing is written.
    pub async fn batch_update(
        &self,
        group: &AccountGroup,
        ids: &[Uuid],
        patch: TaskPatch,
    ) -> CoreResult<BatchOutcome> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(CoreError::EmptyBatch);
        }

        let patch = patch.normalized();
        patch.validate()?;

        let tasks = self.store.find_tasks_in_group(&ids, group.ids()).await?;
        if tasks.len() != ids.len() {
            return Err(CoreError::TaskNotFound);
        }

        let today = self.boundary.today(self.clock.as_ref());
        if let Some(expired) = tasks.iter().find(|t| t.is_expired(today, &self.boundary)) {
            debug!(task_id = %expired.id, "Batch rejected, task expired");
            return Err(CoreError::TaskExpired);
        }

        let modified = self.store.update_tasks(&ids, &patch, self.clock.now()).await?;
        info!(matched = tasks.len(), modified, "Batch task update applied");

        Ok(BatchOutcome {
            matched: tasks.len() as u64,
            modified,
        })
    }

    async fn load_mutable(&self, actor: Uuid, group: &AccountGroup, id: Uuid) -> CoreResult<Task> {
        let task = self
            .store
            .find_task_in_group(id, group.ids())
            .await?
            .ok_or(CoreError::TaskNotFound)?;

        if task.user_id != actor {
            return Err(CoreError::NotTaskOwner);
        }

        if task.is_expired(self.boundary.today(self.clock.as_ref()), &self.boundary) {
            return Err(CoreError::TaskExpired);
        }

        Ok(task)
    }
}
