/// Persistence seam for the core services
///
/// Services never talk to a database directly. They hold an
/// `Arc<dyn Store>` and call the async traits below, which are implemented by
/// [`PgStore`] (PostgreSQL through the models' SQL) and [`MemoryStore`]
/// (a single-lock in-memory double for tests and local tooling).
///
/// # Accepting invitations
///
/// Accepting is the one operation that must touch several records at once:
/// the invitation, the invitee's account and any invitations the invitee had
/// issued. Stores perform it as a single atomic unit through
/// [`InvitationStore::accept_invitation`], re-checking the graph rules under
/// their own lock or transaction with [`acceptance_check`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{LinkConflict, StoreError};
use crate::graph::link_conflict;
use crate::models::{
    Account, Invitation, InvitationStatus, NewAccount, NewInvitation, NewTask, Task, TaskPatch,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Account reads and writes
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_account(&self, data: NewAccount) -> StoreResult<Account>;

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>>;

    /// Lookup by email, case-insensitive
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Loads the accounts that exist among `ids`
    async fn find_accounts(&self, ids: &[Uuid]) -> StoreResult<Vec<Account>>;

    /// Makes a sub of `master_id` an independent master; false if it is not
    /// that master's sub at write time
    async fn detach_from_master(
        &self,
        id: Uuid,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Login bookkeeping for the auth layer
    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Account>>;
}

/// Invitation reads and state transitions
#[async_trait]
pub trait InvitationStore: Send + Sync {
    async fn create_invitation(&self, data: NewInvitation) -> StoreResult<Invitation>;

    async fn find_live_invitation_by_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>>;

    async fn find_live_invitation_for_email(
        &self,
        master_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>>;

    async fn list_live_invitations(
        &self,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Invitation>>;

    /// Compare-and-set from `pending`; None when already resolved
    async fn resolve_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>>;

    /// Marks overdue pending invitations expired, returning how many moved
    async fn expire_overdue_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Consumes a live invitation and links its invitee, atomically
    async fn accept_invitation(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<AcceptOutcome>;
}

/// Task reads and writes, always scoped to an account group
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(
        &self,
        user_id: Uuid,
        data: NewTask,
        now: DateTime<Utc>,
    ) -> StoreResult<Task>;

    async fn find_task_in_group(&self, id: Uuid, group: &[Uuid]) -> StoreResult<Option<Task>>;

    async fn find_tasks_in_group(&self, ids: &[Uuid], group: &[Uuid]) -> StoreResult<Vec<Task>>;

    /// Inclusive date range, ordered by date then creation time
    async fn list_tasks_in_range(
        &self,
        group: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<Task>>;

    /// One multi-row write; returns rows touched
    async fn update_tasks(
        &self,
        ids: &[Uuid],
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool>;
}

/// Everything the services need
pub trait Store: AccountStore + InvitationStore + TaskStore {}

impl<T: AccountStore + InvitationStore + TaskStore> Store for T {}

/// Result of [`InvitationStore::accept_invitation`]
#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    /// Invitation accepted; the linked sub-account
    Linked(Account),

    /// Invitation consumed as cancelled because the link is not allowed
    Rejected(AcceptRejection),

    /// Invitation was no longer live
    Stale,
}

/// Why a live invitation could not be turned into a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptRejection {
    MasterMissing,
    MasterNotMaster,
    Conflict(LinkConflict),
}

/// Graph rules checked at acceptance time
///
/// Being already this master's sub is not a rejection: accepting again keeps
/// the existing link.
pub fn acceptance_check(
    master: Option<&Account>,
    invitee: Option<&Account>,
) -> Result<(), AcceptRejection> {
    let master = master.ok_or(AcceptRejection::MasterMissing)?;
    if !master.is_master() {
        return Err(AcceptRejection::MasterNotMaster);
    }

    match invitee.and_then(|account| link_conflict(master.id, account)) {
        None | Some(LinkConflict::AlreadyYourSub) => Ok(()),
        Some(conflict) => Err(AcceptRejection::Conflict(conflict)),
    }
}

/// Maps unique-constraint violations onto [`StoreError::Conflict`]
pub(crate) fn map_db_error(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            let what = db_err.constraint().unwrap_or("unique constraint").to_string();
            return StoreError::Conflict(what);
        }
    }
    StoreError::Database(err)
}
