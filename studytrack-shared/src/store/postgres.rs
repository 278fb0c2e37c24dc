/// PostgreSQL store
///
/// Thin delegation to the models' SQL, plus the transactional acceptance of
/// invitations. Acceptance takes a transaction-scoped advisory lock so that
/// concurrent link operations are serialized and the graph rules are checked
/// against committed state.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    acceptance_check, map_db_error, AcceptOutcome, AccountStore, InvitationStore, StoreResult,
    TaskStore,
};
use crate::error::StoreError;
use crate::models::account::{default_nickname, SELECT_ACCOUNT};
use crate::models::invitation::INVITATION_COLUMNS;
use crate::models::{
    Account, Invitation, InvitationStatus, NewAccount, NewInvitation, NewTask, Task, TaskPatch,
};

/// Advisory lock key shared by every link operation
const LINK_LOCK_KEY: i64 = 0x5354_4c49_4e4b;

/// Store backed by a `PgPool`
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create_account(&self, data: NewAccount) -> StoreResult<Account> {
        Account::create(&self.pool, data).await.map_err(map_db_error)
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_id(&self.pool, id).await?)
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(Account::find_by_email(&self.pool, email).await?)
    }

    async fn find_accounts(&self, ids: &[Uuid]) -> StoreResult<Vec<Account>> {
        Ok(Account::find_many(&self.pool, ids).await?)
    }

    async fn detach_from_master(
        &self,
        id: Uuid,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(Account::detach_from_master(&self.pool, id, master_id, now).await?)
    }

    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Account>> {
        Ok(Account::record_login(&self.pool, id, now).await?)
    }
}

#[async_trait]
impl InvitationStore for PgStore {
    async fn create_invitation(&self, data: NewInvitation) -> StoreResult<Invitation> {
        Invitation::create(&self.pool, data)
            .await
            .map_err(map_db_error)
    }

    async fn find_live_invitation_by_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        Ok(Invitation::find_live_by_token_hash(&self.pool, token_hash, now).await?)
    }

    async fn find_live_invitation_for_email(
        &self,
        master_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        Ok(Invitation::find_live_for_email(&self.pool, master_id, email, now).await?)
    }

    async fn list_live_invitations(
        &self,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Invitation>> {
        Ok(Invitation::list_live_by_master(&self.pool, master_id, now).await?)
    }

    async fn resolve_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        Ok(Invitation::resolve(&self.pool, id, status, now).await?)
    }

    async fn expire_overdue_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        Ok(Invitation::expire_overdue(&self.pool, now).await?)
    }

    async fn accept_invitation(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<AcceptOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(LINK_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            SELECT {}
            FROM invitations
            WHERE id = $1 AND status = 'pending' AND expires_at > $2
            FOR UPDATE
            "#,
            INVITATION_COLUMNS
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(invitation) = invitation else {
            tx.rollback().await?;
            return Ok(AcceptOutcome::Stale);
        };

        let master = load_account(&mut tx, invitation.master_id).await?;
        let invitee = sqlx::query_as::<_, Account>(&format!("{} WHERE a.email = $1", SELECT_ACCOUNT))
            .bind(&invitation.email)
            .fetch_optional(&mut *tx)
            .await?;

        if let Err(rejection) = acceptance_check(master.as_ref(), invitee.as_ref()) {
            set_invitation_status(&mut tx, id, InvitationStatus::Cancelled, now).await?;
            tx.commit().await?;
            debug!(invitation_id = %id, ?rejection, "Invitation rejected at acceptance");
            return Ok(AcceptOutcome::Rejected(rejection));
        }

        let sub_id = match &invitee {
            Some(existing) => {
                sqlx::query(
                    r#"
                    UPDATE accounts
                    SET account_type = 'sub', master_id = $2, updated_at = $3
                    WHERE id = $1
                    "#,
                )
                .bind(existing.id)
                .bind(invitation.master_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                existing.id
            }
            None => {
                sqlx::query_scalar::<_, Uuid>(
                    r#"
                    INSERT INTO accounts (email, nickname, account_type, master_id, created_at, updated_at)
                    VALUES ($1, $2, 'sub', $3, $4, $4)
                    RETURNING id
                    "#,
                )
                .bind(&invitation.email)
                .bind(default_nickname(&invitation.email))
                .bind(invitation.master_id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_db_error)?
            }
        };

        // A sub-account cannot keep inviting
        let withdrawn = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'cancelled', resolved_at = $2
            WHERE master_id = $1 AND status = 'pending'
            "#,
        )
        .bind(sub_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        set_invitation_status(&mut tx, id, InvitationStatus::Accepted, now).await?;

        let linked = load_account(&mut tx, sub_id).await?;
        tx.commit().await?;

        let Some(linked) = linked else {
            return Err(StoreError::NotFound("account"));
        };

        info!(
            invitation_id = %id,
            master_id = %invitation.master_id,
            sub_id = %sub_id,
            withdrawn_invitations = withdrawn,
            "Invitation accepted"
        );
        Ok(AcceptOutcome::Linked(linked))
    }
}

async fn load_account(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{} WHERE a.id = $1", SELECT_ACCOUNT))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

async fn set_invitation_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: InvitationStatus,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE invitations
        SET status = $2, resolved_at = $3
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl TaskStore for PgStore {
    async fn create_task(
        &self,
        user_id: Uuid,
        data: NewTask,
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        Ok(Task::create(&self.pool, user_id, data, now).await?)
    }

    async fn find_task_in_group(&self, id: Uuid, group: &[Uuid]) -> StoreResult<Option<Task>> {
        Ok(Task::find_in_group(&self.pool, id, group).await?)
    }

    async fn find_tasks_in_group(&self, ids: &[Uuid], group: &[Uuid]) -> StoreResult<Vec<Task>> {
        Ok(Task::find_many_in_group(&self.pool, ids, group).await?)
    }

    async fn list_tasks_in_range(
        &self,
        group: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<Task>> {
        Ok(Task::list_in_range(&self.pool, group, start, end).await?)
    }

    async fn update_tasks(
        &self,
        ids: &[Uuid],
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        Ok(Task::update_many(&self.pool, ids, patch, now).await?)
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        Ok(Task::delete(&self.pool, id).await?)
    }
}
