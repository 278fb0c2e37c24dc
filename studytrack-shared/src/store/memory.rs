/// In-memory store
///
/// Keeps every record behind one `tokio::sync::RwLock`, so each trait call
/// (including invitation acceptance) is atomic. Records are kept in insertion
/// order, which stands in for `created_at` ordering on ties.
///
/// Used by the integration tests and for running the services without a
/// database.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    acceptance_check, AcceptOutcome, AccountStore, InvitationStore, StoreResult, TaskStore,
};
use crate::error::StoreError;
use crate::models::account::{default_nickname, normalize_email};
use crate::models::{
    Account, AccountStatus, AccountType, Invitation, InvitationStatus, NewAccount, NewInvitation,
    NewTask, Task, TaskPatch,
};

#[derive(Debug, Default)]
struct State {
    accounts: Vec<Account>,
    invitations: Vec<Invitation>,
    tasks: Vec<Task>,
}

impl State {
    /// Account with its derived `sub_accounts`
    fn account(&self, id: Uuid) -> Option<Account> {
        self.accounts
            .iter()
            .find(|a| a.id == id)
            .map(|a| self.with_subs(a))
    }

    fn account_by_email(&self, email: &str) -> Option<Account> {
        let email = normalize_email(email);
        self.accounts
            .iter()
            .find(|a| a.email == email)
            .map(|a| self.with_subs(a))
    }

    fn with_subs(&self, account: &Account) -> Account {
        let mut account = account.clone();
        account.sub_accounts = self
            .accounts
            .iter()
            .filter(|s| s.is_sub_of(account.id))
            .map(|s| s.id)
            .collect();
        account
    }

    fn account_mut(&mut self, id: Uuid) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    fn insert_account(&mut self, data: NewAccount, now: DateTime<Utc>) -> StoreResult<Account> {
        let email = normalize_email(&data.email);
        if self.accounts.iter().any(|a| a.email == email) {
            return Err(StoreError::Conflict("accounts_email_key".to_string()));
        }

        let account = Account {
            id: Uuid::new_v4(),
            nickname: data.resolved_nickname(),
            email,
            avatar: data.avatar.unwrap_or_default(),
            status: AccountStatus::Active,
            account_type: data.account_type,
            master_id: data.master_id,
            sub_accounts: Vec::new(),
            last_login_at: None,
            login_count: 0,
            created_at: now,
            updated_at: now,
        };
        self.accounts.push(account.clone());
        Ok(account)
    }

    fn live_invitation_mut(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<&mut Invitation> {
        self.invitations
            .iter_mut()
            .find(|inv| inv.id == id && inv.is_live(now))
    }
}

/// Store kept entirely in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites an account's link columns without any checks
    ///
    /// Lets tests reproduce corrupted graph data.
    pub async fn force_link(&self, id: Uuid, account_type: AccountType, master_id: Option<Uuid>) {
        let mut state = self.state.write().await;
        if let Some(account) = state.account_mut(id) {
            account.account_type = account_type;
            account.master_id = master_id;
        }
    }

    /// Every invitation ever issued, in creation order
    pub async fn all_invitations(&self) -> Vec<Invitation> {
        self.state.read().await.invitations.clone()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, data: NewAccount) -> StoreResult<Account> {
        self.state.write().await.insert_account(data, Utc::now())
    }

    async fn find_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.state.read().await.account(id))
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self.state.read().await.account_by_email(email))
    }

    async fn find_accounts(&self, ids: &[Uuid]) -> StoreResult<Vec<Account>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .iter()
            .filter(|a| ids.contains(&a.id))
            .map(|a| state.with_subs(a))
            .collect())
    }

    async fn detach_from_master(
        &self,
        id: Uuid,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.account_mut(id) {
            Some(account) if account.is_sub_of(master_id) => {
                account.account_type = AccountType::Master;
                account.master_id = None;
                account.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Option<Account>> {
        let mut state = self.state.write().await;
        match state.account_mut(id) {
            Some(account) => {
                account.last_login_at = Some(now);
                account.login_count += 1;
                account.updated_at = now;
            }
            None => return Ok(None),
        }
        Ok(state.account(id))
    }
}

#[async_trait]
impl InvitationStore for MemoryStore {
    async fn create_invitation(&self, data: NewInvitation) -> StoreResult<Invitation> {
        let mut state = self.state.write().await;
        if state
            .invitations
            .iter()
            .any(|inv| inv.token_hash == data.token_hash)
        {
            return Err(StoreError::Conflict("invitations_token_hash_key".to_string()));
        }

        let invitation = Invitation {
            id: Uuid::new_v4(),
            master_id: data.master_id,
            email: data.email,
            token_hash: data.token_hash,
            status: InvitationStatus::Pending,
            invited_at: data.invited_at,
            expires_at: data.expires_at,
            resolved_at: None,
        };
        state.invitations.push(invitation.clone());
        Ok(invitation)
    }

    async fn find_live_invitation_by_token_hash(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .iter()
            .find(|inv| inv.token_hash == token_hash && inv.is_live(now))
            .cloned())
    }

    async fn find_live_invitation_for_email(
        &self,
        master_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .iter()
            .rev()
            .find(|inv| inv.master_id == master_id && inv.email == email && inv.is_live(now))
            .cloned())
    }

    async fn list_live_invitations(
        &self,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Invitation>> {
        let state = self.state.read().await;
        let mut live: Vec<Invitation> = state
            .invitations
            .iter()
            .filter(|inv| inv.master_id == master_id && inv.is_live(now))
            .cloned()
            .collect();
        live.sort_by_key(|inv| inv.invited_at);
        Ok(live)
    }

    async fn resolve_invitation(
        &self,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Invitation>> {
        let mut state = self.state.write().await;
        let Some(invitation) = state.invitations.iter_mut().find(|inv| inv.id == id) else {
            return Ok(None);
        };
        if !invitation.status.can_transition_to(status) {
            return Ok(None);
        }
        invitation.status = status;
        invitation.resolved_at = Some(now);
        Ok(Some(invitation.clone()))
    }

    async fn expire_overdue_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut expired = 0;
        for invitation in state
            .invitations
            .iter_mut()
            .filter(|inv| inv.status == InvitationStatus::Pending && inv.expires_at <= now)
        {
            invitation.status = InvitationStatus::Expired;
            invitation.resolved_at = Some(now);
            expired += 1;
        }
        Ok(expired)
    }

    async fn accept_invitation(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<AcceptOutcome> {
        let mut state = self.state.write().await;

        let Some(invitation) = state.live_invitation_mut(id, now).map(|inv| inv.clone()) else {
            return Ok(AcceptOutcome::Stale);
        };

        let master = state.account(invitation.master_id);
        let invitee = state.account_by_email(&invitation.email);

        if let Err(rejection) = acceptance_check(master.as_ref(), invitee.as_ref()) {
            if let Some(inv) = state.live_invitation_mut(id, now) {
                inv.status = InvitationStatus::Cancelled;
                inv.resolved_at = Some(now);
            }
            return Ok(AcceptOutcome::Rejected(rejection));
        }

        let sub_id = match invitee {
            Some(existing) => {
                if let Some(account) = state.account_mut(existing.id) {
                    account.account_type = AccountType::Sub;
                    account.master_id = Some(invitation.master_id);
                    account.updated_at = now;
                }
                existing.id
            }
            None => {
                let data = NewAccount {
                    nickname: Some(default_nickname(&invitation.email)),
                    ..NewAccount::sub_of(invitation.email.clone(), invitation.master_id)
                };
                state.insert_account(data, now)?.id
            }
        };

        for inv in state
            .invitations
            .iter_mut()
            .filter(|inv| inv.master_id == sub_id && inv.status == InvitationStatus::Pending)
        {
            inv.status = InvitationStatus::Cancelled;
            inv.resolved_at = Some(now);
        }

        if let Some(inv) = state.live_invitation_mut(id, now) {
            inv.status = InvitationStatus::Accepted;
            inv.resolved_at = Some(now);
        }

        state
            .account(sub_id)
            .map(AcceptOutcome::Linked)
            .ok_or(StoreError::NotFound("account"))
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(
        &self,
        user_id: Uuid,
        data: NewTask,
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        let mut state = self.state.write().await;
        if !state.accounts.iter().any(|a| a.id == user_id) {
            return Err(StoreError::NotFound("account"));
        }

        let task = Task {
            id: Uuid::new_v4(),
            user_id,
            title: data.title,
            description: data.description,
            subject: data.subject,
            date: data.date,
            deadline: data.deadline,
            is_completed: false,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn find_task_in_group(&self, id: Uuid, group: &[Uuid]) -> StoreResult<Option<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.id == id && group.contains(&t.user_id))
            .cloned())
    }

    async fn find_tasks_in_group(&self, ids: &[Uuid], group: &[Uuid]) -> StoreResult<Vec<Task>> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .iter()
            .filter(|t| ids.contains(&t.id) && group.contains(&t.user_id))
            .cloned()
            .collect())
    }

    async fn list_tasks_in_range(
        &self,
        group: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> StoreResult<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|t| group.contains(&t.user_id) && t.date >= start && t.date <= end)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.date, t.created_at));
        Ok(tasks)
    }

    async fn update_tasks(
        &self,
        ids: &[Uuid],
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut touched = 0;
        for task in state.tasks.iter_mut().filter(|t| ids.contains(&t.id)) {
            task.apply_patch(patch, now);
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete_task(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        Ok(state.tasks.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subject;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_email_is_unique_case_insensitive() {
        let store = MemoryStore::new();
        store.create_account(NewAccount::new("Kid@Example.com")).await.unwrap();

        let err = store
            .create_account(NewAccount::new("kid@example.COM"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.find_account_by_email(" KID@example.com ").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_sub_accounts_are_derived() {
        let store = MemoryStore::new();
        let master = store.create_account(NewAccount::new("parent@example.com")).await.unwrap();
        let a = store
            .create_account(NewAccount::sub_of("a@example.com", master.id))
            .await
            .unwrap();
        let b = store
            .create_account(NewAccount::sub_of("b@example.com", master.id))
            .await
            .unwrap();

        let loaded = store.find_account(master.id).await.unwrap().unwrap();
        assert_eq!(loaded.sub_accounts, vec![a.id, b.id]);

        assert!(store.detach_from_master(a.id, master.id, now()).await.unwrap());
        let loaded = store.find_account(master.id).await.unwrap().unwrap();
        assert_eq!(loaded.sub_accounts, vec![b.id]);

        // Already detached
        assert!(!store.detach_from_master(a.id, master.id, now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_detach_requires_current_master() {
        let store = MemoryStore::new();
        let first = store.create_account(NewAccount::new("one@example.com")).await.unwrap();
        let second = store.create_account(NewAccount::new("two@example.com")).await.unwrap();
        let kid = store
            .create_account(NewAccount::sub_of("kid@example.com", second.id))
            .await
            .unwrap();

        assert!(!store.detach_from_master(kid.id, first.id, now()).await.unwrap());

        let kid = store.find_account(kid.id).await.unwrap().unwrap();
        assert!(kid.is_sub_of(second.id));
        assert!(!store.detach_from_master(second.id, second.id, now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_login() {
        let store = MemoryStore::new();
        let account = store.create_account(NewAccount::new("kid@example.com")).await.unwrap();

        let updated = store.record_login(account.id, now()).await.unwrap().unwrap();
        assert_eq!(updated.login_count, 1);
        assert_eq!(updated.last_login_at, Some(now()));

        assert!(store.record_login(Uuid::new_v4(), now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_invitation_is_compare_and_set() {
        let store = MemoryStore::new();
        let master = store.create_account(NewAccount::new("parent@example.com")).await.unwrap();
        let invitation = store
            .create_invitation(NewInvitation {
                master_id: master.id,
                email: "kid@example.com".to_string(),
                token_hash: "a".repeat(64),
                invited_at: now(),
                expires_at: now() + Duration::days(7),
            })
            .await
            .unwrap();

        let first = store
            .resolve_invitation(invitation.id, InvitationStatus::Cancelled, now())
            .await
            .unwrap();
        assert_eq!(first.unwrap().status, InvitationStatus::Cancelled);

        let second = store
            .resolve_invitation(invitation.id, InvitationStatus::Accepted, now())
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_task_range_is_ordered() {
        let store = MemoryStore::new();
        let owner = store.create_account(NewAccount::new("kid@example.com")).await.unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2025, 3, d).unwrap();

        for (title, date, offset) in [("late", day(2), 1), ("early", day(1), 5), ("first", day(2), 0)] {
            store
                .create_task(
                    owner.id,
                    NewTask {
                        title: title.to_string(),
                        description: String::new(),
                        subject: Subject::Math,
                        date,
                        deadline: None,
                    },
                    now() + Duration::minutes(offset),
                )
                .await
                .unwrap();
        }

        let tasks = store
            .list_tasks_in_range(&[owner.id], day(1), day(2))
            .await
            .unwrap();
        let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["early", "first", "late"]);

        let none = store
            .list_tasks_in_range(&[Uuid::new_v4()], day(1), day(2))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
