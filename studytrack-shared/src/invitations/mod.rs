/// Invitation lifecycle and sub-account management
///
/// The [`InvitationManager`] is the only writer of master/sub links. Links are
/// formed exclusively by accepting an invitation and dissolved by
/// [`InvitationManager::remove_sub_account`].
///
/// # Lifecycle
///
/// ```text
/// invite ──► pending ──accept──► accepted   (invitee linked as sub)
///               │ └──accept──► cancelled    (link no longer allowed)
///               ├──cancel────► cancelled
///               └──cleanup───► expired      (after the TTL)
/// ```
///
/// Expiry is lazy: a pending invitation past its `expires_at` is ignored by
/// every lookup and only marked `expired` when [`cleanup_expired`] runs.
///
/// [`cleanup_expired`]: InvitationManager::cleanup_expired
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use chrono::Duration;
/// use studytrack_shared::clock::SystemClock;
/// use studytrack_shared::invitations::InvitationManager;
/// use studytrack_shared::store::MemoryStore;
/// use uuid::Uuid;
///
/// # async fn example(master_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let manager = InvitationManager::new(
///     Arc::new(MemoryStore::new()),
///     Arc::new(SystemClock),
///     Duration::days(7),
/// );
///
/// let ticket = manager.invite(master_id, "kid@example.com").await?;
/// let sub = manager.accept(&ticket.invite_token).await?;
/// assert_eq!(sub.master_id, Some(master_id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::graph::link_conflict;
use crate::models::account::{normalize_email, parse_email};
use crate::models::{Account, AccountProfile, AccountType, Invitation, InvitationStatus, NewInvitation};
use crate::store::{AcceptOutcome, AcceptRejection, Store};

pub mod token;

use self::token::{generate_invite_token, hash_invite_token, validate_token_format};

/// Returned to the caller of `invite`, who hands the token to the mailer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationTicket {
    pub invite_token: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// Summary of a master, as seen by its sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterSummary {
    pub email: String,
    pub nickname: String,
}

/// Relationship view of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_type: AccountType,
    pub email: String,
    pub nickname: String,

    /// Set for masters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_accounts_count: Option<usize>,

    /// Set for subs whose master could be loaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<MasterSummary>,
}

/// Creates, accepts, cancels and expires invitations
#[derive(Clone)]
pub struct InvitationManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InvitationManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Invites `target_email` to become a sub-account of `master_id`
    ///
    /// # Errors
    ///
    /// `InvalidEmail`, `MasterNotFound`, `NotMaster`, `SelfInvite`,
    /// `AlreadyLinked` or `DuplicatePending`.
    pub async fn invite(&self, master_id: Uuid, target_email: &str) -> CoreResult<InvitationTicket> {
        let email = parse_email(target_email)?;
        let master = self.load_master(master_id).await?;

        if master.email == email {
            return Err(CoreError::SelfInvite);
        }

        if let Some(existing) = self.store.find_account_by_email(&email).await? {
            if let Some(conflict) = link_conflict(master.id, &existing) {
                return Err(CoreError::AlreadyLinked(conflict));
            }
        }

        let now = self.clock.now();
        if self
            .store
            .find_live_invitation_for_email(master.id, &email, now)
            .await?
            .is_some()
        {
            return Err(CoreError::DuplicatePending);
        }

        let (invite_token, token_hash) = generate_invite_token();
        let invitation = self
            .store
            .create_invitation(NewInvitation {
                master_id: master.id,
                email: email.clone(),
                token_hash,
                invited_at: now,
                expires_at: now + self.ttl,
            })
            .await?;

        info!(
            invitation_id = %invitation.id,
            master_id = %master.id,
            expires_at = %invitation.expires_at,
            "Invitation created"
        );

        Ok(InvitationTicket {
            invite_token,
            email,
            expires_at: invitation.expires_at,
        })
    }

    /// Accepts an invitation and returns the linked sub-account
    ///
    /// The token is consumed whatever the outcome: a second call with the
    /// same token fails with `InvalidOrExpiredToken`.
    pub async fn accept(&self, token: &str) -> CoreResult<Account> {
        let token = token.trim();
        if !validate_token_format(token) {
            return Err(CoreError::InvalidOrExpiredToken);
        }

        let now = self.clock.now();
        let invitation = self
            .store
            .find_live_invitation_by_token_hash(&hash_invite_token(token), now)
            .await?
            .ok_or(CoreError::InvalidOrExpiredToken)?;

        match self.store.accept_invitation(invitation.id, now).await? {
            AcceptOutcome::Linked(account) => {
                info!(
                    invitation_id = %invitation.id,
                    master_id = %invitation.master_id,
                    sub_id = %account.id,
                    "Sub-account linked"
                );
                Ok(account)
            }
            AcceptOutcome::Rejected(rejection) => {
                warn!(
                    invitation_id = %invitation.id,
                    master_id = %invitation.master_id,
                    ?rejection,
                    "Invitation cancelled at acceptance"
                );
                Err(match rejection {
                    AcceptRejection::MasterMissing => CoreError::MasterNotFound,
                    AcceptRejection::MasterNotMaster => CoreError::NotMaster,
                    AcceptRejection::Conflict(conflict) => CoreError::AlreadyLinked(conflict),
                })
            }
            AcceptOutcome::Stale => {
                debug!(invitation_id = %invitation.id, "Invitation resolved concurrently");
                Err(CoreError::InvalidOrExpiredToken)
            }
        }
    }

    /// Withdraws the live invitation `master_id` sent to `email`
    pub async fn cancel(&self, master_id: Uuid, email: &str) -> CoreResult<()> {
        let master = self.load_master(master_id).await?;
        let email = normalize_email(email);
        let now = self.clock.now();

        let invitation = self
            .store
            .find_live_invitation_for_email(master.id, &email, now)
            .await?
            .ok_or(CoreError::InvitationNotFound)?;

        self.store
            .resolve_invitation(invitation.id, InvitationStatus::Cancelled, now)
            .await?
            .ok_or(CoreError::InvitationNotFound)?;

        info!(invitation_id = %invitation.id, %master_id, "Invitation cancelled");
        Ok(())
    }

    /// Marks every overdue pending invitation expired; safe to call repeatedly
    pub async fn cleanup_expired(&self) -> CoreResult<u64> {
        let expired = self.store.expire_overdue_invitations(self.clock.now()).await?;
        if expired > 0 {
            info!(expired, "Expired overdue invitations");
        }
        Ok(expired)
    }

    /// Unlinks a sub-account, turning it back into an independent master
    ///
    /// # Errors
    ///
    /// `MasterNotFound`, `SubNotFound` or `NotYourSub`.
    pub async fn remove_sub_account(&self, master_id: Uuid, email: &str) -> CoreResult<Account> {
        let master = self
            .store
            .find_account(master_id)
            .await?
            .ok_or(CoreError::MasterNotFound)?;

        let sub = self
            .store
            .find_account_by_email(email)
            .await?
            .ok_or(CoreError::SubNotFound)?;

        if !sub.is_sub_of(master.id) {
            return Err(CoreError::NotYourSub);
        }

        // The link may have changed since the read; the write re-checks it
        if !self
            .store
            .detach_from_master(sub.id, master.id, self.clock.now())
            .await?
        {
            warn!(%master_id, sub_id = %sub.id, "Sub-account relinked before removal");
            return Err(CoreError::NotYourSub);
        }

        info!(%master_id, sub_id = %sub.id, "Sub-account removed");
        self.store
            .find_account(sub.id)
            .await?
            .ok_or(CoreError::SubNotFound)
    }

    /// Live invitations of a master, oldest first
    ///
    /// Runs [`cleanup_expired`](Self::cleanup_expired) first.
    pub async fn list_pending(&self, master_id: Uuid) -> CoreResult<Vec<Invitation>> {
        let master = self.load_master(master_id).await?;
        self.cleanup_expired().await?;

        Ok(self
            .store
            .list_live_invitations(master.id, self.clock.now())
            .await?)
    }

    /// Profiles of a master's sub-accounts
    pub async fn list_sub_accounts(&self, master_id: Uuid) -> CoreResult<Vec<AccountProfile>> {
        let master = self.load_master(master_id).await?;
        if master.sub_accounts.is_empty() {
            return Ok(Vec::new());
        }

        let subs = self.store.find_accounts(&master.sub_accounts).await?;
        Ok(master
            .sub_accounts
            .iter()
            .filter_map(|id| subs.iter().find(|s| s.id == *id))
            .map(Account::profile)
            .collect())
    }

    /// Relationship summary for one account
    pub async fn account_info(&self, account_id: Uuid) -> CoreResult<AccountInfo> {
        let account = self
            .store
            .find_account(account_id)
            .await?
            .ok_or(CoreError::AccountNotFound)?;

        let mut info = AccountInfo {
            account_type: account.account_type,
            email: account.email.clone(),
            nickname: account.nickname.clone(),
            sub_accounts_count: None,
            master: None,
        };

        match (account.account_type, account.master_id) {
            (AccountType::Master, _) => {
                info.sub_accounts_count = Some(account.sub_accounts.len());
            }
            (AccountType::Sub, Some(master_id)) => match self.store.find_account(master_id).await? {
                Some(master) => {
                    info.master = Some(MasterSummary {
                        email: master.email,
                        nickname: master.nickname,
                    });
                }
                None => warn!(%account_id, %master_id, "Linked master not found"),
            },
            (AccountType::Sub, None) => warn!(%account_id, "Sub-account has no master link"),
        }

        Ok(info)
    }

    async fn load_master(&self, master_id: Uuid) -> CoreResult<Account> {
        let master = self
            .store
            .find_account(master_id)
            .await?
            .ok_or(CoreError::MasterNotFound)?;

        if !master.is_master() {
            return Err(CoreError::NotMaster);
        }
        Ok(master)
    }
}
