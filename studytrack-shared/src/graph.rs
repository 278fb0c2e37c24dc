/// Account graph resolution
///
/// Every task read is scoped to an [`AccountGroup`]: the account itself, its
/// master when it is a sub-account, and all of that master's sub-accounts.
///
/// Resolution never fails. A broken link (unknown account, sub without a
/// master, master that is not a master, store error) degrades to a group of
/// just the requesting account, with a warning logged so the corruption is
/// visible.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use studytrack_shared::graph::GroupResolver;
/// use studytrack_shared::store::MemoryStore;
/// use uuid::Uuid;
///
/// # async fn example(account_id: Uuid) {
/// let resolver = GroupResolver::new(Arc::new(MemoryStore::new()));
/// let group = resolver.resolve_group(account_id).await;
/// assert!(group.contains(account_id));
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LinkConflict;
use crate::models::Account;
use crate::store::Store;

/// Ordered, de-duplicated set of cooperating account ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountGroup {
    ids: Vec<Uuid>,
}

impl AccountGroup {
    /// Group of one
    pub fn solo(id: Uuid) -> Self {
        Self { ids: vec![id] }
    }

    /// Builds a group, keeping first occurrences in order
    pub fn from_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        let mut group = Self { ids: Vec::new() };
        for id in ids {
            group.insert(id);
        }
        group
    }

    fn insert(&mut self, id: Uuid) {
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.ids
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Why `candidate` cannot become a sub-account of `master_id`
pub fn link_conflict(master_id: Uuid, candidate: &Account) -> Option<LinkConflict> {
    if candidate.is_sub_of(master_id) {
        Some(LinkConflict::AlreadyYourSub)
    } else if candidate.is_sub() {
        Some(LinkConflict::SubOfAnotherMaster)
    } else if !candidate.sub_accounts.is_empty() {
        Some(LinkConflict::MasterWithSubAccounts)
    } else {
        None
    }
}

/// Resolves account groups from the store
#[derive(Clone)]
pub struct GroupResolver {
    store: Arc<dyn Store>,
}

impl GroupResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Group of accounts whose tasks `account_id` sees
    ///
    /// Always contains `account_id`. Resolved fresh on every call.
    pub async fn resolve_group(&self, account_id: Uuid) -> AccountGroup {
        let account = match self.store.find_account(account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(%account_id, "Account not found while resolving group, using self only");
                return AccountGroup::solo(account_id);
            }
            Err(e) => {
                warn!(%account_id, error = %e, "Store error while resolving group, using self only");
                return AccountGroup::solo(account_id);
            }
        };

        if account.is_master() {
            let group = master_group(&account);
            debug!(%account_id, size = group.len(), "Resolved master group");
            return group;
        }

        let Some(master_id) = account.master_id else {
            warn!(%account_id, "Sub-account has no master link, using self only");
            return AccountGroup::solo(account_id);
        };

        match self.store.find_account(master_id).await {
            Ok(Some(master)) if master.is_master() => {
                let mut group = master_group(&master);
                if !master.sub_accounts.contains(&account_id) {
                    warn!(%account_id, %master_id, "Master does not list sub-account, adding it");
                }
                group.insert(account_id);
                debug!(%account_id, %master_id, size = group.len(), "Resolved sub group");
                group
            }
            Ok(Some(_)) => {
                warn!(%account_id, %master_id, "Linked master is not a master account, using self only");
                AccountGroup::solo(account_id)
            }
            Ok(None) => {
                warn!(%account_id, %master_id, "Linked master not found, using self only");
                AccountGroup::solo(account_id)
            }
            Err(e) => {
                warn!(%account_id, %master_id, error = %e, "Store error loading master, using self only");
                AccountGroup::solo(account_id)
            }
        }
    }
}

fn master_group(master: &Account) -> AccountGroup {
    AccountGroup::from_ids(std::iter::once(master.id).chain(master.sub_accounts.iter().copied()))
}
