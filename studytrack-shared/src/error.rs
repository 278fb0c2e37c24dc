/// Error types for the StudyTrack core
///
/// Every operation in this crate reports a precise, named failure. The
/// presentation layer shows the `Display` text to end users, so messages are
/// written for people, while `code()` gives a stable machine-readable tag.
///
/// # Taxonomy
///
/// - **Validation**: bad input (dates, email, subject, token shape). Never retried.
/// - **Authorization**: the caller may not perform the operation.
/// - **Conflict**: the request clashes with current state (duplicate invite, existing link).
/// - **NotFound**: a referenced account, invitation or task does not exist.
/// - **Internal**: the store failed.
///
/// # Example
///
/// ```
/// use studytrack_shared::error::{CoreError, ErrorKind};
///
/// let err = CoreError::TaskExpired;
/// assert_eq!(err.kind(), ErrorKind::Authorization);
/// assert_eq!(err.code(), "task_expired");
/// ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result alias used by every core operation
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violation (e.g. duplicate email or token)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row expected to exist was missing
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Why an email cannot be linked as a sub-account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkConflict {
    /// The account is already a sub-account of another master
    SubOfAnotherMaster,

    /// The account is a master that owns sub-accounts
    MasterWithSubAccounts,

    /// The account is already a sub-account of this master
    AlreadyYourSub,
}

impl fmt::Display for LinkConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            LinkConflict::SubOfAnotherMaster => "this email is already a sub-account of another master",
            LinkConflict::MasterWithSubAccounts => {
                "this email belongs to a master account with sub-accounts"
            }
            LinkConflict::AlreadyYourSub => "this email is already your sub-account",
        };
        f.write_str(msg)
    }
}

/// Coarse classification of a [`CoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    NotFound,
    Internal,
}

/// Unified error type for core operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Start date {start} is after end date {end}")]
    InvalidRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Unknown subject: {0}")]
    UnknownSubject(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Task id list must not be empty")]
    EmptyBatch,

    #[error("Invitation does not exist or has expired")]
    InvalidOrExpiredToken,

    #[error("Cannot create a task for a past date")]
    PastDate,

    #[error("Only master accounts can manage sub-accounts")]
    NotMaster,

    #[error("You cannot invite yourself")]
    SelfInvite,

    #[error("This sub-account does not belong to you")]
    NotYourSub,

    #[error("Only the creator of a task can modify it")]
    NotTaskOwner,

    #[error("Task has expired and can no longer be changed")]
    TaskExpired,

    #[error("Cannot link account: {0}")]
    AlreadyLinked(LinkConflict),

    #[error("An invitation to this email is already pending")]
    DuplicatePending,

    #[error("Master account not found")]
    MasterNotFound,

    #[error("Sub-account not found")]
    SubNotFound,

    #[error("Account not found")]
    AccountNotFound,

    #[error("No pending invitation for this email")]
    InvitationNotFound,

    #[error("Task not found")]
    TaskNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Classifies the error for callers that map it onto a transport status
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidEmail(_)
            | CoreError::InvalidDate(_)
            | CoreError::InvalidRange { .. }
            | CoreError::UnknownSubject(_)
            | CoreError::Validation(_)
            | CoreError::EmptyBatch
            | CoreError::InvalidOrExpiredToken
            | CoreError::PastDate => ErrorKind::Validation,

            CoreError::NotMaster
            | CoreError::SelfInvite
            | CoreError::NotYourSub
            | CoreError::NotTaskOwner
            | CoreError::TaskExpired => ErrorKind::Authorization,

            CoreError::AlreadyLinked(_) | CoreError::DuplicatePending => ErrorKind::Conflict,

            CoreError::MasterNotFound
            | CoreError::SubNotFound
            | CoreError::AccountNotFound
            | CoreError::InvitationNotFound
            | CoreError::TaskNotFound => ErrorKind::NotFound,

            CoreError::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            CoreError::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable snake_case error code
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidEmail(_) => "invalid_email",
            CoreError::InvalidDate(_) => "invalid_date",
            CoreError::InvalidRange { .. } => "invalid_range",
            CoreError::UnknownSubject(_) => "unknown_subject",
            CoreError::Validation(_) => "validation_error",
            CoreError::EmptyBatch => "empty_batch",
            CoreError::InvalidOrExpiredToken => "invalid_or_expired_token",
            CoreError::PastDate => "past_date",
            CoreError::NotMaster => "not_master",
            CoreError::SelfInvite => "self_invite",
            CoreError::NotYourSub => "not_your_sub",
            CoreError::NotTaskOwner => "not_task_owner",
            CoreError::TaskExpired => "task_expired",
            CoreError::AlreadyLinked(_) => "already_linked",
            CoreError::DuplicatePending => "duplicate_pending",
            CoreError::MasterNotFound => "master_not_found",
            CoreError::SubNotFound => "sub_not_found",
            CoreError::AccountNotFound => "account_not_found",
            CoreError::InvitationNotFound => "invitation_not_found",
            CoreError::TaskNotFound => "task_not_found",
            CoreError::Store(_) => "store_error",
        }
    }

    /// True for faults caused by the request rather than the system
    pub fn is_client_error(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Store(StoreError::from(err))
    }
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let message = errs
                    .iter()
                    .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{}: {}", field, message)
            })
            .collect();
        fields.sort();
        CoreError::Validation(fields.join("; "))
    }
}
