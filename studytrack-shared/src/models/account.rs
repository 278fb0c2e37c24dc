/// Account model and database operations
///
/// An account is both an identity (keyed by a case-insensitive email) and a
/// node in the master/sub relationship graph. The graph is a forest of depth
/// one: masters own sub-accounts, sub-accounts point at exactly one master.
///
/// The master's `sub_accounts` set is not stored separately. It is derived
/// from the sub-accounts' `master_id` column, so linking or unlinking is a
/// single row write and no account can sit in two masters' sets.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE account_type AS ENUM ('master', 'sub');
/// CREATE TYPE account_status AS ENUM ('active', 'inactive', 'banned');
///
/// CREATE TABLE accounts (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     nickname VARCHAR(50) NOT NULL,
///     avatar VARCHAR(512) NOT NULL DEFAULT '',
///     status account_status NOT NULL DEFAULT 'active',
///     account_type account_type NOT NULL DEFAULT 'master',
///     master_id UUID REFERENCES accounts(id) ON DELETE RESTRICT,
///     last_login_at TIMESTAMPTZ,
///     login_count INTEGER NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use studytrack_shared::models::account::{Account, NewAccount};
/// use studytrack_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let account = Account::create(&pool, NewAccount::new("Student@Example.com")).await?;
/// assert_eq!(account.email, "student@example.com");
///
/// let found = Account::find_by_email(&pool, "STUDENT@example.com").await?;
/// assert!(found.is_some());
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::CoreError;

/// Position of an account in the relationship graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Can own sub-accounts and issue invitations
    Master,

    /// Linked to exactly one master and shares its task view
    Sub,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Master => "master",
            AccountType::Sub => "sub",
        }
    }
}

/// Profile status, passed through untouched by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "account_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Banned,
}

/// Account record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    /// Store-assigned id
    pub id: Uuid,

    /// Normalized (trimmed, lowercase) email, unique
    pub email: String,

    pub nickname: String,

    pub avatar: String,

    pub status: AccountStatus,

    pub account_type: AccountType,

    /// Owning master, set only for sub-accounts
    pub master_id: Option<Uuid>,

    /// Ids of the sub-accounts this master owns (derived, oldest first)
    pub sub_accounts: Vec<Uuid>,

    /// Maintained by the auth layer via `record_login`
    pub last_login_at: Option<DateTime<Utc>>,

    pub login_count: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn is_master(&self) -> bool {
        self.account_type == AccountType::Master
    }

    pub fn is_sub(&self) -> bool {
        self.account_type == AccountType::Sub
    }

    /// True when this account is a sub-account of `master_id`
    pub fn is_sub_of(&self, master_id: Uuid) -> bool {
        self.is_sub() && self.master_id == Some(master_id)
    }

    /// Public view without login metadata
    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id,
            email: self.email.clone(),
            nickname: self.nickname.clone(),
            avatar: self.avatar.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Public profile of an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: Uuid,
    pub email: String,
    pub nickname: String,
    pub avatar: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for creating an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    /// Email (normalized on write)
    pub email: String,

    /// Display name; defaults to the email's local part
    pub nickname: Option<String>,

    pub avatar: Option<String>,

    /// Graph position; defaults to master
    #[serde(default = "default_account_type")]
    pub account_type: AccountType,

    pub master_id: Option<Uuid>,
}

fn default_account_type() -> AccountType {
    AccountType::Master
}

impl NewAccount {
    /// Independent master account with default profile
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            nickname: None,
            avatar: None,
            account_type: default_account_type(),
            master_id: None,
        }
    }

    /// Sub-account linked to `master_id`
    pub fn sub_of(email: impl Into<String>, master_id: Uuid) -> Self {
        Self {
            account_type: AccountType::Sub,
            master_id: Some(master_id),
            ..Self::new(email)
        }
    }

    /// Nickname to persist: explicit one, or the email's local part
    pub fn resolved_nickname(&self) -> String {
        match self.nickname.as_deref().map(str::trim) {
            Some(nick) if !nick.is_empty() => nick.to_string(),
            _ => default_nickname(&normalize_email(&self.email)),
        }
    }
}

/// Lowercases and trims an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Default nickname derived from an email
pub fn default_nickname(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

#[derive(Validate)]
struct EmailInput {
    #[validate(email)]
    email: String,
}

/// Normalizes and validates an email address
///
/// # Errors
///
/// Returns `CoreError::InvalidEmail` when the address is not syntactically valid.
pub fn parse_email(raw: &str) -> Result<String, CoreError> {
    let email = normalize_email(raw);
    EmailInput {
        email: email.clone(),
    }
    .validate()
    .map_err(|_| CoreError::InvalidEmail(raw.trim().to_string()))?;
    Ok(email)
}

pub(crate) const SELECT_ACCOUNT: &str = r#"
    SELECT a.id, a.email, a.nickname, a.avatar, a.status, a.account_type, a.master_id,
           ARRAY(
               SELECT s.id FROM accounts s
               WHERE s.master_id = a.id AND s.account_type = 'sub'
               ORDER BY s.created_at ASC
           ) AS sub_accounts,
           a.last_login_at, a.login_count, a.created_at, a.updated_at
    FROM accounts a
"#;

impl Account {
    /// Creates a new account
    ///
    /// # Errors
    ///
    /// Returns an error if the email already exists or the database fails
    pub async fn create(pool: &PgPool, data: NewAccount) -> Result<Self, sqlx::Error> {
        let nickname = data.resolved_nickname();
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO accounts (email, nickname, avatar, account_type, master_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(normalize_email(&data.email))
        .bind(nickname)
        .bind(data.avatar.unwrap_or_default())
        .bind(data.account_type)
        .bind(data.master_id)
        .fetch_one(pool)
        .await?;

        Self::find_by_id(pool, id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Finds an account by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let account = sqlx::query_as::<_, Account>(&format!("{} WHERE a.id = $1", SELECT_ACCOUNT))
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(account)
    }

    /// Finds an account by email (case-insensitive)
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let account =
            sqlx::query_as::<_, Account>(&format!("{} WHERE a.email = $1", SELECT_ACCOUNT))
                .bind(normalize_email(email))
                .fetch_optional(pool)
                .await?;

        Ok(account)
    }

    /// Loads several accounts at once, oldest first
    pub async fn find_many(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Self>, sqlx::Error> {
        let accounts = sqlx::query_as::<_, Account>(&format!(
            "{} WHERE a.id = ANY($1) ORDER BY a.created_at ASC",
            SELECT_ACCOUNT
        ))
        .bind(ids)
        .fetch_all(pool)
        .await?;

        Ok(accounts)
    }

    /// Turns a sub-account of `master_id` back into an independent master
    ///
    /// Returns false if the account is not currently a sub of `master_id`.
    pub async fn detach_from_master(
        pool: &PgPool,
        id: Uuid,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET account_type = 'master', master_id = NULL, updated_at = $3
            WHERE id = $1 AND master_id = $2 AND account_type = 'sub'
            "#,
        )
        .bind(id)
        .bind(master_id)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stamps a successful login
    pub async fn record_login(
        pool: &PgPool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE accounts
            SET last_login_at = $2, login_count = login_count + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find_by_id(pool, id).await
    }
}
