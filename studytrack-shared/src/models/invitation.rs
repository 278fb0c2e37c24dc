/// Invitation model and database operations
///
/// An invitation lets a master account bring another email into its account
/// group. Invitations are first-class rows with an explicit status rather than
/// entries embedded in the master's record, so they can be indexed by token
/// and their transitions are compare-and-set updates.
///
/// # State Machine
///
/// ```text
/// pending → accepted    (token consumed, link formed)
/// pending → cancelled   (master withdrew it, or acceptance was rejected)
/// pending → expired     (expires_at passed, applied lazily by cleanup)
/// ```
///
/// A pending invitation whose `expires_at` has passed is already treated as
/// dead by every read path, even before cleanup marks it `expired`.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE invitation_status AS ENUM ('pending', 'accepted', 'cancelled', 'expired');
///
/// CREATE TABLE invitations (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     master_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
///     email VARCHAR(255) NOT NULL,
///     token_hash CHAR(64) NOT NULL UNIQUE,
///     status invitation_status NOT NULL DEFAULT 'pending',
///     invited_at TIMESTAMPTZ NOT NULL,
///     expires_at TIMESTAMPTZ NOT NULL,
///     resolved_at TIMESTAMPTZ
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Invitation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    /// Waiting for the invitee
    Pending,

    /// Invitee accepted and was linked
    Accepted,

    /// Withdrawn by the master or rejected at acceptance
    Cancelled,

    /// Expiry window elapsed
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Cancelled => "cancelled",
            InvitationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }

    /// Only pending invitations move, and only to a terminal state
    pub fn can_transition_to(&self, target: InvitationStatus) -> bool {
        *self == InvitationStatus::Pending && target.is_terminal()
    }
}

/// Invitation record
///
/// The plaintext token is never stored; only its SHA-256 hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,

    /// Master that issued the invitation
    pub master_id: Uuid,

    /// Normalized invitee email
    pub email: String,

    #[serde(skip_serializing)]
    pub token_hash: String,

    pub status: InvitationStatus,

    pub invited_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,

    /// When the invitation left the pending state
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Pending and not yet past its expiry
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Pending && self.expires_at > now
    }
}

/// Input for inserting an invitation
#[derive(Debug, Clone)]
pub struct NewInvitation {
    pub master_id: Uuid,
    pub email: String,
    pub token_hash: String,
    pub invited_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub(crate) const INVITATION_COLUMNS: &str =
    "id, master_id, email, token_hash, status, invited_at, expires_at, resolved_at";

impl Invitation {
    /// Inserts a pending invitation
    pub async fn create(pool: &PgPool, data: NewInvitation) -> Result<Self, sqlx::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            INSERT INTO invitations (master_id, email, token_hash, invited_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        ))
        .bind(data.master_id)
        .bind(data.email)
        .bind(data.token_hash)
        .bind(data.invited_at)
        .bind(data.expires_at)
        .fetch_one(pool)
        .await?;

        Ok(invitation)
    }

    /// Finds the live invitation carrying a token hash
    pub async fn find_live_by_token_hash(
        pool: &PgPool,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            SELECT {}
            FROM invitations
            WHERE token_hash = $1 AND status = 'pending' AND expires_at > $2
            "#,
            INVITATION_COLUMNS
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        Ok(invitation)
    }

    /// Finds a master's live invitation for an email
    pub async fn find_live_for_email(
        pool: &PgPool,
        master_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            SELECT {}
            FROM invitations
            WHERE master_id = $1 AND email = $2 AND status = 'pending' AND expires_at > $3
            ORDER BY invited_at DESC
            LIMIT 1
            "#,
            INVITATION_COLUMNS
        ))
        .bind(master_id)
        .bind(email)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        Ok(invitation)
    }

    /// Lists a master's live invitations, oldest first
    pub async fn list_live_by_master(
        pool: &PgPool,
        master_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let invitations = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            SELECT {}
            FROM invitations
            WHERE master_id = $1 AND status = 'pending' AND expires_at > $2
            ORDER BY invited_at ASC
            "#,
            INVITATION_COLUMNS
        ))
        .bind(master_id)
        .bind(now)
        .fetch_all(pool)
        .await?;

        Ok(invitations)
    }

    /// Moves a pending invitation to a terminal state
    ///
    /// Returns the updated row, or None if the invitation was no longer
    /// pending (someone else resolved it first).
    pub async fn resolve(
        pool: &PgPool,
        id: Uuid,
        status: InvitationStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let invitation = sqlx::query_as::<_, Invitation>(&format!(
            r#"
            UPDATE invitations
            SET status = $2, resolved_at = $3
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        ))
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        Ok(invitation)
    }

    /// Marks every overdue pending invitation as expired
    pub async fn expire_overdue(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'expired', resolved_at = $1
            WHERE status = 'pending' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invitation(status: InvitationStatus, expires_in: Duration) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: Uuid::new_v4(),
            master_id: Uuid::new_v4(),
            email: "kid@example.com".to_string(),
            token_hash: "0".repeat(64),
            status,
            invited_at: now,
            expires_at: now + expires_in,
            resolved_at: None,
        }
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(InvitationStatus::Pending.as_str(), "pending");
        assert_eq!(InvitationStatus::Accepted.as_str(), "accepted");
        assert_eq!(InvitationStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(InvitationStatus::Expired.as_str(), "expired");
    }

    #[test]
    fn test_status_transitions() {
        assert!(InvitationStatus::Pending.can_transition_to(InvitationStatus::Accepted));
        assert!(InvitationStatus::Pending.can_transition_to(InvitationStatus::Cancelled));
        assert!(InvitationStatus::Pending.can_transition_to(InvitationStatus::Expired));
        assert!(!InvitationStatus::Pending.can_transition_to(InvitationStatus::Pending));

        // Terminal states never move
        for terminal in [
            InvitationStatus::Accepted,
            InvitationStatus::Cancelled,
            InvitationStatus::Expired,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(InvitationStatus::Pending));
            assert!(!terminal.can_transition_to(InvitationStatus::Accepted));
        }
    }

    #[test]
    fn test_is_live() {
        let now = Utc::now();
        assert!(invitation(InvitationStatus::Pending, Duration::days(1)).is_live(now));
        assert!(!invitation(InvitationStatus::Pending, Duration::days(-1)).is_live(now));
        assert!(!invitation(InvitationStatus::Accepted, Duration::days(1)).is_live(now));
    }

    #[test]
    fn test_token_hash_not_serialized() {
        let json = serde_json::to_value(invitation(InvitationStatus::Pending, Duration::days(7)))
            .unwrap();
        assert!(json.get("token_hash").is_none());
        assert_eq!(json["status"], "pending");
    }
}
