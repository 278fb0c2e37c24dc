/// Database models
///
/// Each model owns its row type, input types and the raw SQL that reads and
/// writes it through a `PgPool`.
///
/// - `account`: accounts and the master/sub graph columns
/// - `invitation`: invitations issued by masters
/// - `task`: study tasks, subjects, expiry and patch rules

pub mod account;
pub mod invitation;
pub mod task;

pub use account::{Account, AccountProfile, AccountStatus, AccountType, NewAccount};
pub use invitation::{Invitation, InvitationStatus, NewInvitation};
pub use task::{NewTask, Subject, Task, TaskPatch};
