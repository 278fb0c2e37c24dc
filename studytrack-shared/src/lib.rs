//! # StudyTrack Shared Library
//!
//! Core of the StudyTrack student task tracker: the master/sub account graph
//! with its invitation lifecycle, account-group resolution, and the task
//! aggregation and mutation services that work over a resolved group.
//!
//! ## Module Organization
//!
//! - `models`: database models and their SQL
//! - `db`: connection pool and migrations
//! - `store`: persistence traits with PostgreSQL and in-memory implementations
//! - `invitations`: invitation lifecycle and sub-account management
//! - `graph`: account-group resolution
//! - `aggregation`: calendar rollups, statistics and streaks
//! - `mutation`: task writes with the expiry policy
//! - `clock`: time source and local-day arithmetic
//! - `config`: environment configuration
//! - `error`: error types

pub mod aggregation;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod invitations;
pub mod models;
pub mod mutation;
pub mod store;

pub use error::{CoreError, CoreResult};

/// Current version of the StudyTrack shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
