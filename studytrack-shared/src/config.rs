/// Configuration loaded from the environment
///
/// A `.env` file is honoured in development. Every setting has a default
/// except `DATABASE_URL`, which is only demanded by the operations that open
/// a pool.
///
/// | Variable | Default |
/// |---|---|
/// | `DATABASE_URL` | none |
/// | `DATABASE_MAX_CONNECTIONS` | 10 |
/// | `STUDYTRACK_INVITE_TTL_DAYS` | 7 |
/// | `STUDYTRACK_STREAK_LOOKBACK_DAYS` | 30 |
/// | `STUDYTRACK_UTC_OFFSET_MINUTES` | 0 |

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::clock::DayBoundary;
use crate::db::pool::DatabaseConfig;

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// Core settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub database: DatabaseSettings,

    /// Days an invitation stays acceptable
    pub invite_ttl_days: i64,

    /// Upper bound on the streak walk
    pub streak_lookback_days: u32,

    /// Offset east of UTC that defines the local calendar day
    pub utc_offset_minutes: i32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings {
                url: None,
                max_connections: 10,
            },
            invite_ttl_days: 7,
            streak_lookback_days: 30,
            utc_offset_minutes: 0,
        }
    }
}

impl CoreConfig {
    /// Loads `.env` (if any) and reads the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let max_connections = parse_or(
            &lookup,
            "DATABASE_MAX_CONNECTIONS",
            defaults.database.max_connections,
        )?;
        let invite_ttl_days = parse_or(&lookup, "STUDYTRACK_INVITE_TTL_DAYS", defaults.invite_ttl_days)?;
        let streak_lookback_days = parse_or(
            &lookup,
            "STUDYTRACK_STREAK_LOOKBACK_DAYS",
            defaults.streak_lookback_days,
        )?;
        let utc_offset_minutes = parse_or(
            &lookup,
            "STUDYTRACK_UTC_OFFSET_MINUTES",
            defaults.utc_offset_minutes,
        )?;

        if max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if !(1..=365).contains(&invite_ttl_days) {
            anyhow::bail!("STUDYTRACK_INVITE_TTL_DAYS must be between 1 and 365");
        }
        if !(1..=366).contains(&streak_lookback_days) {
            anyhow::bail!("STUDYTRACK_STREAK_LOOKBACK_DAYS must be between 1 and 366");
        }
        if DayBoundary::from_offset_minutes(utc_offset_minutes).is_none() {
            anyhow::bail!("STUDYTRACK_UTC_OFFSET_MINUTES must be within +/-24 hours");
        }

        Ok(Self {
            database: DatabaseSettings {
                url,
                max_connections,
            },
            invite_ttl_days,
            streak_lookback_days,
            utc_offset_minutes,
        })
    }

    pub fn invite_ttl(&self) -> Duration {
        Duration::days(self.invite_ttl_days)
    }

    /// Local day boundary; UTC if the offset is out of range
    pub fn day_boundary(&self) -> DayBoundary {
        DayBoundary::from_offset_minutes(self.utc_offset_minutes).unwrap_or_default()
    }

    /// Pool settings, failing when `DATABASE_URL` is unset
    pub fn database_config(&self) -> anyhow::Result<DatabaseConfig> {
        let url = self
            .database
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
        Ok(DatabaseConfig::from_url(url, self.database.max_connections))
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
