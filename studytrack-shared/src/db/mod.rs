/// Database layer
///
/// - `pool`: PostgreSQL pool construction and health checks
/// - `migrations`: embedded schema migrations
///
/// Row-level operations live on the models in [`crate::models`].

pub mod migrations;
pub mod pool;
