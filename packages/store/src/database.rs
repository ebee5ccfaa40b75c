use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

use crate::config::DatabaseConfig;

/// Open the shared connection pool. The returned handle is cheap to clone and
/// is meant to be shared by every store bound to the same database.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.url.clone());

    let timeout = Duration::from_secs(config.timeout_secs);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(timeout)
        .acquire_timeout(timeout)
        .sqlx_logging(config.sqlx_logging);

    Database::connect(opt).await
}
