use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use tracing::debug;

use super::traits::RecordGateway;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::schema::{FILE_NAME_MAX_LEN, KEY_MAX_LEN, VERSION_MAX_LEN};

#[derive(FromQueryResult)]
struct Payload {
    data: Option<Vec<u8>>,
}

#[derive(FromQueryResult)]
struct CachedRecord {
    file_name: String,
    key: String,
    data: Option<Vec<u8>>,
}

/// Reject values that would not fit their varchar column. Only the branch
/// name has a lower bound; an empty file name or key is a valid value.
pub(crate) fn validate_field(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), GatewayError> {
    let actual = value.chars().count();
    if !(min..=max).contains(&actual) {
        return Err(GatewayError::InvalidField {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

/// PostgreSQL record gateway with an optional in-memory cache of the bound
/// branch.
///
/// Column names come from [`GatewayConfig`], so the gateway can serve any
/// table laid out as (file, key, version, payload) with a unique constraint on
/// the first three. A stored `NULL` payload reads back as empty bytes.
pub struct PgGateway {
    db: DatabaseConnection,
    config: GatewayConfig,
    cache: DashMap<(String, String), Vec<u8>>,
}

impl PgGateway {
    pub fn new(db: DatabaseConnection, config: GatewayConfig) -> Result<Self, GatewayError> {
        validate_field("version", &config.version, 1, VERSION_MAX_LEN)?;
        Ok(Self {
            db,
            config,
            cache: DashMap::new(),
        })
    }

    /// Number of records currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn upsert_stmt(&self, file: &str, key: &str, data: &[u8]) -> Statement {
        let GatewayConfig {
            table,
            file_col,
            key_col,
            val_col,
            version_col,
            ..
        } = &self.config;

        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "INSERT INTO {table} ({file_col}, {key_col}, {version_col}, {val_col}) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT ({file_col}, {key_col}, {version_col}) \
                 DO UPDATE SET {val_col} = EXCLUDED.{val_col}"
            ),
            [
                file.into(),
                key.into(),
                self.config.version.as_str().into(),
                data.to_vec().into(),
            ],
        )
    }

    fn select_stmt(&self, file: &str, key: &str) -> Statement {
        let GatewayConfig {
            table,
            file_col,
            key_col,
            val_col,
            version_col,
            ..
        } = &self.config;

        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT {val_col} AS data FROM {table} \
                 WHERE {file_col} = $1 AND {key_col} = $2 AND {version_col} = $3"
            ),
            [
                file.into(),
                key.into(),
                self.config.version.as_str().into(),
            ],
        )
    }

    fn preload_stmt(&self) -> Statement {
        let GatewayConfig {
            table,
            file_col,
            key_col,
            val_col,
            version_col,
            ..
        } = &self.config;

        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT {file_col} AS file_name, {key_col} AS key, {val_col} AS data \
                 FROM {table} WHERE {version_col} = $1"
            ),
            [self.config.version.as_str().into()],
        )
    }
}

#[async_trait]
impl RecordGateway for PgGateway {
    async fn save(&self, file: &str, key: &str, data: &[u8]) -> Result<(), GatewayError> {
        validate_field("file_name", file, 0, FILE_NAME_MAX_LEN)?;
        validate_field("key", key, 0, KEY_MAX_LEN)?;

        self.db.execute_raw(self.upsert_stmt(file, key, data)).await?;

        if self.config.use_cache {
            self.cache
                .insert((file.to_string(), key.to_string()), data.to_vec());
        }
        Ok(())
    }

    async fn read(&self, file: &str, key: &str) -> Result<Vec<u8>, GatewayError> {
        if self.config.use_cache {
            if let Some(data) = self.cache.get(&(file.to_string(), key.to_string())) {
                return Ok(data.value().clone());
            }
        }

        let payload = Payload::find_by_statement(self.select_stmt(file, key))
            .one(&self.db)
            .await?;

        let Some(payload) = payload else {
            return Err(GatewayError::NotFound {
                file: file.to_string(),
                key: key.to_string(),
                version: self.config.version.clone(),
            });
        };

        let data = payload.data.unwrap_or_default();
        if self.config.use_cache {
            self.cache
                .insert((file.to_string(), key.to_string()), data.clone());
        }
        Ok(data)
    }

    async fn set_version(&mut self, branch: &str) -> Result<(), GatewayError> {
        validate_field("version", branch, 1, VERSION_MAX_LEN)?;

        self.config.version = branch.to_string();
        self.cache.clear();
        Ok(())
    }

    async fn preload(&self) -> Result<usize, GatewayError> {
        if !self.config.use_preload {
            return Ok(0);
        }

        let records = CachedRecord::find_by_statement(self.preload_stmt())
            .all(&self.db)
            .await?;

        let loaded = records.len();
        for record in records {
            self.cache.insert(
                (record.file_name, record.key),
                record.data.unwrap_or_default(),
            );
        }

        debug!(
            table = %self.config.table,
            branch = %self.config.version,
            loaded,
            "Preloaded branch"
        );
        Ok(loaded)
    }

    fn config(&self) -> GatewayConfig {
        self.config.clone()
    }

    fn invalidate(&self) {
        self.cache.clear();
    }
}
