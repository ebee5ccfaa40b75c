use std::fmt;

use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::info;

use crate::error::StoreError;

pub const FILE_NAME_COL: &str = "file_name";
pub const KEY_COL: &str = "key";
pub const VERSION_COL: &str = "version";
pub const DATA_COL: &str = "data";

pub const FILE_NAME_MAX_LEN: usize = 40;
pub const KEY_MAX_LEN: usize = 40;
pub const VERSION_MAX_LEN: usize = 500;

/// Name of the records table, optionally schema-qualified (`cache.records`).
///
/// The name is interpolated into SQL as-is and must come from trusted
/// configuration, never from request data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    qualified: String,
}

impl TableName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            qualified: name.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.qualified
    }

    /// Prefix for constraint and index names: the qualified name without dots.
    pub fn constraint_prefix(&self) -> String {
        self.qualified.replace('.', "")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified)
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// `CREATE TABLE IF NOT EXISTS` for the records relation.
///
/// The unique index on (file_name, key, version) is the only place branch
/// uniqueness is enforced. The table is append-mostly, so the index is packed
/// full.
pub fn create_table_sql(table: &TableName) -> String {
    let prefix = table.constraint_prefix();
    format!(
        r#"CREATE TABLE IF NOT EXISTS {table}
(
    id serial,
    {FILE_NAME_COL} character varying({FILE_NAME_MAX_LEN}) NOT NULL,
    {KEY_COL} character varying({KEY_MAX_LEN}) NOT NULL,
    {VERSION_COL} character varying({VERSION_MAX_LEN}) NOT NULL,
    {DATA_COL} bytea,
    date_create timestamp without time zone NOT NULL DEFAULT now(),
    CONSTRAINT {prefix}_pkey PRIMARY KEY (id),
    CONSTRAINT {prefix}_uxk UNIQUE ({FILE_NAME_COL}, {KEY_COL}, {VERSION_COL})
        WITH (FILLFACTOR=100)
)"#
    )
}

/// Zero-row select over every column the store relies on. Fails inside the
/// database when an existing table of the same name has a different shape.
fn probe_sql(table: &TableName) -> String {
    format!(
        "SELECT id, {FILE_NAME_COL}, {KEY_COL}, {VERSION_COL}, {DATA_COL}, date_create \
         FROM {table} LIMIT 0"
    )
}

/// Ensure the records table and its unique constraint exist.
///
/// Safe to call on every startup. An incompatible pre-existing table is
/// reported, never migrated.
pub async fn ensure_table(db: &DatabaseConnection, table: &TableName) -> Result<(), StoreError> {
    let schema_err = |source| StoreError::Schema {
        table: table.to_string(),
        source,
    };

    db.execute_unprepared(&create_table_sql(table))
        .await
        .map_err(schema_err)?;
    db.execute_unprepared(&probe_sql(table))
        .await
        .map_err(schema_err)?;

    info!(table = %table, "Ensured records table exists");
    Ok(())
}
