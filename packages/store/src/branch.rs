//! Branch-level set operations over the records table.
//!
//! Every operation is one transaction against the shared database handle.
//! Merge and replace run at serializable isolation: they delete the
//! destination branch before filling it, and only serializable isolation keeps
//! a concurrent writer from slipping rows into the destination in between,
//! which would break the (file_name, key, version) uniqueness.

use sea_orm::{DatabaseConnection, DbBackend, FromQueryResult, IsolationLevel, Statement};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::StoreError;
use crate::record::{BranchSummary, Record};
use crate::schema::{DATA_COL, FILE_NAME_COL, KEY_COL, TableName, VERSION_COL};
use crate::txn::run_statements;

/// Outcome of moving one branch onto another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeInfo {
    pub source: String,
    pub target: String,
    /// Target rows deleted before the move.
    pub overwritten: u64,
    /// Source rows renamed into the target.
    pub moved: u64,
}

/// Outcome of repopulating one branch as a copy of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceInfo {
    pub target: String,
    pub source: String,
    /// Target rows deleted before the copy.
    pub discarded: u64,
    /// Source rows copied into the target.
    pub copied: u64,
}

/// Transactional branch operations on one records table.
///
/// Holds no per-record state. Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct BranchEngine {
    db: DatabaseConnection,
    table: TableName,
}

impl BranchEngine {
    pub fn new(db: DatabaseConnection, table: TableName) -> Self {
        Self { db, table }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    fn delete_branch_stmt(&self, branch: &str) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!("DELETE FROM {} WHERE {VERSION_COL} = $1", self.table),
            [branch.into()],
        )
    }

    fn delete_branch_key_stmt(&self, branch: &str, key: &str) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "DELETE FROM {} WHERE {VERSION_COL} = $1 AND {KEY_COL} = $2",
                self.table
            ),
            [branch.into(), key.into()],
        )
    }

    fn rename_branch_stmt(&self, from: &str, to: &str) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "UPDATE {} SET {VERSION_COL} = $1 WHERE {VERSION_COL} = $2",
                self.table
            ),
            [to.into(), from.into()],
        )
    }

    fn copy_branch_stmt(&self, from: &str, to: &str) -> Statement {
        let table = &self.table;
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "INSERT INTO {table} ({FILE_NAME_COL}, {KEY_COL}, {DATA_COL}, {VERSION_COL}) \
                 SELECT {FILE_NAME_COL}, {KEY_COL}, {DATA_COL}, $1 FROM {table} \
                 WHERE {VERSION_COL} = $2"
            ),
            [to.into(), from.into()],
        )
    }

    /// Delete every record of `branch`. Deleting an empty or unknown branch
    /// succeeds with zero rows.
    pub async fn delete_branch(
        &self,
        cancel: &CancellationToken,
        branch: &str,
    ) -> Result<u64, StoreError> {
        let stmt = self.delete_branch_stmt(branch);
        let affected = run_statements(&self.db, cancel, "delete_branch", None, vec![stmt]).await?;
        let deleted = affected.iter().sum();

        info!(table = %self.table, branch, deleted, "Deleted branch");
        Ok(deleted)
    }

    /// Delete the records of `branch` whose key is `key`, across all file
    /// names.
    pub async fn delete_branch_key(
        &self,
        cancel: &CancellationToken,
        branch: &str,
        key: &str,
    ) -> Result<u64, StoreError> {
        let stmt = self.delete_branch_key_stmt(branch, key);
        let affected =
            run_statements(&self.db, cancel, "delete_branch_key", None, vec![stmt]).await?;
        let deleted = affected.iter().sum();

        info!(table = %self.table, branch, key, deleted, "Deleted branch key");
        Ok(deleted)
    }

    /// Move every record of `source` into `target`, replacing whatever
    /// `target` held. `source` is empty afterwards.
    ///
    /// Merging a branch into itself changes nothing.
    pub async fn merge(
        &self,
        cancel: &CancellationToken,
        source: &str,
        target: &str,
    ) -> Result<MergeInfo, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled { op: "merge_to" });
        }
        if source == target {
            return Ok(MergeInfo {
                source: source.to_string(),
                target: target.to_string(),
                overwritten: 0,
                moved: 0,
            });
        }

        let affected = run_statements(
            &self.db,
            cancel,
            "merge_to",
            Some(IsolationLevel::Serializable),
            vec![
                self.delete_branch_stmt(target),
                self.rename_branch_stmt(source, target),
            ],
        )
        .await?;

        let info = MergeInfo {
            source: source.to_string(),
            target: target.to_string(),
            overwritten: affected[0],
            moved: affected[1],
        };

        info!(
            table = %self.table,
            source,
            target,
            overwritten = info.overwritten,
            moved = info.moved,
            "Merged branch"
        );
        Ok(info)
    }

    /// Discard `target` and refill it with copies of every record of
    /// `source`. Copies get fresh ids and creation times; `source` is left
    /// untouched.
    ///
    /// Replacing a branch from itself changes nothing.
    pub async fn replace(
        &self,
        cancel: &CancellationToken,
        target: &str,
        source: &str,
    ) -> Result<ReplaceInfo, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled { op: "replace_from" });
        }
        if source == target {
            return Ok(ReplaceInfo {
                target: target.to_string(),
                source: source.to_string(),
                discarded: 0,
                copied: 0,
            });
        }

        let affected = run_statements(
            &self.db,
            cancel,
            "replace_from",
            Some(IsolationLevel::Serializable),
            vec![
                self.delete_branch_stmt(target),
                self.copy_branch_stmt(source, target),
            ],
        )
        .await?;

        let info = ReplaceInfo {
            target: target.to_string(),
            source: source.to_string(),
            discarded: affected[0],
            copied: affected[1],
        };

        info!(
            table = %self.table,
            target,
            source,
            discarded = info.discarded,
            copied = info.copied,
            "Replaced branch"
        );
        Ok(info)
    }

    /// All records of `branch`, ordered by file name and key.
    pub async fn records(&self, branch: &str) -> Result<Vec<Record>, StoreError> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT id, {FILE_NAME_COL}, {KEY_COL}, {VERSION_COL}, {DATA_COL}, date_create \
                 FROM {} WHERE {VERSION_COL} = $1 ORDER BY {FILE_NAME_COL}, {KEY_COL}",
                self.table
            ),
            [branch.into()],
        );

        Record::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(|source| StoreError::Branch {
                op: "records",
                source,
            })
    }

    /// Every non-empty branch with its record count, ordered by name.
    pub async fn branches(&self) -> Result<Vec<BranchSummary>, StoreError> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            format!(
                "SELECT {VERSION_COL} AS name, COUNT(*) AS records FROM {} \
                 GROUP BY {VERSION_COL} ORDER BY {VERSION_COL}",
                self.table
            ),
        );

        BranchSummary::find_by_statement(stmt)
            .all(&self.db)
            .await
            .map_err(|source| StoreError::Branch {
                op: "branches",
                source,
            })
    }
}
