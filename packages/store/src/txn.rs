use std::time::Duration;

use sea_orm::sqlx::{self, Connection, PgConnection};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, IsolationLevel,
    Statement, TransactionTrait,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Upper bound for opening the side connection and delivering a cancel.
const CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Deliver `pg_cancel_backend(pid)` on a fresh connection built from the
/// pool's own connect options.
async fn send_cancel(db: &DatabaseConnection, pid: i32) -> Result<(), sqlx::Error> {
    let options = db.get_postgres_connection_pool().connect_options();
    let mut conn = PgConnection::connect_with(&options).await?;
    sqlx::query("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .execute(&mut conn)
        .await?;
    conn.close().await
}

/// One branch operation's transaction.
///
/// The scope is closed explicitly: [`commit`](Self::commit) on success,
/// [`abort`](Self::abort) on every other path. No sea-orm future is dropped
/// while in flight, so the pooled connection always goes back idle.
pub(crate) struct TxnScope<'a> {
    db: &'a DatabaseConnection,
    txn: DatabaseTransaction,
    cancel: &'a CancellationToken,
    backend_pid: Option<i32>,
    op: &'static str,
}

impl<'a> TxnScope<'a> {
    /// Open a transaction at `isolation` (server default when `None`).
    pub(crate) async fn begin(
        db: &'a DatabaseConnection,
        cancel: &'a CancellationToken,
        op: &'static str,
        isolation: Option<IsolationLevel>,
    ) -> Result<Self, StoreError> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled { op });
        }

        // BEGIN is never raced: dropping it midway returns the connection to
        // the pool inside an open transaction.
        let txn = db
            .begin_with_config(isolation, None)
            .await
            .map_err(|source| StoreError::Branch { op, source })?;

        let mut scope = Self {
            db,
            txn,
            cancel,
            backend_pid: None,
            op,
        };

        let pid = scope.fetch_backend_pid().await;
        match pid {
            Ok(pid) => scope.backend_pid = pid,
            Err(source) => return Err(scope.abort(StoreError::Branch { op, source }).await),
        }

        if cancel.is_cancelled() {
            return Err(scope.abort(StoreError::Cancelled { op }).await);
        }

        Ok(scope)
    }

    /// Pid of the server process running this transaction, so a cancelled
    /// statement can be torn down server-side.
    async fn fetch_backend_pid(&self) -> Result<Option<i32>, DbErr> {
        if self.db.get_database_backend() != DbBackend::Postgres {
            return Ok(None);
        }

        let row = self
            .txn
            .query_one_raw(Statement::from_string(
                DbBackend::Postgres,
                "SELECT pg_backend_pid() AS pid",
            ))
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("", "pid")?)),
            None => Ok(None),
        }
    }

    /// Execute one statement, cancelling it server-side if the token fires
    /// while it runs.
    ///
    /// The statement future is always driven to completion so the connection
    /// is left idle; once cancelled, its outcome is reported as
    /// [`StoreError::Cancelled`]. On error the scope is still open and the
    /// caller passes the error to [`abort`](Self::abort).
    pub(crate) async fn execute(&self, stmt: Statement) -> Result<u64, StoreError> {
        let op = self.op;
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled { op });
        }
        debug!(op, sql = %stmt.sql, "Executing branch statement");

        let running = self.txn.execute_raw(stmt);
        tokio::pin!(running);

        let outcome = tokio::select! {
            biased;
            res = &mut running => res,
            _ = self.cancel.cancelled() => {
                self.cancel_backend().await;
                let res = running.await;
                debug!(op, completed = res.is_ok(), "Cancelled branch statement returned");
                return Err(StoreError::Cancelled { op });
            }
        };

        outcome
            .map(|res| res.rows_affected())
            .map_err(|source| StoreError::Branch { op, source })
    }

    /// Ask the server to stop whatever this transaction's backend is running.
    ///
    /// The request goes over a one-off connection outside the pool: the
    /// transaction holds one pooled connection and the pool may have no
    /// other to spare. The server therefore needs one connection slot of
    /// headroom beyond `max_connections`.
    async fn cancel_backend(&self) {
        let Some(pid) = self.backend_pid else {
            return;
        };

        match tokio::time::timeout(CANCEL_REQUEST_TIMEOUT, send_cancel(self.db, pid)).await {
            Ok(Ok(())) => debug!(op = self.op, pid, "Sent backend cancel request"),
            Ok(Err(e)) => {
                warn!(op = self.op, pid, error = %e, "Failed to cancel backend statement")
            }
            Err(_) => warn!(op = self.op, pid, "Timed out sending backend cancel request"),
        }
    }

    /// Commit, unless cancellation arrived first.
    pub(crate) async fn commit(self) -> Result<(), StoreError> {
        let op = self.op;
        if self.cancel.is_cancelled() {
            return Err(self.abort(StoreError::Cancelled { op }).await);
        }

        self.txn
            .commit()
            .await
            .map_err(|source| StoreError::Branch { op, source })
    }

    /// Roll back explicitly and return the error to surface.
    ///
    /// If the rollback fails too, the rollback error wraps `cause`.
    pub(crate) async fn abort(self, cause: StoreError) -> StoreError {
        let op = self.op;
        match self.txn.rollback().await {
            Ok(()) => {
                debug!(op, error = %cause, "Rolled back branch operation");
                cause
            }
            Err(rollback) => {
                warn!(op, error = %cause, rollback_error = %rollback, "Rollback failed");
                StoreError::Rollback {
                    op,
                    rollback,
                    source: Box::new(cause),
                }
            }
        }
    }
}

/// Run `statements` in order inside one transaction and commit.
///
/// Returns the affected row count of each statement. Any failure or
/// cancellation rolls the whole transaction back.
pub(crate) async fn run_statements(
    db: &DatabaseConnection,
    cancel: &CancellationToken,
    op: &'static str,
    isolation: Option<IsolationLevel>,
    statements: Vec<Statement>,
) -> Result<Vec<u64>, StoreError> {
    let scope = TxnScope::begin(db, cancel, op, isolation).await?;

    let mut affected = Vec::with_capacity(statements.len());
    for stmt in statements {
        match scope.execute(stmt).await {
            Ok(rows) => affected.push(rows),
            Err(e) => return Err(scope.abort(e).await),
        }
    }

    scope.commit().await?;
    Ok(affected)
}
