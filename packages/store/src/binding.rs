use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::branch::{BranchEngine, MergeInfo, ReplaceInfo};
use crate::config::{GatewayConfig, StoreConfig};
use crate::error::StoreError;
use crate::gateway::{PgGateway, RecordGateway};
use crate::record::{BranchSummary, Record};
use crate::schema::{TableName, ensure_table};

/// A caller's handle on one branch of a records table.
///
/// Record reads and writes go through the gateway bound to the current
/// branch; branch operations go to the [`BranchEngine`]. The database handle
/// is shared with every other store built from it and is never closed here.
pub struct BranchStore<G = PgGateway> {
    engine: BranchEngine,
    branch: String,
    use_cache: bool,
    gateway: G,
}

impl BranchStore<PgGateway> {
    /// Ensure the table exists and bind a [`PgGateway`] to `branch`.
    pub async fn open(
        db: DatabaseConnection,
        branch: impl Into<String>,
        table: impl Into<String>,
        use_cache: bool,
    ) -> Result<Self, StoreError> {
        let table = TableName::new(table);
        let branch = branch.into();

        ensure_table(&db, &table).await?;

        let config = GatewayConfig::standard(table.as_str(), branch.clone(), use_cache);
        let gateway = PgGateway::new(db.clone(), config)?;

        info!(table = %table, branch = %branch, use_cache, "Opened branch store");
        Ok(Self::with_gateway(db, table, branch, use_cache, gateway))
    }

    pub async fn from_config(
        db: DatabaseConnection,
        config: &StoreConfig,
    ) -> Result<Self, StoreError> {
        Self::open(db, &config.branch, &config.table, config.use_cache).await
    }
}

impl<G: RecordGateway> BranchStore<G> {
    /// Bind an already constructed gateway. The table is assumed to exist.
    pub fn with_gateway(
        db: DatabaseConnection,
        table: TableName,
        branch: impl Into<String>,
        use_cache: bool,
        gateway: G,
    ) -> Self {
        Self {
            engine: BranchEngine::new(db, table),
            branch: branch.into(),
            use_cache,
            gateway,
        }
    }

    /// Current branch.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn table(&self) -> &TableName {
        self.engine.table()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn engine(&self) -> &BranchEngine {
        &self.engine
    }

    /// Snapshot of the gateway bindings, enough to build a second gateway on
    /// the same table and branch.
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            use_cache: self.use_cache,
            use_preload: self.use_cache,
            version: self.branch.clone(),
            ..self.gateway.config()
        }
    }

    pub async fn save(&self, file: &str, key: &str, data: &[u8]) -> Result<(), StoreError> {
        Ok(self.gateway.save(file, key, data).await?)
    }

    pub async fn read(&self, file: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(self.gateway.read(file, key).await?)
    }

    /// Rebind this store to `branch`. Touches no rows.
    ///
    /// If the gateway rejects the name the store stays on its current branch.
    pub async fn set_version(&mut self, branch: &str) -> Result<(), StoreError> {
        self.gateway.set_version(branch).await?;
        self.branch = branch.to_string();
        Ok(())
    }

    /// Load the current branch into the gateway cache in one round-trip.
    pub async fn preload(&self) -> Result<usize, StoreError> {
        Ok(self.gateway.preload().await?)
    }

    pub async fn delete_branch(
        &self,
        cancel: &CancellationToken,
        branch: &str,
    ) -> Result<u64, StoreError> {
        let deleted = self.engine.delete_branch(cancel, branch).await?;
        if branch == self.branch {
            self.gateway.invalidate();
        }
        Ok(deleted)
    }

    pub async fn delete_branch_key(
        &self,
        cancel: &CancellationToken,
        branch: &str,
        key: &str,
    ) -> Result<u64, StoreError> {
        let deleted = self.engine.delete_branch_key(cancel, branch, key).await?;
        if branch == self.branch {
            self.gateway.invalidate();
        }
        Ok(deleted)
    }

    /// Move the current branch into `target`, replacing its contents.
    ///
    /// The store stays bound to the current branch, which is empty afterwards.
    /// Use [`merge_to_and_rebind`](Self::merge_to_and_rebind) to follow the
    /// records.
    pub async fn merge_to(
        &self,
        cancel: &CancellationToken,
        target: &str,
    ) -> Result<MergeInfo, StoreError> {
        let info = self.engine.merge(cancel, &self.branch, target).await?;
        self.gateway.invalidate();
        Ok(info)
    }

    /// [`merge_to`](Self::merge_to), then rebind to `target`.
    pub async fn merge_to_and_rebind(
        &mut self,
        cancel: &CancellationToken,
        target: &str,
    ) -> Result<MergeInfo, StoreError> {
        let info = self.merge_to(cancel, target).await?;
        self.set_version(target).await?;
        Ok(info)
    }

    /// Discard the current branch and refill it with a copy of `source`.
    pub async fn replace_from(
        &self,
        cancel: &CancellationToken,
        source: &str,
    ) -> Result<ReplaceInfo, StoreError> {
        let info = self.engine.replace(cancel, &self.branch, source).await?;
        self.gateway.invalidate();
        Ok(info)
    }

    /// Records of `branch`, ordered by file name and key.
    pub async fn records(&self, branch: &str) -> Result<Vec<Record>, StoreError> {
        self.engine.records(branch).await
    }

    pub async fn branches(&self) -> Result<Vec<BranchSummary>, StoreError> {
        self.engine.branches().await
    }
}
