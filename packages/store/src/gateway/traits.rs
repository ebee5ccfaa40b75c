use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::error::GatewayError;

/// Per-record storage bound to one branch at a time.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Insert or overwrite the payload of (file, key) on the bound branch.
    async fn save(&self, file: &str, key: &str, data: &[u8]) -> Result<(), GatewayError>;

    /// Payload of (file, key) on the bound branch.
    async fn read(&self, file: &str, key: &str) -> Result<Vec<u8>, GatewayError>;

    /// Rebind to `branch` for subsequent saves and reads.
    async fn set_version(&mut self, branch: &str) -> Result<(), GatewayError>;

    /// Warm the cache for the bound branch in one round-trip.
    ///
    /// Returns the number of records loaded.
    async fn preload(&self) -> Result<usize, GatewayError>;

    /// Bindings needed to build an equivalent gateway.
    fn config(&self) -> GatewayConfig;

    /// Forget anything cached for the bound branch. Called after branch
    /// operations rewrite it behind the gateway's back.
    fn invalidate(&self) {}
}
