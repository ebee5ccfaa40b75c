pub mod binding;
pub mod branch;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod record;
pub mod retry;
pub mod schema;

mod txn;

pub use binding::BranchStore;
pub use branch::{BranchEngine, MergeInfo, ReplaceInfo};
pub use config::{DatabaseConfig, GatewayConfig, StoreConfig};
pub use error::{GatewayError, StoreError};
pub use gateway::{PgGateway, RecordGateway};
pub use record::{BranchSummary, Record};
pub use retry::RetryPolicy;
pub use schema::TableName;
