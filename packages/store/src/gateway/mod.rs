mod traits;

pub mod postgres;

pub use postgres::PgGateway;
pub use traits::RecordGateway;
