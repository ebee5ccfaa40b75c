use chrono::NaiveDateTime;
use sea_orm::FromQueryResult;

/// One stored row of the records table.
#[derive(Clone, Debug, PartialEq, Eq, FromQueryResult)]
pub struct Record {
    pub id: i32,
    pub file_name: String,
    pub key: String,
    /// Branch the record belongs to.
    pub version: String,
    pub data: Option<Vec<u8>>,
    pub date_create: NaiveDateTime,
}

/// A branch and how many records it holds.
#[derive(Clone, Debug, PartialEq, Eq, FromQueryResult)]
pub struct BranchSummary {
    pub name: String,
    pub records: i64,
}
