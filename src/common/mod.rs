mod error;
pub use error::*;

mod config;
pub use config::DatabaseConfig;

mod tid;
pub use tid::TID;

use std::fmt;

/// Identity of a page: the table it belongs to and its position in that table's file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct PageID {
    pub table_id: u32,
    pub page_no: u64,
}

impl PageID {
    pub fn new(table_id: u32, page_no: u64) -> Self {
        Self { table_id, page_no }
    }
}

impl fmt::Display for PageID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.page_no)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct TransactionID(pub u64);

impl fmt::Display for TransactionID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T_{}", self.0)
    }
}
