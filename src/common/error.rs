use thiserror::Error;

use super::{PageID, TransactionID};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Transaction {txn} aborted: {reason}")]
    TransactionAborted { txn: TransactionID, reason: String },

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Buffer pool exhausted: all {0} cached pages are dirty")]
    ResourceExhausted(usize),

    #[error("Corrupt log record at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    #[error("Transaction {0} has already committed")]
    CommittedTransaction(TransactionID),

    #[error("Transaction {0} has already aborted")]
    AlreadyAborted(TransactionID),

    #[error("Transaction {0} has already begun")]
    DuplicateBegin(TransactionID),

    #[error("Transaction {0} is not active")]
    UnknownTransaction(TransactionID),

    #[error("Page {0} not found")]
    PageNotFound(PageID),

    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Page {0} is full")]
    PageFull(PageID),

    #[error("Invalid slot index: {0}")]
    InvalidSlotIndex(usize),

    #[error("Slot {0} is empty")]
    EmptySlot(usize),

    #[error("Tuple size mismatch: expected {expected}, got {got}")]
    TupleSizeMismatch { expected: usize, got: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl KernelError {
    pub fn is_abort(&self) -> bool {
        matches!(self, KernelError::TransactionAborted { .. })
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;
