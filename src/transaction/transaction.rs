use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::BufferManager;
use crate::common::{Result, TransactionID};

/// Hands out transaction ids and drives commit and abort through the buffer
/// pool. Locks are taken lazily as pages are accessed.
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    buffer_manager: Arc<BufferManager>,
}

impl TransactionManager {
    /// `first_id` must be above every id already present in the log.
    pub fn new(buffer_manager: Arc<BufferManager>, first_id: u64) -> Self {
        Self {
            next_txn_id: AtomicU64::new(first_id),
            buffer_manager,
        }
    }

    pub fn start_txn(&self) -> Result<TransactionID> {
        let txn_id = TransactionID(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.buffer_manager.log_manager().lock().log_txn_begin(txn_id)?;
        debug!("Started {}", txn_id);
        Ok(txn_id)
    }

    pub fn commit_txn(&self, txn_id: TransactionID) -> Result<()> {
        self.buffer_manager.transaction_complete(txn_id, true)
    }

    pub fn abort_txn(&self, txn_id: TransactionID) -> Result<()> {
        self.buffer_manager.transaction_complete(txn_id, false)
    }

    /// Runs `f` in a fresh transaction. Commits if it succeeds; otherwise
    /// aborts and returns the error `f` produced.
    pub fn execute<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TransactionID) -> Result<T>,
    {
        let txn_id = self.start_txn()?;
        match f(txn_id) {
            Ok(value) => {
                self.commit_txn(txn_id)?;
                Ok(value)
            }
            Err(e) => {
                warn!("{} failed, aborting: {}", txn_id, e);
                if let Err(abort_err) = self.abort_txn(txn_id) {
                    warn!("Abort of {} failed: {}", txn_id, abort_err);
                }
                Err(e)
            }
        }
    }
}
