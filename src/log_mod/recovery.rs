use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};

use crate::buffer::BufferManager;
use crate::common::{KernelError, Result, TransactionID};
use crate::log_mod::{LogManager, LogRecord, PageImage, LOG_HEADER_SIZE};
use crate::storage::{Catalog, Page};

/// Applies the log to storage: single-transaction rollback and crash recovery.
///
/// Every page written here is also dropped from the buffer pool, if one is
/// given, so no stale copy is served afterwards.
pub struct RecoveryManager {
    catalog: Arc<Catalog>,
}

impl RecoveryManager {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    fn install(&self, image: &PageImage, buffer_manager: Option<&BufferManager>) -> Result<()> {
        let file = self.catalog.get_database_file(image.page_id.table_id)?;
        let page = Page::new(image.page_id, image.data.clone(), file.tuple_size());
        file.write_page(&page)?;

        if let Some(buffer_manager) = buffer_manager {
            buffer_manager.discard_page(image.page_id);
        }
        Ok(())
    }

    /// Restores the before-image of every update `txn_id` made, newest first,
    /// logging a CLR for each. Stops at the transaction's Begin record.
    ///
    /// Fails if the transaction has already committed or aborted.
    pub fn rollback(
        &self,
        log: &mut LogManager,
        txn_id: TransactionID,
        buffer_manager: Option<&BufferManager>,
    ) -> Result<()> {
        let offsets = log.offsets().to_vec();
        let mut compensated = HashSet::new();
        let mut undone = 0;

        for &offset in offsets.iter().rev() {
            let (record, _) = log.read_record(offset)?;
            if record.txn_id() != Some(txn_id) {
                continue;
            }

            match record {
                LogRecord::Begin { .. } => break,
                LogRecord::Commit { .. } => return Err(KernelError::CommittedTransaction(txn_id)),
                LogRecord::Abort { .. } => return Err(KernelError::AlreadyAborted(txn_id)),
                LogRecord::Clr { undo_offset, .. } => {
                    compensated.insert(undo_offset);
                }
                LogRecord::Update { before, .. } => {
                    if compensated.contains(&offset) {
                        continue;
                    }
                    self.install(&before, buffer_manager)?;
                    log.log_clr(txn_id, offset, &before)?;
                    undone += 1;
                }
                LogRecord::Checkpoint { .. } => {}
            }
        }

        log.force()?;
        debug!("Rolled back {} update(s) of {}", undone, txn_id);
        Ok(())
    }

    /// Brings storage to a state containing exactly the effects of
    /// transactions that committed, then logs an Abort for every loser.
    ///
    /// Safe to run repeatedly: a second run finds no losers and redoes the
    /// same images in the same order.
    pub fn recover(
        &self,
        log: &mut LogManager,
        buffer_manager: Option<&BufferManager>,
    ) -> Result<()> {
        let mut losers = self.redo(log, buffer_manager)?;
        if losers.is_empty() {
            info!("Recovery complete: no loser transactions");
            return Ok(());
        }

        info!("Undoing {} loser transaction(s): {:?}", losers.len(), losers);
        let offsets = log.offsets().to_vec();
        let mut compensated = HashSet::new();

        for &offset in offsets.iter().rev() {
            if losers.is_empty() {
                break;
            }

            let (record, _) = log.read_record(offset)?;
            match record {
                LogRecord::Clr {
                    txn_id, undo_offset, ..
                } if losers.contains(&txn_id) => {
                    compensated.insert(undo_offset);
                }
                LogRecord::Update { txn_id, before, .. }
                    if losers.contains(&txn_id) && !compensated.contains(&offset) =>
                {
                    self.install(&before, buffer_manager)?;
                    log.log_clr(txn_id, offset, &before)?;
                }
                LogRecord::Begin { txn_id } if losers.contains(&txn_id) => {
                    losers.remove(&txn_id);
                    log.log_abort(txn_id)?;
                    debug!("Aborted loser {}", txn_id);
                }
                _ => {}
            }
        }

        log.force()?;
        info!("Recovery complete");
        Ok(())
    }

    /// Analysis and redo in one forward pass from the last checkpoint.
    /// Returns the transactions with no Commit or Abort record.
    fn redo(
        &self,
        log: &LogManager,
        buffer_manager: Option<&BufferManager>,
    ) -> Result<HashSet<TransactionID>> {
        let mut losers = HashSet::new();
        let start = match log.last_checkpoint() {
            Some(checkpoint) => match log.read_record(checkpoint)? {
                (LogRecord::Checkpoint { active }, next) => {
                    losers.extend(active);
                    next
                }
                (other, _) => {
                    return Err(KernelError::CorruptLog {
                        offset: checkpoint,
                        reason: format!("expected a checkpoint, found {}", other),
                    })
                }
            },
            None => LOG_HEADER_SIZE,
        };

        let mut redone = 0;
        for &offset in log.offsets().iter().filter(|&&offset| offset >= start) {
            let (record, _) = log.read_record(offset)?;
            match record {
                LogRecord::Begin { txn_id } => {
                    losers.insert(txn_id);
                }
                LogRecord::Commit { txn_id } | LogRecord::Abort { txn_id } => {
                    losers.remove(&txn_id);
                }
                LogRecord::Update { after, .. } => {
                    self.install(&after, buffer_manager)?;
                    redone += 1;
                }
                LogRecord::Clr { image, .. } => {
                    self.install(&image, buffer_manager)?;
                    redone += 1;
                }
                LogRecord::Checkpoint { .. } => {}
            }
        }

        info!("Redo pass from offset {} reapplied {} image(s)", start, redone);
        Ok(losers)
    }
}
