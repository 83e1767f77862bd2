use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};

use crate::common::{KernelError, Result, TransactionID};
use crate::log_mod::log_record::read_u64;
use crate::log_mod::{LogRecord, LogRecordType, PageImage};

/// Header value meaning "no checkpoint has been taken".
pub const NO_CHECKPOINT: u64 = u64::MAX;

/// Size of the leading checkpoint pointer.
pub const LOG_HEADER_SIZE: u64 = 8;

/// Append-only write-ahead log.
///
/// File layout: an 8-byte pointer to the last checkpoint record, then records
/// of the form `type | txn | payload | start`, where `start` is the record's
/// own offset. The offsets of all records are also kept in memory so the log
/// can be walked backwards without chasing pointers on disk.
pub struct LogManager {
    log_file: File,
    current_offset: u64,
    record_offsets: Vec<u64>,
    record_counts: HashMap<LogRecordType, u64>,
    txn_id_to_first_log_record: HashMap<TransactionID, u64>,
    last_checkpoint: Option<u64>,
    max_txn_id: Option<u64>,
}

impl LogManager {
    /// Opens (or creates) the log at `log_file_path` and indexes its records.
    pub fn new(log_file_path: &Path) -> Result<Self> {
        let log_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(log_file_path)?;
        let file_len = log_file.metadata()?.len();

        let mut log_manager = Self {
            log_file,
            current_offset: LOG_HEADER_SIZE,
            record_offsets: Vec::new(),
            record_counts: HashMap::new(),
            txn_id_to_first_log_record: HashMap::new(),
            last_checkpoint: None,
            max_txn_id: None,
        };

        if file_len == 0 {
            log_manager.write_checkpoint_pointer(NO_CHECKPOINT)?;
            log_manager.force()?;
        } else if file_len < LOG_HEADER_SIZE {
            return Err(KernelError::CorruptLog {
                offset: 0,
                reason: "truncated log header".to_string(),
            });
        } else {
            log_manager.current_offset = file_len;
            log_manager.rebuild_index()?;
        }

        info!(
            "Opened log {} with {} record(s), {} active transaction(s)",
            log_file_path.display(),
            log_manager.record_offsets.len(),
            log_manager.txn_id_to_first_log_record.len()
        );
        Ok(log_manager)
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let mut file = &self.log_file;
        file.seek(SeekFrom::Start(0))?;
        let checkpoint = read_u64(&mut file).map_err(|e| KernelError::CorruptLog {
            offset: 0,
            reason: e.to_string(),
        })?;

        let mut offset = LOG_HEADER_SIZE;
        while offset < self.current_offset {
            let (record, next) = self.read_record(offset)?;
            self.index_record(&record, offset);
            offset = next;
        }

        if checkpoint != NO_CHECKPOINT {
            if !self.record_offsets.contains(&checkpoint) {
                return Err(KernelError::CorruptLog {
                    offset: 0,
                    reason: format!("checkpoint pointer {} is not a record", checkpoint),
                });
            }
            self.last_checkpoint = Some(checkpoint);
        }
        Ok(())
    }

    fn index_record(&mut self, record: &LogRecord, offset: u64) {
        self.record_offsets.push(offset);
        *self.record_counts.entry(record.record_type()).or_insert(0) += 1;

        if let Some(txn_id) = record.txn_id() {
            self.max_txn_id = Some(self.max_txn_id.map_or(txn_id.0, |max| max.max(txn_id.0)));
        }
        match record {
            LogRecord::Begin { txn_id } => {
                self.txn_id_to_first_log_record.insert(*txn_id, offset);
            }
            LogRecord::Commit { txn_id } | LogRecord::Abort { txn_id } => {
                self.txn_id_to_first_log_record.remove(txn_id);
            }
            _ => {}
        }
    }

    fn write_to_log(&mut self, data: &[u8]) -> Result<()> {
        self.log_file.seek(SeekFrom::Start(self.current_offset))?;
        self.log_file.write_all(data)?;
        self.current_offset += data.len() as u64;
        Ok(())
    }

    fn write_checkpoint_pointer(&mut self, offset: u64) -> Result<()> {
        self.log_file.seek(SeekFrom::Start(0))?;
        self.log_file.write_all(&offset.to_le_bytes())?;
        Ok(())
    }

    /// Appends `record` and returns its offset. Does not force.
    fn append(&mut self, record: &LogRecord) -> Result<u64> {
        let start = self.current_offset;
        let mut buf = record.encode();
        buf.extend_from_slice(&start.to_le_bytes());

        self.write_to_log(&buf)?;
        self.index_record(record, start);
        debug!("Logged {} at {}", record, start);
        Ok(start)
    }

    /// Makes everything appended so far durable.
    pub fn force(&mut self) -> Result<()> {
        self.log_file.flush()?;
        self.log_file.sync_data()?;
        Ok(())
    }

    fn require_active(&self, txn_id: TransactionID) -> Result<()> {
        if self.txn_id_to_first_log_record.contains_key(&txn_id) {
            Ok(())
        } else {
            Err(KernelError::UnknownTransaction(txn_id))
        }
    }

    pub fn log_txn_begin(&mut self, txn_id: TransactionID) -> Result<u64> {
        if self.txn_id_to_first_log_record.contains_key(&txn_id) {
            return Err(KernelError::DuplicateBegin(txn_id));
        }
        self.append(&LogRecord::Begin { txn_id })
    }

    /// Appends the Commit record and forces the log.
    pub fn log_commit(&mut self, txn_id: TransactionID) -> Result<u64> {
        self.require_active(txn_id)?;
        let offset = self.append(&LogRecord::Commit { txn_id })?;
        self.force()?;
        Ok(offset)
    }

    /// Appends the Abort record and forces the log. Rolling the transaction
    /// back is the caller's job and must happen first.
    pub fn log_abort(&mut self, txn_id: TransactionID) -> Result<u64> {
        self.require_active(txn_id)?;
        let offset = self.append(&LogRecord::Abort { txn_id })?;
        self.force()?;
        Ok(offset)
    }

    /// Appends an Update record; the caller forces before the page is written.
    pub fn log_update(
        &mut self,
        txn_id: TransactionID,
        before: &PageImage,
        after: &PageImage,
    ) -> Result<u64> {
        self.require_active(txn_id)?;
        self.append(&LogRecord::Update {
            txn_id,
            before: before.clone(),
            after: after.clone(),
        })
    }

    pub fn log_clr(
        &mut self,
        txn_id: TransactionID,
        undo_offset: u64,
        image: &PageImage,
    ) -> Result<u64> {
        self.append(&LogRecord::Clr {
            txn_id,
            undo_offset,
            image: image.clone(),
        })
    }

    /// Records the set of active transactions and points the header at it.
    /// Dirty pages must already be flushed.
    pub fn log_checkpoint(&mut self) -> Result<u64> {
        let active = self.active_transactions();
        self.force()?;

        let offset = self.append(&LogRecord::Checkpoint { active })?;
        self.force()?;

        self.write_checkpoint_pointer(offset)?;
        self.force()?;
        self.last_checkpoint = Some(offset);
        info!("Checkpoint written at {}", offset);
        Ok(offset)
    }

    /// Reads the record starting at `offset`; returns it with the offset of the next record.
    pub fn read_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
        if offset < LOG_HEADER_SIZE || offset >= self.current_offset {
            return Err(KernelError::CorruptLog {
                offset,
                reason: "offset outside the log".to_string(),
            });
        }

        let mut file = &self.log_file;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file).take(self.current_offset - offset);

        let record = LogRecord::decode(&mut reader, offset)?;
        let start = read_u64(&mut reader).map_err(|_| KernelError::CorruptLog {
            offset,
            reason: "missing back-offset".to_string(),
        })?;
        if start != offset {
            return Err(KernelError::CorruptLog {
                offset,
                reason: format!("back-offset {} does not match record start", start),
            });
        }

        let next = offset + record.encoded_len() + 8;
        Ok((record, next))
    }

    /// Every record in log order, with its offset.
    pub fn records(&self) -> Result<Vec<(u64, LogRecord)>> {
        self.record_offsets
            .iter()
            .map(|&offset| self.read_record(offset).map(|(record, _)| (offset, record)))
            .collect()
    }

    /// Offsets of all records, oldest first.
    pub fn offsets(&self) -> &[u64] {
        &self.record_offsets
    }

    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_checkpoint
    }

    /// Offset just past the last record.
    pub fn end_offset(&self) -> u64 {
        self.current_offset
    }

    /// Transactions with a Begin record but no Commit or Abort yet.
    pub fn active_transactions(&self) -> Vec<TransactionID> {
        let mut active: Vec<TransactionID> =
            self.txn_id_to_first_log_record.keys().copied().collect();
        active.sort();
        active
    }

    pub fn is_active(&self, txn_id: TransactionID) -> bool {
        self.txn_id_to_first_log_record.contains_key(&txn_id)
    }

    /// Offset of the Begin record of an active transaction.
    pub fn first_log_record(&self, txn_id: TransactionID) -> Option<u64> {
        self.txn_id_to_first_log_record.get(&txn_id).copied()
    }

    /// Highest transaction id that appears anywhere in the log.
    pub fn max_txn_id(&self) -> Option<TransactionID> {
        self.max_txn_id.map(TransactionID)
    }

    /// Human-readable listing of the whole log.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::from("BEGIN LOG FILE\n");
        for (offset, record) in self.records()? {
            out.push_str(&format!("{:>8} {}\n", offset, record));
        }
        out.push_str("END LOG FILE\n");
        Ok(out)
    }

    pub fn get_total_log_records(&self) -> u64 {
        self.record_counts.values().sum()
    }

    pub fn get_total_log_records_of_type(&self, record_type: LogRecordType) -> u64 {
        *self.record_counts.get(&record_type).unwrap_or(&0)
    }
}
