use std::fmt;
use std::io::{self, Read};

use crate::common::{KernelError, PageID, Result, TransactionID};

/// Transaction field written for records that belong to no transaction.
pub const NO_TXN: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogRecordType {
    BeginRecord = 0,
    CommitRecord = 1,
    AbortRecord = 2,
    UpdateRecord = 3,
    ClrRecord = 4,
    CheckpointRecord = 5,
}

impl TryFrom<u8> for LogRecordType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(LogRecordType::BeginRecord),
            1 => Ok(LogRecordType::CommitRecord),
            2 => Ok(LogRecordType::AbortRecord),
            3 => Ok(LogRecordType::UpdateRecord),
            4 => Ok(LogRecordType::ClrRecord),
            5 => Ok(LogRecordType::CheckpointRecord),
            other => Err(other),
        }
    }
}

/// Full contents of one page as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page_id: PageID,
    pub data: Vec<u8>,
}

impl PageImage {
    pub fn new(page_id: PageID, data: Vec<u8>) -> Self {
        Self { page_id, data }
    }

    fn encoded_len(&self) -> u64 {
        4 + 8 + 4 + self.data.len() as u64
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.page_id.table_id.to_le_bytes());
        buf.extend_from_slice(&self.page_id.page_no.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
    }

    fn decode(reader: &mut impl Read) -> io::Result<Self> {
        let table_id = read_u32(reader)?;
        let page_no = read_u64(reader)?;
        let len = read_u32(reader)? as usize;

        // `reader` is bounded by the log length, so a bogus length fails here
        let mut data = Vec::new();
        reader.by_ref().take(len as u64).read_to_end(&mut data)?;
        if data.len() != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        Ok(Self::new(PageID::new(table_id, page_no), data))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin {
        txn_id: TransactionID,
    },
    Commit {
        txn_id: TransactionID,
    },
    Abort {
        txn_id: TransactionID,
    },
    Update {
        txn_id: TransactionID,
        before: PageImage,
        after: PageImage,
    },
    /// Undo of the Update at `undo_offset`; `image` is what the undo wrote.
    Clr {
        txn_id: TransactionID,
        undo_offset: u64,
        image: PageImage,
    },
    Checkpoint {
        active: Vec<TransactionID>,
    },
}

impl LogRecord {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            LogRecord::Begin { .. } => LogRecordType::BeginRecord,
            LogRecord::Commit { .. } => LogRecordType::CommitRecord,
            LogRecord::Abort { .. } => LogRecordType::AbortRecord,
            LogRecord::Update { .. } => LogRecordType::UpdateRecord,
            LogRecord::Clr { .. } => LogRecordType::ClrRecord,
            LogRecord::Checkpoint { .. } => LogRecordType::CheckpointRecord,
        }
    }

    pub fn txn_id(&self) -> Option<TransactionID> {
        match self {
            LogRecord::Begin { txn_id }
            | LogRecord::Commit { txn_id }
            | LogRecord::Abort { txn_id }
            | LogRecord::Update { txn_id, .. }
            | LogRecord::Clr { txn_id, .. } => Some(*txn_id),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Size of the encoded record, excluding the trailing back-offset.
    pub fn encoded_len(&self) -> u64 {
        let payload = match self {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => 0,
            LogRecord::Update { before, after, .. } => before.encoded_len() + after.encoded_len(),
            LogRecord::Clr { image, .. } => 8 + image.encoded_len(),
            LogRecord::Checkpoint { active } => 4 + 8 * active.len() as u64,
        };
        1 + 8 + payload
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize + 8);
        buf.push(self.record_type() as u8);
        let txn = self.txn_id().map_or(NO_TXN, |txn_id| txn_id.0);
        buf.extend_from_slice(&txn.to_le_bytes());

        match self {
            LogRecord::Begin { .. } | LogRecord::Commit { .. } | LogRecord::Abort { .. } => {}
            LogRecord::Update { before, after, .. } => {
                before.encode_into(&mut buf);
                after.encode_into(&mut buf);
            }
            LogRecord::Clr {
                undo_offset, image, ..
            } => {
                buf.extend_from_slice(&undo_offset.to_le_bytes());
                image.encode_into(&mut buf);
            }
            LogRecord::Checkpoint { active } => {
                buf.extend_from_slice(&(active.len() as u32).to_le_bytes());
                for txn_id in active {
                    buf.extend_from_slice(&txn_id.0.to_le_bytes());
                }
            }
        }
        buf
    }

    /// Decodes one record (without its back-offset) that starts at `offset`.
    pub fn decode(reader: &mut impl Read, offset: u64) -> Result<Self> {
        let corrupt = |reason: String| KernelError::CorruptLog { offset, reason };

        let mut type_buf = [0u8; 1];
        reader
            .read_exact(&mut type_buf)
            .map_err(|e| corrupt(format!("truncated header: {}", e)))?;
        let record_type = LogRecordType::try_from(type_buf[0])
            .map_err(|value| corrupt(format!("unknown record type {}", value)))?;

        Self::decode_body(record_type, reader)
            .map_err(|e| corrupt(format!("truncated {:?}: {}", record_type, e)))
    }

    fn decode_body(record_type: LogRecordType, reader: &mut impl Read) -> io::Result<Self> {
        let txn_id = TransactionID(read_u64(reader)?);

        let record = match record_type {
            LogRecordType::BeginRecord => LogRecord::Begin { txn_id },
            LogRecordType::CommitRecord => LogRecord::Commit { txn_id },
            LogRecordType::AbortRecord => LogRecord::Abort { txn_id },
            LogRecordType::UpdateRecord => LogRecord::Update {
                txn_id,
                before: PageImage::decode(reader)?,
                after: PageImage::decode(reader)?,
            },
            LogRecordType::ClrRecord => LogRecord::Clr {
                txn_id,
                undo_offset: read_u64(reader)?,
                image: PageImage::decode(reader)?,
            },
            LogRecordType::CheckpointRecord => {
                let count = read_u32(reader)?;
                let mut active = Vec::new();
                for _ in 0..count {
                    active.push(TransactionID(read_u64(reader)?));
                }
                LogRecord::Checkpoint { active }
            }
        };
        Ok(record)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogRecord::Begin { txn_id } => write!(f, "<{} BEGIN>", txn_id),
            LogRecord::Commit { txn_id } => write!(f, "<{} COMMIT>", txn_id),
            LogRecord::Abort { txn_id } => write!(f, "<{} ABORT>", txn_id),
            LogRecord::Update { txn_id, after, .. } => {
                write!(f, "<{} UPDATE pid={}>", txn_id, after.page_id)
            }
            LogRecord::Clr {
                txn_id,
                undo_offset,
                image,
            } => write!(f, "<{} CLR pid={} undo={}>", txn_id, image.page_id, undo_offset),
            LogRecord::Checkpoint { active } => {
                let active: Vec<String> = active.iter().map(ToString::to_string).collect();
                write!(f, "<CHECKPOINT [{}]>", active.join(", "))
            }
        }
    }
}

pub(crate) fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
