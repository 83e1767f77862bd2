mod log_manager;
mod log_record;
mod recovery;

pub use log_manager::{LogManager, LOG_HEADER_SIZE, NO_CHECKPOINT};
pub use log_record::{LogRecord, LogRecordType, PageImage, NO_TXN};
pub use recovery::RecoveryManager;
