mod lock_manager;
mod transaction;

pub use lock_manager::{Lock, LockManager, LockMode, LockState};
pub use transaction::TransactionManager;
