pub mod buffer;
pub mod common;
pub mod log_mod;
pub mod storage;
pub mod transaction;

pub use buffer::BufferManager;
pub use common::{DatabaseConfig, KernelError, PageID, Result, TransactionID, TID};
pub use log_mod::{LogManager, RecoveryManager};
pub use storage::DBFiles;
pub use transaction::{LockManager, LockMode, TransactionManager};

use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;

use storage::{Catalog, HeapFile, Tuple};

/// A database rooted at one directory: tables, the write-ahead log and the
/// components that tie them together. Shareable across threads.
pub struct Database {
    files: DBFiles,
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    log_manager: Arc<Mutex<LogManager>>,
    lock_manager: Arc<LockManager>,
    buffer_manager: Arc<BufferManager>,
    transaction_manager: TransactionManager,
}

impl Database {
    /// Opens the database at `db_path`, creating it if needed, and runs
    /// crash recovery before returning.
    pub fn open(db_path: &Path, config: DatabaseConfig) -> Result<Self> {
        let files = DBFiles::new(db_path)?;

        let catalog = Arc::new(Catalog::new());
        for schema in Catalog::load_schemas(&files.get_catalog_file_path())? {
            let file = HeapFile::open(
                schema.id,
                &files.get_data_file_path(schema.id),
                config.page_size,
                schema.tuple_size,
            )?;
            catalog.add_table(Arc::new(file), &schema.name);
        }

        let log_manager = Arc::new(Mutex::new(LogManager::new(&files.get_log_file_path())?));
        let lock_manager = Arc::new(LockManager::new(
            config.lock_timeout,
            config.detect_deadlocks,
        ));
        let buffer_manager = Arc::new(BufferManager::new(
            config.buffer_pool_size,
            Arc::clone(&catalog),
            Arc::clone(&lock_manager),
            Arc::clone(&log_manager),
        ));

        let first_id = log_manager.lock().max_txn_id().map_or(0, |max| max.0 + 1);
        let transaction_manager = TransactionManager::new(Arc::clone(&buffer_manager), first_id);

        let db = Self {
            files,
            config,
            catalog,
            log_manager,
            lock_manager,
            buffer_manager,
            transaction_manager,
        };
        db.recover()?;

        info!("Opened database at {}", db_path.display());
        Ok(db)
    }

    /// Creates an empty table of fixed-width tuples and returns its id.
    pub fn create_table(&self, name: &str, tuple_size: usize) -> Result<u32> {
        if let Ok(table_id) = self.catalog.table_id(name) {
            return Err(KernelError::Other(format!(
                "Table {} already exists with id {}",
                name, table_id
            )));
        }

        let table_id = self.catalog.next_table_id();
        let file = HeapFile::open(
            table_id,
            &self.files.get_data_file_path(table_id),
            self.config.page_size,
            tuple_size,
        )?;
        self.catalog.add_table(Arc::new(file), name);
        self.catalog.save(&self.files.get_catalog_file_path())?;

        info!("Created table {} with id {}", name, table_id);
        Ok(table_id)
    }

    pub fn table_id(&self, name: &str) -> Result<u32> {
        self.catalog.table_id(name)
    }

    pub fn begin(&self) -> Result<TransactionID> {
        self.transaction_manager.start_txn()
    }

    pub fn commit(&self, txn_id: TransactionID) -> Result<()> {
        self.transaction_manager.commit_txn(txn_id)
    }

    pub fn abort(&self, txn_id: TransactionID) -> Result<()> {
        self.transaction_manager.abort_txn(txn_id)
    }

    /// See [`TransactionManager::execute`].
    pub fn execute<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(TransactionID) -> Result<T>,
    {
        self.transaction_manager.execute(f)
    }

    pub fn insert_tuple(&self, txn_id: TransactionID, table_id: u32, data: &[u8]) -> Result<TID> {
        let mut tuple = Tuple::new(data.to_vec());
        self.buffer_manager.insert_tuple(txn_id, table_id, &mut tuple)?;
        tuple
            .record_id
            .ok_or_else(|| KernelError::Other("Insert did not assign a record id".to_string()))
    }

    pub fn delete_tuple(&self, txn_id: TransactionID, record_id: TID) -> Result<()> {
        let tuple = Tuple {
            data: Vec::new(),
            record_id: Some(record_id),
        };
        self.buffer_manager.delete_tuple(txn_id, &tuple)
    }

    /// Reads one tuple under a Shared lock on its page.
    pub fn read_tuple(&self, txn_id: TransactionID, record_id: TID) -> Result<Vec<u8>> {
        let page = self
            .buffer_manager
            .get_page(txn_id, record_id.page_id, LockMode::Shared)?;
        let page = page.read();
        Ok(page.tuple(record_id.slot_id)?.to_vec())
    }

    pub fn scan(&self, txn_id: TransactionID, table_id: u32) -> Result<Vec<Tuple>> {
        self.catalog
            .get_database_file(table_id)?
            .scan(txn_id, &self.buffer_manager)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.buffer_manager.checkpoint()
    }

    /// Replays the log against storage. Meant for startup; transactions
    /// still running in this process would be rolled back as losers.
    pub fn recover(&self) -> Result<()> {
        let mut log = self.log_manager.lock();
        RecoveryManager::new(Arc::clone(&self.catalog))
            .recover(&mut log, Some(&*self.buffer_manager))
    }

    /// Checkpoints so the next open has little to redo.
    pub fn close(self) -> Result<()> {
        self.checkpoint()?;
        info!("Closed database at {}", self.files.root().display());
        Ok(())
    }

    pub fn files(&self) -> &DBFiles {
        &self.files
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn log_manager(&self) -> &Arc<Mutex<LogManager>> {
        &self.log_manager
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }
}
