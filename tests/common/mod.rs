#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tempfile::TempDir;
use txn_kernel::{
    storage::{Catalog, DbFile, FileMode, HeapFile, MemoryFile, Page, SharedPage, Tuple},
    BufferManager, Database, DatabaseConfig, LockManager, LogManager, PageID, Result,
    TransactionID,
};

pub const PAGE_SIZE: usize = 64;
pub const TUPLE_SIZE: usize = 8;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Small pages so a handful of tuples spans several of them.
pub fn test_config() -> DatabaseConfig {
    DatabaseConfig {
        page_size: PAGE_SIZE,
        buffer_pool_size: 8,
        lock_timeout: Duration::from_millis(300),
        detect_deadlocks: true,
    }
}

pub fn open_db(dir: &TempDir) -> Result<Database> {
    init_logging();
    Database::open(dir.path(), test_config())
}

pub fn reopen(dir: &TempDir, db: Database) -> Result<Database> {
    // Dropping without close leaves whatever a crash would leave
    drop(db);
    Database::open(dir.path(), test_config())
}

pub fn row(n: u64) -> Vec<u8> {
    n.to_le_bytes().to_vec()
}

pub fn rows(db: &Database, table_id: u32) -> Result<Vec<Vec<u8>>> {
    let mut rows: Vec<Vec<u8>> = db
        .execute(|txn| db.scan(txn, table_id))?
        .into_iter()
        .map(|tuple| tuple.data)
        .collect();
    rows.sort();
    Ok(rows)
}

/// A buffer pool over one in-memory table with `pages` empty pages.
pub struct PoolFixture {
    pub _dir: TempDir,
    pub table: Arc<HeapFile>,
    pub lock_manager: Arc<LockManager>,
    pub log_manager: Arc<Mutex<LogManager>>,
    pub pool: BufferManager,
}

pub fn pool_fixture(capacity: usize, pages: usize) -> Result<PoolFixture> {
    let table = memory_table(pages)?;
    pool_over(capacity, table.clone(), table)
}

/// Like [`pool_fixture`], but the pool reaches the table through a
/// [`FaultyFile`] the test can make fail or stall on writes.
pub fn faulty_pool_fixture(
    capacity: usize,
    pages: usize,
) -> Result<(PoolFixture, Arc<FaultyFile>)> {
    let table = memory_table(pages)?;
    let faulty = Arc::new(FaultyFile::new(table.clone()));
    let fixture = pool_over(capacity, table, faulty.clone())?;
    Ok((fixture, faulty))
}

fn memory_table(pages: usize) -> Result<Arc<HeapFile>> {
    init_logging();
    let table = Arc::new(HeapFile::new(
        0,
        Box::new(MemoryFile::new(FileMode::WRITE)),
        PAGE_SIZE,
        TUPLE_SIZE,
    )?);
    for _ in 0..pages {
        table.append_empty_page()?;
    }
    Ok(table)
}

fn pool_over(
    capacity: usize,
    table: Arc<HeapFile>,
    registered: Arc<dyn DbFile>,
) -> Result<PoolFixture> {
    let dir = TempDir::new()?;

    let catalog = Arc::new(Catalog::new());
    catalog.add_table(registered, "t");

    let lock_manager = Arc::new(LockManager::new(Duration::from_millis(300), true));
    let log_manager = Arc::new(Mutex::new(LogManager::new(&log_path(&dir))?));
    let pool = BufferManager::new(
        capacity,
        catalog,
        Arc::clone(&lock_manager),
        Arc::clone(&log_manager),
    );

    Ok(PoolFixture {
        _dir: dir,
        table,
        lock_manager,
        log_manager,
        pool,
    })
}

/// Delegates to a heap file, except that page writes can be made to fail or
/// to wait on a gate held by the test.
pub struct FaultyFile {
    inner: Arc<HeapFile>,
    fail_writes: AtomicBool,
    writes_started: AtomicUsize,
    gate: Mutex<()>,
}

impl FaultyFile {
    pub fn new(inner: Arc<HeapFile>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            writes_started: AtomicUsize::new(0),
            gate: Mutex::new(()),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes block until the returned guard is dropped.
    pub fn hold_writes(&self) -> MutexGuard<'_, ()> {
        self.gate.lock()
    }

    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }
}

impl DbFile for FaultyFile {
    fn id(&self) -> u32 {
        self.inner.id()
    }

    fn tuple_size(&self) -> usize {
        self.inner.tuple_size()
    }

    fn read_page(&self, page_id: PageID) -> Result<Page> {
        self.inner.read_page(page_id)
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);
        drop(self.gate.lock());
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk unavailable").into());
        }
        self.inner.write_page(page)
    }

    fn num_pages(&self) -> Result<u64> {
        self.inner.num_pages()
    }

    fn insert_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &mut Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>> {
        self.inner.insert_tuple(txn_id, tuple, pool)
    }

    fn delete_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>> {
        self.inner.delete_tuple(txn_id, tuple, pool)
    }

    fn scan(&self, txn_id: TransactionID, pool: &BufferManager) -> Result<Vec<Tuple>> {
        self.inner.scan(txn_id, pool)
    }
}

pub fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("wal.log")
}
