use std::path::Path;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{Mutex, RwLock};

use crate::buffer::BufferManager;
use crate::common::{KernelError, PageID, Result, TransactionID, TID};
use crate::storage::{File, FileMode, Page, PosixFile, Tuple};
use crate::transaction::LockMode;

/// A page shared between the buffer pool and the operators using it.
pub type SharedPage = Arc<RwLock<Page>>;

/// Durable, page-addressed storage for one table.
pub trait DbFile: Send + Sync {
    fn id(&self) -> u32;

    fn tuple_size(&self) -> usize;

    fn read_page(&self, page_id: PageID) -> Result<Page>;

    fn write_page(&self, page: &Page) -> Result<()>;

    fn num_pages(&self) -> Result<u64>;

    /// Finds room for `tuple`, stores it and sets its record id. Returns the
    /// pages that changed; they are already mutated and marked dirty.
    fn insert_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &mut Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>>;

    fn delete_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>>;

    /// Every live tuple of the table, read under Shared locks.
    fn scan(&self, txn_id: TransactionID, pool: &BufferManager) -> Result<Vec<Tuple>>;
}

/// Unordered collection of fixed-width tuples stored in consecutive pages.
pub struct HeapFile {
    table_id: u32,
    page_size: usize,
    tuple_size: usize,
    file: Mutex<Box<dyn File>>,
}

impl HeapFile {
    pub fn new(
        table_id: u32,
        file: Box<dyn File>,
        page_size: usize,
        tuple_size: usize,
    ) -> Result<Self> {
        if tuple_size == 0 || Page::slots_per_page(page_size, tuple_size) == 0 {
            return Err(KernelError::Other(format!(
                "Tuple size {} does not fit in a {} byte page",
                tuple_size, page_size
            )));
        }

        Ok(Self {
            table_id,
            page_size,
            tuple_size,
            file: Mutex::new(file),
        })
    }

    pub fn open(table_id: u32, path: &Path, page_size: usize, tuple_size: usize) -> Result<Self> {
        let file = PosixFile::new(path, FileMode::WRITE)?;
        Self::new(table_id, Box::new(file), page_size, tuple_size)
    }

    /// Appends a zeroed page and returns its id.
    pub fn append_empty_page(&self) -> Result<PageID> {
        let mut file = self.file.lock();
        let page_id = PageID::new(self.table_id, (file.size()? / self.page_size) as u64);
        let offset = self.page_offset(page_id)?;

        file.write_block(&Page::empty_data(self.page_size), offset)?;
        file.sync()?;

        debug!("Appended page {} to table {}", page_id.page_no, self.table_id);
        Ok(page_id)
    }

    /// Byte offset of `page_id`, or `PageNotFound` when the page could not
    /// possibly fit in an addressable file.
    fn page_offset(&self, page_id: PageID) -> Result<usize> {
        usize::try_from(page_id.page_no)
            .ok()
            .and_then(|page_no| page_no.checked_mul(self.page_size))
            .filter(|offset| offset.checked_add(self.page_size).is_some())
            .ok_or(KernelError::PageNotFound(page_id))
    }

    fn check_tuple(&self, tuple: &Tuple) -> Result<()> {
        if tuple.data.len() != self.tuple_size {
            return Err(KernelError::TupleSizeMismatch {
                expected: self.tuple_size,
                got: tuple.data.len(),
            });
        }
        Ok(())
    }

    fn insert_into(
        &self,
        txn_id: TransactionID,
        page: &SharedPage,
        page_id: PageID,
        tuple: &mut Tuple,
    ) -> Result<bool> {
        let mut guard = page.write();
        if guard.num_empty_slots() == 0 {
            return Ok(false);
        }

        let slot = guard.insert_tuple(&tuple.data)?;
        // Dirty before the latch drops so the page cannot be evicted in between
        guard.mark_dirty(Some(txn_id));
        tuple.record_id = Some(TID::new(page_id, slot));
        trace!("Inserted tuple into {} slot {}", page_id, slot);
        Ok(true)
    }
}

impl DbFile for HeapFile {
    fn id(&self) -> u32 {
        self.table_id
    }

    fn tuple_size(&self) -> usize {
        self.tuple_size
    }

    fn read_page(&self, page_id: PageID) -> Result<Page> {
        if page_id.table_id != self.table_id {
            return Err(KernelError::PageNotFound(page_id));
        }

        let offset = self.page_offset(page_id)?;
        let mut file = self.file.lock();
        if offset + self.page_size > file.size()? {
            return Err(KernelError::PageNotFound(page_id));
        }

        let data = file.read_block(offset, self.page_size)?;
        Ok(Page::new(page_id, data, self.tuple_size))
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        let page_id = page.id();
        if page_id.table_id != self.table_id || page.data().len() != self.page_size {
            return Err(KernelError::Other(format!(
                "Page {} does not belong to table {}",
                page_id, self.table_id
            )));
        }

        let offset = self.page_offset(page_id)?;
        let mut file = self.file.lock();
        // At most one page past the end; anything further was never appended
        if offset > file.size()? {
            return Err(KernelError::PageNotFound(page_id));
        }
        file.write_block(page.data(), offset)?;
        file.sync()?;
        trace!("Wrote page {} to storage", page_id);
        Ok(())
    }

    fn num_pages(&self) -> Result<u64> {
        Ok((self.file.lock().size()? / self.page_size) as u64)
    }

    fn insert_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &mut Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>> {
        self.check_tuple(tuple)?;

        for page_no in 0..self.num_pages()? {
            let page_id = PageID::new(self.table_id, page_no);
            let held_before = pool.holds_lock(txn_id, page_id);

            let page = pool.get_page(txn_id, page_id, LockMode::Shared)?;
            let has_room = page.read().num_empty_slots() > 0;
            if !has_room {
                // Nothing was read that matters to the caller
                if !held_before {
                    pool.release_page(txn_id, page_id);
                }
                continue;
            }

            let page = pool.get_page(txn_id, page_id, LockMode::Exclusive)?;
            if self.insert_into(txn_id, &page, page_id, tuple)? {
                return Ok(vec![page]);
            }
        }

        let page_id = self.append_empty_page()?;
        let page = pool.get_page(txn_id, page_id, LockMode::Exclusive)?;
        if !self.insert_into(txn_id, &page, page_id, tuple)? {
            return Err(KernelError::PageFull(page_id));
        }
        Ok(vec![page])
    }

    fn delete_tuple(
        &self,
        txn_id: TransactionID,
        tuple: &Tuple,
        pool: &BufferManager,
    ) -> Result<Vec<SharedPage>> {
        let record_id = tuple
            .record_id
            .ok_or_else(|| KernelError::Other("Tuple has no record id".to_string()))?;
        if record_id.page_id.table_id != self.table_id {
            return Err(KernelError::PageNotFound(record_id.page_id));
        }

        let page = pool.get_page(txn_id, record_id.page_id, LockMode::Exclusive)?;
        {
            let mut guard = page.write();
            guard.delete_tuple(record_id.slot_id)?;
            guard.mark_dirty(Some(txn_id));
        }
        Ok(vec![page])
    }

    fn scan(&self, txn_id: TransactionID, pool: &BufferManager) -> Result<Vec<Tuple>> {
        let mut tuples = Vec::new();

        for page_no in 0..self.num_pages()? {
            let page_id = PageID::new(self.table_id, page_no);
            let page = pool.get_page(txn_id, page_id, LockMode::Shared)?;
            let page = page.read();
            tuples.extend(page.tuples().map(|(slot, data)| Tuple {
                data: data.to_vec(),
                record_id: Some(TID::new(page_id, slot)),
            }));
        }

        Ok(tuples)
    }
}
