use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::common::{KernelError, PageID, Result, TransactionID};
use crate::log_mod::{LogManager, PageImage, RecoveryManager};
use crate::storage::{Catalog, Page, SharedPage, Tuple};
use crate::transaction::{LockManager, LockMode};

struct BufferFrame {
    page: SharedPage,
    last_access: u64,
}

impl BufferFrame {
    fn new(page: SharedPage, tick: u64) -> Self {
        Self {
            page,
            last_access: tick,
        }
    }

    fn is_clean(&self) -> bool {
        // A page someone is writing right now is not a candidate
        self.page
            .try_read()
            .map_or(false, |page| !page.is_dirty())
    }
}

#[derive(Default)]
struct FrameTable {
    frames: HashMap<PageID, BufferFrame>,
    clock: u64,
}

impl FrameTable {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded page cache. Every access goes through the lock manager, and dirty
/// pages reach storage only after their Update record is forced to the log.
///
/// Lock order: page latch, then log, then frame table. Page latches are never
/// taken while the log is locked.
pub struct BufferManager {
    frames: Mutex<FrameTable>,
    capacity: usize,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<Mutex<LogManager>>,
}

impl BufferManager {
    pub fn new(
        capacity: usize,
        catalog: Arc<Catalog>,
        lock_manager: Arc<LockManager>,
        log_manager: Arc<Mutex<LogManager>>,
    ) -> Self {
        Self {
            frames: Mutex::new(FrameTable::default()),
            capacity,
            catalog,
            lock_manager,
            log_manager,
        }
    }

    pub fn log_manager(&self) -> &Arc<Mutex<LogManager>> {
        &self.log_manager
    }

    /// Locks `page_id` for `txn_id` in `mode` (possibly blocking), then
    /// returns the cached page, reading it from storage on a miss.
    pub fn get_page(
        &self,
        txn_id: TransactionID,
        page_id: PageID,
        mode: LockMode,
    ) -> Result<SharedPage> {
        self.lock_manager.request_lock(page_id, txn_id, mode)?;

        let mut table = self.frames.lock();
        let tick = table.tick();
        if let Some(frame) = table.frames.get_mut(&page_id) {
            frame.last_access = tick;
            return Ok(Arc::clone(&frame.page));
        }

        if table.frames.len() >= self.capacity {
            self.evict_page(&mut table)?;
        }

        let file = self.catalog.get_database_file(page_id.table_id)?;
        let page = Arc::new(RwLock::new(file.read_page(page_id)?));
        table
            .frames
            .insert(page_id, BufferFrame::new(Arc::clone(&page), tick));
        trace!("Loaded page {} for {}", page_id, txn_id);
        Ok(page)
    }

    /// Drops one lock before the transaction ends. Only safe when the page
    /// was not used for anything the transaction depends on.
    pub fn release_page(&self, txn_id: TransactionID, page_id: PageID) {
        self.lock_manager.release_lock(page_id, txn_id);
    }

    pub fn holds_lock(&self, txn_id: TransactionID, page_id: PageID) -> bool {
        self.lock_manager.holds_lock(page_id, txn_id)
    }

    /// Removes the least recently used clean page. Dirty pages stay put.
    fn evict_page(&self, table: &mut FrameTable) -> Result<()> {
        let victim = table
            .frames
            .iter()
            .filter(|(_, frame)| frame.is_clean())
            .min_by_key(|(_, frame)| frame.last_access)
            .map(|(page_id, _)| *page_id);

        match victim {
            Some(page_id) => {
                table.frames.remove(&page_id);
                debug!("Evicted page {}", page_id);
                Ok(())
            }
            None => Err(KernelError::ResourceExhausted(self.capacity)),
        }
    }

    /// Puts a page an operator changed back under its id, making room if it
    /// was evicted in the meantime.
    fn refresh_frame(&self, page: &SharedPage) -> Result<()> {
        let page_id = page.read().id();
        let mut table = self.frames.lock();
        let tick = table.tick();

        if let Some(frame) = table.frames.get_mut(&page_id) {
            frame.page = Arc::clone(page);
            frame.last_access = tick;
            return Ok(());
        }

        if table.frames.len() >= self.capacity {
            self.evict_page(&mut table)?;
        }
        table
            .frames
            .insert(page_id, BufferFrame::new(Arc::clone(page), tick));
        Ok(())
    }

    fn refresh_frames(&self, txn_id: TransactionID, pages: Vec<SharedPage>) -> Result<()> {
        for page in pages {
            trace!("{} modified page {}", txn_id, page.read().id());
            self.refresh_frame(&page)?;
        }
        Ok(())
    }

    /// Adds `tuple` to table `table_id`. The pages it touched stay cached and dirty.
    pub fn insert_tuple(
        &self,
        txn_id: TransactionID,
        table_id: u32,
        tuple: &mut Tuple,
    ) -> Result<()> {
        let file = self.catalog.get_database_file(table_id)?;
        let pages = file.insert_tuple(txn_id, tuple, self)?;
        self.refresh_frames(txn_id, pages)
    }

    pub fn delete_tuple(&self, txn_id: TransactionID, tuple: &Tuple) -> Result<()> {
        let table_id = tuple
            .record_id
            .map(|record_id| record_id.page_id.table_id)
            .ok_or_else(|| KernelError::Other("Tuple has no record id".to_string()))?;

        let file = self.catalog.get_database_file(table_id)?;
        let pages = file.delete_tuple(txn_id, tuple, self)?;
        self.refresh_frames(txn_id, pages)
    }

    fn cached(&self, page_id: PageID) -> Option<SharedPage> {
        self.frames
            .lock()
            .frames
            .get(&page_id)
            .map(|frame| Arc::clone(&frame.page))
    }

    /// Writes a dirty page to storage after logging and forcing its Update
    /// record. Clean or uncached pages are left alone.
    pub fn flush_page(&self, page_id: PageID) -> Result<()> {
        let Some(page) = self.cached(page_id) else {
            return Ok(());
        };

        let mut page = page.write();
        let Some(txn_id) = page.dirtier() else {
            return Ok(());
        };

        {
            let mut log = self.log_manager.lock();
            // A finished dirtier is a commit whose page write failed; its
            // Update record already precedes the Commit record
            if log.is_active(txn_id) {
                log.log_update(txn_id, &page.before_image(), &page.image())?;
                log.force()?;
            }
        }

        self.write_page(&page)?;
        page.mark_dirty(None);
        debug!("Flushed page {} dirtied by {}", page_id, txn_id);
        Ok(())
    }

    /// Flushes every cached page. Uncommitted changes reach storage too; the
    /// log can undo them.
    pub fn flush_all_pages(&self) -> Result<()> {
        let page_ids: Vec<PageID> = self.frames.lock().frames.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Flushes the pages `txn_id` has locked.
    pub fn flush_pages(&self, txn_id: TransactionID) -> Result<()> {
        for page_id in self.lock_manager.pages_held(txn_id) {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes a page from the cache without writing it.
    pub fn discard_page(&self, page_id: PageID) {
        if self.frames.lock().frames.remove(&page_id).is_some() {
            trace!("Discarded page {}", page_id);
        }
    }

    pub fn is_cached(&self, page_id: PageID) -> bool {
        self.frames.lock().frames.contains_key(&page_id)
    }

    pub fn num_cached(&self) -> usize {
        self.frames.lock().frames.len()
    }

    fn touched_pages(&self, txn_id: TransactionID) -> Vec<SharedPage> {
        self.lock_manager
            .pages_held(txn_id)
            .into_iter()
            .filter_map(|page_id| self.cached(page_id))
            .collect()
    }

    /// Ends `txn_id`: commit makes its changes durable, abort undoes them.
    /// Either way every lock it holds is released before returning.
    pub fn transaction_complete(&self, txn_id: TransactionID, commit: bool) -> Result<()> {
        let result = if commit {
            self.commit(txn_id)
        } else {
            self.abort(txn_id)
        };

        self.lock_manager.release_all(txn_id);
        result
    }

    fn commit(&self, txn_id: TransactionID) -> Result<()> {
        let touched = self.touched_pages(txn_id);
        // Latched for the whole commit so a concurrent flush cannot log these
        // pages after the Commit record
        let mut pages: Vec<_> = touched.iter().map(|page| page.write()).collect();

        let images: Vec<(PageImage, PageImage)> = pages
            .iter()
            .filter(|page| page.dirtier() == Some(txn_id))
            .map(|page| (page.before_image(), page.image()))
            .collect();

        // Updates and the Commit record are durable before any page is written.
        // The log stays locked until the writes finish so no checkpoint record
        // can land between the Commit record and the pages it covers.
        let mut log = self.log_manager.lock();
        for (before, after) in &images {
            log.log_update(txn_id, before, after)?;
        }
        log.log_commit(txn_id)?;

        let mut written = 0;
        for page in pages.iter_mut() {
            if page.dirtier() == Some(txn_id) {
                match self.write_page(&**page) {
                    Ok(()) => {
                        page.mark_dirty(None);
                        written += 1;
                    }
                    // Committed regardless; the page stays dirty for the next flush
                    Err(e) => warn!("Writing page {} for {} failed: {}", page.id(), txn_id, e),
                }
            }
            page.set_before_image();
        }
        drop(log);

        info!(
            "Committed {} ({} of {} page(s) written)",
            txn_id,
            written,
            images.len()
        );
        Ok(())
    }

    fn write_page(&self, page: &Page) -> Result<()> {
        self.catalog
            .get_database_file(page.id().table_id)?
            .write_page(page)
    }

    fn abort(&self, txn_id: TransactionID) -> Result<()> {
        // Changes that never left the cache vanish with their frames
        for page in self.touched_pages(txn_id) {
            let mut page = page.write();
            if page.dirtier() == Some(txn_id) {
                page.mark_dirty(None);
                self.discard_page(page.id());
            }
        }

        // Anything flushed earlier is restored from the log
        let mut log = self.log_manager.lock();
        RecoveryManager::new(Arc::clone(&self.catalog)).rollback(&mut log, txn_id, Some(self))?;
        log.log_abort(txn_id)?;

        info!("Aborted {}", txn_id);
        Ok(())
    }

    /// Flushes every cached page and records the active transactions.
    pub fn checkpoint(&self) -> Result<()> {
        self.flush_all_pages()?;
        self.log_manager.lock().log_checkpoint()?;
        Ok(())
    }
}
