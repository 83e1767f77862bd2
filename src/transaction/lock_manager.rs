//! Page-granular two-phase locking.
//!
//! All lock records and the per-transaction indexes live behind one mutex.
//! Each `Lock` owns a condition variable used with that mutex, so a waiter
//! sleeps without holding the table and is woken when a holder leaves.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::common::{KernelError, PageID, Result, TransactionID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Observable state of a page lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Shared(usize),
    Exclusive(TransactionID),
    /// The sole Shared holder is waiting to become Exclusive.
    Upgrading(TransactionID),
}

#[derive(Debug)]
pub struct Lock {
    mode: LockMode,
    holders: HashSet<TransactionID>,
    waiters: VecDeque<(TransactionID, LockMode)>,
    cvar: Arc<Condvar>,
}

impl Lock {
    fn new() -> Self {
        Self {
            mode: LockMode::Shared,
            holders: HashSet::new(),
            waiters: VecDeque::new(),
            cvar: Arc::new(Condvar::new()),
        }
    }

    fn is_sole_holder(&self, txn_id: TransactionID) -> bool {
        self.holders.len() == 1 && self.holders.contains(&txn_id)
    }

    fn can_grant(&self, txn_id: TransactionID, mode: LockMode) -> bool {
        if self.holders.is_empty() || self.is_sole_holder(txn_id) {
            return true;
        }
        mode == LockMode::Shared && self.mode == LockMode::Shared
    }

    fn grant(&mut self, txn_id: TransactionID, mode: LockMode) {
        // A Shared request from the Exclusive holder keeps the stronger mode
        if mode == LockMode::Exclusive || self.holders.is_empty() {
            self.mode = mode;
        }
        self.holders.insert(txn_id);
        self.waiters.retain(|(waiter, _)| *waiter != txn_id);
    }

    fn state(&self) -> LockState {
        if self.holders.is_empty() {
            return LockState::Free;
        }
        if self.mode == LockMode::Exclusive {
            if let Some(&holder) = self.holders.iter().next() {
                return LockState::Exclusive(holder);
            }
        }

        let upgrading = self
            .waiters
            .iter()
            .find(|(waiter, mode)| *mode == LockMode::Exclusive && self.holders.contains(waiter));
        match upgrading {
            Some(&(waiter, _)) => LockState::Upgrading(waiter),
            None => LockState::Shared(self.holders.len()),
        }
    }

    fn is_unused(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<PageID, Lock>,
    held: HashMap<TransactionID, HashSet<PageID>>,
    waiting: HashMap<TransactionID, HashSet<PageID>>,
}

impl LockTable {
    fn stop_waiting(&mut self, txn_id: TransactionID, page_id: PageID) {
        if let Some(pages) = self.waiting.get_mut(&txn_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.waiting.remove(&txn_id);
            }
        }
    }

    fn abandon_wait(&mut self, txn_id: TransactionID, page_id: PageID) {
        if let Some(lock) = self.locks.get_mut(&page_id) {
            lock.waiters.retain(|(waiter, _)| *waiter != txn_id);
            if lock.is_unused() {
                self.locks.remove(&page_id);
            }
        }
        self.stop_waiting(txn_id, page_id);
    }

    fn release(&mut self, txn_id: TransactionID, page_id: PageID) {
        if let Some(lock) = self.locks.get_mut(&page_id) {
            if lock.holders.remove(&txn_id) {
                lock.cvar.notify_all();
            }
            if lock.holders.is_empty() {
                lock.mode = LockMode::Shared;
            }
            if lock.is_unused() {
                self.locks.remove(&page_id);
            }
        }

        if let Some(pages) = self.held.get_mut(&txn_id) {
            pages.remove(&page_id);
            if pages.is_empty() {
                self.held.remove(&txn_id);
            }
        }
    }

    /// Transactions `txn_id` is currently blocked behind.
    fn blockers(&self, txn_id: TransactionID) -> Vec<TransactionID> {
        let Some(pages) = self.waiting.get(&txn_id) else {
            return Vec::new();
        };

        pages
            .iter()
            .filter_map(|page_id| self.locks.get(page_id))
            .flat_map(|lock| lock.holders.iter().copied())
            .filter(|holder| *holder != txn_id)
            .collect()
    }

    /// True when the wait-for graph has a path from `start` back to itself.
    fn closes_cycle(&self, start: TransactionID) -> bool {
        let mut visited = HashSet::new();
        let mut stack = self.blockers(start);

        while let Some(txn_id) = stack.pop() {
            if txn_id == start {
                return true;
            }
            if visited.insert(txn_id) {
                stack.extend(self.blockers(txn_id));
            }
        }
        false
    }
}

pub struct LockManager {
    table: Mutex<LockTable>,
    timeout: Duration,
    detect_deadlocks: bool,
}

impl LockManager {
    pub fn new(timeout: Duration, detect_deadlocks: bool) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            timeout,
            detect_deadlocks,
        }
    }

    /// Blocks until `txn_id` holds `page_id` in at least `mode`.
    ///
    /// Fails with `TransactionAborted` when the wait exceeds the timeout or,
    /// with deadlock detection on, when waiting would close a cycle. Locks the
    /// transaction already holds are kept; the caller must abort it.
    pub fn request_lock(
        &self,
        page_id: PageID,
        txn_id: TransactionID,
        mode: LockMode,
    ) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut table = self.table.lock();

        loop {
            let lock = table.locks.entry(page_id).or_insert_with(Lock::new);
            if lock.can_grant(txn_id, mode) {
                lock.grant(txn_id, mode);
                table.stop_waiting(txn_id, page_id);
                table.held.entry(txn_id).or_default().insert(page_id);
                trace!("{} granted {:?} on {}", txn_id, mode, page_id);
                return Ok(());
            }

            if !lock.waiters.iter().any(|(waiter, _)| *waiter == txn_id) {
                lock.waiters.push_back((txn_id, mode));
            }
            let cvar = Arc::clone(&lock.cvar);
            table.waiting.entry(txn_id).or_default().insert(page_id);

            if self.detect_deadlocks && table.closes_cycle(txn_id) {
                table.abandon_wait(txn_id, page_id);
                warn!("Deadlock: {} waiting for {:?} on {}", txn_id, mode, page_id);
                return Err(KernelError::TransactionAborted {
                    txn: txn_id,
                    reason: format!("deadlock waiting for page {}", page_id),
                });
            }

            debug!("{} waiting for {:?} on {}", txn_id, mode, page_id);
            let timed_out = cvar.wait_until(&mut table, deadline).timed_out();
            if timed_out || Instant::now() >= deadline {
                table.abandon_wait(txn_id, page_id);
                warn!("{} timed out waiting for {:?} on {}", txn_id, mode, page_id);
                return Err(KernelError::TransactionAborted {
                    txn: txn_id,
                    reason: format!("lock wait on page {} timed out", page_id),
                });
            }
        }
    }

    pub fn holds_lock(&self, page_id: PageID, txn_id: TransactionID) -> bool {
        self.table
            .lock()
            .held
            .get(&txn_id)
            .map_or(false, |pages| pages.contains(&page_id))
    }

    pub fn release_lock(&self, page_id: PageID, txn_id: TransactionID) {
        self.table.lock().release(txn_id, page_id);
        trace!("{} released {}", txn_id, page_id);
    }

    /// Releases every lock `txn_id` holds, in no particular order.
    pub fn release_all(&self, txn_id: TransactionID) {
        let mut table = self.table.lock();
        let pages = table.held.remove(&txn_id).unwrap_or_default();
        for page_id in &pages {
            table.release(txn_id, *page_id);
        }
        table.waiting.remove(&txn_id);
        debug!("{} released {} lock(s)", txn_id, pages.len());
    }

    pub fn pages_held(&self, txn_id: TransactionID) -> Vec<PageID> {
        let mut pages: Vec<PageID> = self
            .table
            .lock()
            .held
            .get(&txn_id)
            .map(|pages| pages.iter().copied().collect())
            .unwrap_or_default();
        pages.sort();
        pages
    }

    pub fn lock_state(&self, page_id: PageID) -> LockState {
        self.table
            .lock()
            .locks
            .get(&page_id)
            .map_or(LockState::Free, Lock::state)
    }

    /// Number of lock records currently in the table.
    pub fn num_locks(&self) -> usize {
        self.table.lock().locks.len()
    }
}
