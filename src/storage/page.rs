use crate::common::{KernelError, PageID, Result, TransactionID};
use crate::log_mod::PageImage;

/// In-memory image of one heap page.
///
/// Layout: a bitmap header with one bit per slot, followed by fixed-width
/// tuple slots. The page also remembers which transaction dirtied it and the
/// contents it had before that transaction's first modification.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageID,
    tuple_size: usize,
    data: Vec<u8>,
    dirtier: Option<TransactionID>,
    // None while the page still matches its last committed contents
    before: Option<Vec<u8>>,
}

impl Page {
    pub fn new(id: PageID, data: Vec<u8>, tuple_size: usize) -> Self {
        Self {
            id,
            tuple_size,
            data,
            dirtier: None,
            before: None,
        }
    }

    pub fn empty_data(page_size: usize) -> Vec<u8> {
        vec![0; page_size]
    }

    /// Number of tuple slots a page of `page_size` bytes holds.
    pub fn slots_per_page(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    pub fn id(&self) -> PageID {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn image(&self) -> PageImage {
        PageImage::new(self.id, self.data.clone())
    }

    pub fn before_image(&self) -> PageImage {
        let data = self.before.as_ref().unwrap_or(&self.data);
        PageImage::new(self.id, data.clone())
    }

    /// Current contents become the new baseline, e.g. once they are committed.
    pub fn set_before_image(&mut self) {
        self.before = None;
    }

    pub fn mark_dirty(&mut self, dirtier: Option<TransactionID>) {
        self.dirtier = dirtier;
    }

    pub fn dirtier(&self) -> Option<TransactionID> {
        self.dirtier
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    pub fn num_slots(&self) -> usize {
        Self::slots_per_page(self.data.len(), self.tuple_size)
    }

    fn header_len(&self) -> usize {
        (self.num_slots() + 7) / 8
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.num_slots() && self.data[slot / 8] & (1 << (slot % 8)) != 0
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.num_slots())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    fn slot_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = self.header_len() + slot * self.tuple_size;
        start..start + self.tuple_size
    }

    fn set_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1 << (slot % 8);
        if used {
            self.data[slot / 8] |= mask;
        } else {
            self.data[slot / 8] &= !mask;
        }
    }

    fn capture_before_image(&mut self) {
        if self.before.is_none() {
            self.before = Some(self.data.clone());
        }
    }

    pub fn tuple(&self, slot: usize) -> Result<&[u8]> {
        if slot >= self.num_slots() {
            return Err(KernelError::InvalidSlotIndex(slot));
        }
        if !self.is_slot_used(slot) {
            return Err(KernelError::EmptySlot(slot));
        }
        Ok(&self.data[self.slot_range(slot)])
    }

    /// Stores `tuple` in the first free slot and returns that slot.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Result<usize> {
        if tuple.len() != self.tuple_size {
            return Err(KernelError::TupleSizeMismatch {
                expected: self.tuple_size,
                got: tuple.len(),
            });
        }

        let slot = (0..self.num_slots())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(KernelError::PageFull(self.id))?;

        self.capture_before_image();
        let range = self.slot_range(slot);
        self.data[range].copy_from_slice(tuple);
        self.set_slot_used(slot, true);
        Ok(slot)
    }

    pub fn delete_tuple(&mut self, slot: usize) -> Result<()> {
        if slot >= self.num_slots() {
            return Err(KernelError::InvalidSlotIndex(slot));
        }
        if !self.is_slot_used(slot) {
            return Err(KernelError::EmptySlot(slot));
        }

        self.capture_before_image();
        let range = self.slot_range(slot);
        self.data[range].fill(0);
        self.set_slot_used(slot, false);
        Ok(())
    }

    /// Live tuples with their slot numbers, in slot order.
    pub fn tuples(&self) -> impl Iterator<Item = (usize, &[u8])> + '_ {
        (0..self.num_slots())
            .filter(move |&slot| self.is_slot_used(slot))
            .map(move |slot| (slot, &self.data[self.slot_range(slot)]))
    }
}
