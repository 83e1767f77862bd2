use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::PageID;

/// Location of a tuple: its page and the slot within that page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TID {
    pub page_id: PageID,
    pub slot_id: usize,
}

impl TID {
    pub fn new(page_id: PageID, slot_id: usize) -> Self {
        Self { page_id, slot_id }
    }
}

impl PartialOrd for TID {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TID {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.cmp(&other.page_id) {
            Ordering::Equal => self.slot_id.cmp(&other.slot_id),
            other => other,
        }
    }
}
