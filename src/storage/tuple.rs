use crate::common::TID;

/// A fixed-width row. `record_id` is filled in once the tuple is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub data: Vec<u8>,
    pub record_id: Option<TID>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            record_id: None,
        }
    }
}
