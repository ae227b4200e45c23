mod reorder;

pub use reorder::{Receipt, ReorderBuffer};

/// A range of `size` sequence numbers starting at `base_id`, modulo 2^32.
#[derive(Debug)]
pub struct Window {
    pub base_id: u32,
    pub size: u32,
}

impl Window {
    pub fn new(base_id: u32, size: u32) -> Self {
        Self { base_id, size }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.offset(id) < self.size
    }

    /// Distance of `id` ahead of the window base.
    pub fn offset(&self, id: u32) -> u32 {
        id.wrapping_sub(self.base_id)
    }

    /// Returns true if `id` lies in the half of the sequence space behind the base.
    pub fn precedes(&self, id: u32) -> bool {
        let behind = self.base_id.wrapping_sub(id);
        behind != 0 && behind <= 1 << 31
    }
}
