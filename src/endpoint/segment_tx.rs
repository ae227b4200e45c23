//            base    next    base+size
//            v       v       v
// -----------########________--------> segment IDs
// ***********
//
// *: acknowledged
// #: in transit
// _: sendable

pub struct SegmentTx {
    base_id: u32,
    next_id: u32,
    size: u32,
}

impl SegmentTx {
    pub fn new(base_id: u32, size: u32) -> Self {
        assert!(size > 0, "window size must be nonzero");

        Self {
            base_id,
            next_id: base_id,
            size,
        }
    }

    pub fn base_id(&self) -> u32 {
        self.base_id
    }

    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn can_send(&self) -> bool {
        self.next_id.wrapping_sub(self.base_id) < self.size
    }

    /// Claims the next ID for transmission.
    pub fn mark_sent(&mut self) -> u32 {
        debug_assert!(self.can_send());

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    pub fn in_transit_count(&self) -> u32 {
        self.next_id.wrapping_sub(self.base_id)
    }

    /// IDs sent but not yet acknowledged, oldest first.
    pub fn in_transit(&self) -> impl Iterator<Item = u32> {
        let base_id = self.base_id;
        (0..self.in_transit_count()).map(move |i| base_id.wrapping_add(i))
    }

    /// Applies a cumulative acknowledgement: the receiver expects `rx_base_id` next, so everything
    /// before it has arrived. Returns true if the window advanced.
    pub fn acknowledge(&mut self, rx_base_id: u32) -> bool {
        let ack_delta = rx_base_id.wrapping_sub(self.base_id);

        // The delta ack must not exceed the next ID to be sent, else it is invalid. A zero delta
        // is a duplicate.
        if ack_delta > 0 && ack_delta <= self.in_transit_count() {
            self.base_id = rx_base_id;
            true
        } else {
            false
        }
    }
}
