use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use super::Window;

/// Outcome of offering a segment to a [`ReorderBuffer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Receipt {
    /// The segment was next in sequence. Carries the number of segments delivered, which includes
    /// any buffered successors released by the cascade.
    Delivered(u32),
    /// The segment is ahead of a gap and was stored.
    Buffered,
    /// The segment is ahead of a gap and already stored.
    Duplicate,
    /// The segment was delivered previously.
    Stale,
    /// The segment lies at or beyond the far edge of the window.
    OutOfWindow,
}

/// Receive-side reassembly for one connection.
///
/// Holds segments which arrive ahead of the next expected ID until the gap before them is filled.
/// Only IDs inside the window past its base are stored, so at most `size - 1` segments are held
/// and nothing is allocated for empty positions.
pub struct ReorderBuffer {
    window: Window,
    segments: BTreeMap<u32, Box<[u8]>>,
}

impl ReorderBuffer {
    pub fn new(window_base_id: u32, window_size: u32) -> Self {
        debug_assert!(window_size > 0);

        Self {
            window: Window::new(window_base_id, window_size),
            segments: BTreeMap::new(),
        }
    }

    fn advance(&mut self) {
        self.window.base_id = self.window.base_id.wrapping_add(1);
    }

    /// Offers a segment to the buffer. In-order data is passed to `cb`, followed by every
    /// buffered segment that has become contiguous with it.
    pub fn receive<F>(&mut self, new_id: u32, new_data: &[u8], mut cb: F) -> Receipt
    where
        F: FnMut(&[u8]),
    {
        // Only consider segments in the current window
        if !self.window.contains(new_id) {
            if self.window.precedes(new_id) {
                return Receipt::Stale;
            } else {
                return Receipt::OutOfWindow;
            }
        }

        if new_id == self.window.base_id {
            // This segment is expected next, deliver
            cb(new_data);
            self.advance();

            let mut delivered = 1;

            // Deliver all segments in the buffer which match the next expected ID
            while let Some(data) = self.segments.remove(&self.window.base_id) {
                cb(&data);
                self.advance();

                delivered += 1;
            }

            Receipt::Delivered(delivered)
        } else {
            match self.segments.entry(new_id) {
                Entry::Occupied(_) => Receipt::Duplicate,
                Entry::Vacant(slot) => {
                    slot.insert(new_data.into());
                    Receipt::Buffered
                }
            }
        }
    }

    pub fn next_expected_id(&self) -> u32 {
        self.window.base_id
    }

    /// Number of segments currently held.
    pub fn len(&self) -> usize {
        self.segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each round: (id, ids delivered by this round, next expected id after the round)
    fn test(base_id: u32, window_size: u32, rounds: &[(u32, Vec<u32>, u32)]) {
        let mut rx = ReorderBuffer::new(base_id, window_size);

        for (id, expected_delivery, expected_next) in rounds.iter() {
            let (id, expected_next) = (*id, *expected_next);

            let mut recv_buffer = Vec::new();

            let data = id.to_be_bytes();

            rx.receive(id, &data, |data: &[u8]| {
                recv_buffer.push(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            });

            assert_eq!(&recv_buffer, expected_delivery);
            assert_eq!(rx.next_expected_id(), expected_next);
            assert!(rx.len() < window_size as usize);
        }
    }

    #[test]
    fn sequential_receive() {
        test(
            0,
            4,
            &[
                (0, vec![0], 1),
                (1, vec![1], 2),
                (2, vec![2], 3),
                (3, vec![3], 4),
                (4, vec![4], 5),
            ],
        );
    }

    #[test]
    fn nonsequential_receive() {
        test(
            0,
            4,
            &[
                (0, vec![0], 1),
                (2, vec![], 1),
                (1, vec![1, 2], 3),
                (3, vec![3], 4),
            ],
        );

        test(
            0,
            4,
            &[
                (0, vec![0], 1),
                (3, vec![], 1),
                (2, vec![], 1),
                (1, vec![1, 2, 3], 4),
                (4, vec![4], 5),
            ],
        );

        test(
            0,
            8,
            &[
                (0, vec![0], 1),
                (2, vec![], 1),
                (4, vec![], 1),
                (1, vec![1, 2], 3),
                (3, vec![3, 4], 5),
            ],
        );
    }

    #[test]
    fn beyond_window() {
        let mut rx = ReorderBuffer::new(0, 4);

        assert_eq!(rx.receive(4, b"x", |_| panic!()), Receipt::OutOfWindow);
        assert_eq!(rx.receive(100, b"x", |_| panic!()), Receipt::OutOfWindow);
        assert_eq!(rx.receive(3, b"x", |_| panic!()), Receipt::Buffered);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn stale_segments_are_not_redelivered() {
        let mut rx = ReorderBuffer::new(10, 4);

        assert_eq!(rx.receive(10, b"a", |_| ()), Receipt::Delivered(1));
        assert_eq!(rx.receive(10, b"a", |_| panic!()), Receipt::Stale);
        assert_eq!(rx.receive(3, b"a", |_| panic!()), Receipt::Stale);
        assert_eq!(rx.next_expected_id(), 11);
    }

    #[test]
    fn dup_rejection() {
        let mut rx = ReorderBuffer::new(0, 4);

        assert_eq!(rx.receive(2, b"first", |_| panic!()), Receipt::Buffered);
        assert_eq!(rx.receive(2, b"second", |_| panic!()), Receipt::Duplicate);
        assert_eq!(rx.len(), 1);

        let mut delivered = Vec::new();
        rx.receive(1, b"b", |_| panic!());
        rx.receive(0, b"a", |data| delivered.extend_from_slice(data));

        // The first copy of segment 2 is the one kept
        assert_eq!(delivered, b"abfirst");
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn occupancy_never_reaches_window_size() {
        let mut rx = ReorderBuffer::new(0, 4);

        for id in 1..4 {
            assert_eq!(rx.receive(id, b"z", |_| panic!()), Receipt::Buffered);
        }

        assert_eq!(rx.len(), 3);
        assert_eq!(rx.receive(4, b"z", |_| panic!()), Receipt::OutOfWindow);
        assert_eq!(rx.receive(0, b"z", |_| ()), Receipt::Delivered(4));
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn window_of_one_only_accepts_next() {
        let mut rx = ReorderBuffer::new(7, 1);

        assert_eq!(rx.receive(8, b"z", |_| panic!()), Receipt::OutOfWindow);
        assert_eq!(rx.receive(7, b"z", |_| ()), Receipt::Delivered(1));
        assert_eq!(rx.receive(8, b"z", |_| ()), Receipt::Delivered(1));
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn sequence_wraps() {
        test(
            u32::MAX - 1,
            4,
            &[
                (u32::MAX, vec![], u32::MAX - 1),
                (0, vec![], u32::MAX - 1),
                (u32::MAX - 1, vec![u32::MAX - 1, u32::MAX, 0], 1),
            ],
        );
    }

    #[test]
    fn gap_cascade_with_two_drops() {
        // Window of 4 over ten segments, with segments 3 and 7 lost on first transmission
        let mut rx = ReorderBuffer::new(0, 4);
        let mut stream = Vec::new();

        for id in [0, 1, 2, 4, 5, 6] {
            rx.receive(id, &[id as u8], |data| stream.extend_from_slice(data));
        }

        assert_eq!(stream, [0, 1, 2]);
        assert_eq!(rx.len(), 3);

        // Go-back-N resend of the window [3, 7)
        for id in [3, 4, 5, 6] {
            rx.receive(id, &[id as u8], |data| stream.extend_from_slice(data));
        }

        assert_eq!(stream, [0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(rx.len(), 0);

        for id in [8, 9, 7, 8, 9] {
            rx.receive(id, &[id as u8], |data| stream.extend_from_slice(data));
        }

        assert_eq!(stream, (0..10).collect::<Vec<u8>>());
        assert_eq!(rx.next_expected_id(), 10);
    }

    #[test]
    fn huge_window_holds_only_what_arrived() {
        let size = 1 << 30;
        let mut rx = ReorderBuffer::new(u32::MAX, size);

        let far_edge = u32::MAX.wrapping_add(size - 1);

        assert_eq!(rx.receive(far_edge, b"z", |_| panic!()), Receipt::Buffered);
        assert_eq!(
            rx.receive(far_edge.wrapping_add(1), b"z", |_| panic!()),
            Receipt::OutOfWindow
        );
        assert_eq!(rx.len(), 1);

        assert_eq!(rx.receive(u32::MAX, b"a", |_| ()), Receipt::Delivered(1));
        assert_eq!(rx.len(), 1);
    }
}
