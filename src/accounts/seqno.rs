//! At-most-once sequence-number reservation within a block.

use crate::processing::TxStatus;
use std::sync::atomic::{AtomicU64, Ordering};

/// Spacing between consecutive usable sequence numbers: the low 8 bits of
/// a sequence number index operations inside the transaction.
pub const SEQ_SPACING: u64 = 256;

/// Tracks which sequence numbers an account has reserved this block.
///
/// The window `[last_committed + 256, last_committed + 256 * capacity]` is
/// a bit-packed atomic vector: one bit per usable sequence number. With
/// the default capacity of 64 the whole window is a single word.
///
/// Bit operations are relaxed; no ordering with balance updates is needed
/// because every transaction reserves before it spends.
#[derive(Debug)]
pub struct SequenceTracker {
    last_committed: AtomicU64,
    words: Box<[AtomicU64]>,
    capacity: u64,
}

impl SequenceTracker {
    /// A tracker admitting up to `capacity` reservations per block.
    pub fn new(last_committed: u64, capacity: u64) -> Self {
        assert!(capacity > 0);
        let num_words = capacity.div_ceil(64) as usize;
        SequenceTracker {
            last_committed: AtomicU64::new(last_committed),
            words: (0..num_words).map(|_| AtomicU64::new(0)).collect(),
            capacity,
        }
    }

    fn offset_of(&self, seq: u64) -> u64 {
        (seq - self.last_committed.load(Ordering::Relaxed)) / SEQ_SPACING - 1
    }

    /// Try to reserve `seq` for this block.
    pub fn reserve(&self, seq: u64) -> TxStatus {
        if seq <= self.last_committed.load(Ordering::Relaxed) {
            return TxStatus::SeqNumTooLow;
        }
        let offset = self.offset_of(seq);
        if offset >= self.capacity {
            return TxStatus::SeqNumTooHigh;
        }
        let mask = 1u64 << (offset % 64);
        let prev = self.words[(offset / 64) as usize].fetch_or(mask, Ordering::Relaxed);
        if prev & mask != 0 {
            return TxStatus::SeqNumTempInUse;
        }
        TxStatus::Success
    }

    /// Release a reservation made this block. Only legal for sequence
    /// numbers previously reserved above the committed floor.
    pub fn release(&self, seq: u64) {
        debug_assert!(seq > self.last_committed.load(Ordering::Relaxed));
        let offset = self.offset_of(seq);
        debug_assert!(offset < self.capacity);
        let mask = !(1u64 << (offset % 64));
        self.words[(offset / 64) as usize].fetch_and(mask, Ordering::Relaxed);
    }

    fn pending_increment(&self) -> u64 {
        for (i, word) in self.words.iter().enumerate().rev() {
            let val = word.load(Ordering::Relaxed);
            if val != 0 {
                let highest = 64 * i as u64 + (64 - val.leading_zeros() as u64);
                return highest * SEQ_SPACING;
            }
        }
        0
    }

    /// Highest committed sequence number.
    pub fn produce_commitment(&self) -> u64 {
        self.last_committed.load(Ordering::Relaxed)
    }

    /// Highest sequence number including this block's reservations.
    pub fn tentative_commitment(&self) -> u64 {
        self.last_committed.load(Ordering::Relaxed) + self.pending_increment()
    }

    /// Advance the committed floor past every reservation and clear the
    /// window. Serialized against reserve/release by the database's
    /// commit phase.
    pub fn commit(&self) {
        let inc = self.pending_increment();
        if inc > 0 {
            self.last_committed.fetch_add(inc, Ordering::Relaxed);
        }
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Drop every reservation, leaving the committed floor unchanged.
    pub fn rollback(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Reset the committed floor during reloads.
    pub fn set_last_committed(&self, seq: u64) {
        self.last_committed.store(seq, Ordering::Relaxed);
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SequenceTracker {
        SequenceTracker::new(0, 64)
    }

    #[test]
    fn test_reserve_and_commit_advances_floor() {
        let t = tracker();
        assert_eq!(t.reserve(256), TxStatus::Success);
        assert_eq!(t.reserve(512), TxStatus::Success);
        assert_eq!(t.tentative_commitment(), 512);
        t.commit();
        assert_eq!(t.produce_commitment(), 512);
        assert_eq!(t.reserve(512), TxStatus::SeqNumTooLow);
        assert_eq!(t.reserve(768), TxStatus::Success);
    }

    #[test]
    fn test_duplicate_reservation_in_use() {
        let t = tracker();
        assert_eq!(t.reserve(256), TxStatus::Success);
        assert_eq!(t.reserve(256), TxStatus::SeqNumTempInUse);
    }

    #[test]
    fn test_window_bounds() {
        let t = tracker();
        // 64 slots: 256..=64*256 reserve, 65*256 is too far ahead.
        for k in 1..=64u64 {
            assert_eq!(t.reserve(k * 256), TxStatus::Success, "slot {k}");
        }
        assert_eq!(t.reserve(65 * 256), TxStatus::SeqNumTooHigh);
    }

    #[test]
    fn test_release_frees_slot() {
        let t = tracker();
        assert_eq!(t.reserve(256), TxStatus::Success);
        t.release(256);
        assert_eq!(t.reserve(256), TxStatus::Success);
    }

    #[test]
    fn test_rollback_clears_without_advancing() {
        let t = tracker();
        assert_eq!(t.reserve(1024), TxStatus::Success);
        t.rollback();
        assert_eq!(t.produce_commitment(), 0);
        assert_eq!(t.tentative_commitment(), 0);
        assert_eq!(t.reserve(1024), TxStatus::Success);
    }

    #[test]
    fn test_commit_skips_gaps() {
        let t = tracker();
        // Reserve 256 and 1024, leaving 512/768 unused; the floor still
        // advances past the highest reservation.
        assert_eq!(t.reserve(256), TxStatus::Success);
        assert_eq!(t.reserve(1024), TxStatus::Success);
        t.commit();
        assert_eq!(t.produce_commitment(), 1024);
        assert_eq!(t.reserve(768), TxStatus::SeqNumTooLow);
    }

    #[test]
    fn test_multiword_window() {
        let t = SequenceTracker::new(0, 192);
        assert_eq!(t.reserve(192 * 256), TxStatus::Success);
        assert_eq!(t.reserve(193 * 256), TxStatus::SeqNumTooHigh);
        t.commit();
        assert_eq!(t.produce_commitment(), 192 * 256);
    }
}
