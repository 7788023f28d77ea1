//! A thread-safe, revertable record of one asset balance.

use std::sync::atomic::{AtomicI64, Ordering};

/// One asset balance with commit/rollback.
///
/// `available` carries the current round's in-flight modifications;
/// `committed` is the value as of the last committed round. Escrowed money
/// (backing sell offers) is simply absent from `available`; there is no
/// separate escrow ledger.
///
/// All operations on `available` use relaxed atomics. Correctness does not
/// depend on cross-thread ordering: validity is re-checked after the
/// parallel phase under the database's exclusive lock, and each
/// transaction reserves its sequence number before spending.
#[derive(Debug)]
pub struct RevertableAsset {
    available: AtomicI64,
    committed: AtomicI64,
}

impl RevertableAsset {
    /// Zero balance.
    pub fn new() -> Self {
        Self::with_amount(0)
    }

    /// Balance committed at `amount`.
    pub fn with_amount(amount: i64) -> Self {
        RevertableAsset {
            available: AtomicI64::new(amount),
            committed: AtomicI64::new(amount),
        }
    }

    /// Unconditionally adjust the available balance by `delta` (either
    /// sign). Used for credits, which can never fail.
    pub fn transfer_available(&self, delta: i64) {
        self.available.fetch_add(delta, Ordering::Relaxed);
    }

    /// Unconditionally move `amount` from available into escrow (negative
    /// amounts release escrow back).
    pub fn escrow(&self, amount: i64) {
        self.available.fetch_sub(amount, Ordering::Relaxed);
    }

    /// Adjust the available balance, failing instead of driving it
    /// negative or overflowing. Positive deltas never fail.
    pub fn conditional_transfer_available(&self, delta: i64) -> bool {
        if delta >= 0 {
            self.transfer_available(delta);
            return true;
        }
        let mut current = self.available.load(Ordering::Relaxed);
        loop {
            let Some(tentative) = current.checked_add(delta) else {
                return false;
            };
            if tentative < 0 {
                return false;
            }
            match self.available.compare_exchange_weak(
                current,
                tentative,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => {
                    current = observed;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Escrow `amount`, failing if the available balance is too small.
    /// Negative amounts release escrow and cannot fail.
    pub fn conditional_escrow(&self, amount: i64) -> bool {
        if amount == i64::MIN {
            // cannot negate
            return false;
        }
        if amount > 0 {
            self.conditional_transfer_available(-amount)
        } else {
            self.transfer_available(-amount);
            true
        }
    }

    /// Available balance including this round's modifications.
    pub fn lookup_available_balance(&self) -> i64 {
        self.available.load(Ordering::Relaxed)
    }

    /// Balance as of the last commit.
    pub fn committed_balance(&self) -> i64 {
        self.committed.load(Ordering::Relaxed)
    }

    /// Commit in-flight modifications. Not safe concurrently with
    /// rollback or with transfers; the database serializes these phases.
    pub fn commit(&self) -> i64 {
        let new_committed = self.available.load(Ordering::Relaxed);
        self.committed.store(new_committed, Ordering::Relaxed);
        new_committed
    }

    /// Discard in-flight modifications.
    pub fn rollback(&self) {
        self.available
            .store(self.committed.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Whether the available balance is nonnegative.
    pub fn in_valid_state(&self) -> bool {
        self.available.load(Ordering::Relaxed) >= 0
    }
}

impl Default for RevertableAsset {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_transfer_rejects_overdraft() {
        let asset = RevertableAsset::with_amount(100);
        assert!(asset.conditional_transfer_available(-100));
        assert!(!asset.conditional_transfer_available(-1));
        assert_eq!(asset.lookup_available_balance(), 0);
    }

    #[test]
    fn test_commit_rollback_cycle() {
        let asset = RevertableAsset::with_amount(50);
        asset.transfer_available(25);
        assert_eq!(asset.lookup_available_balance(), 75);
        assert_eq!(asset.committed_balance(), 50);
        asset.rollback();
        assert_eq!(asset.lookup_available_balance(), 50);

        asset.transfer_available(25);
        assert_eq!(asset.commit(), 75);
        asset.transfer_available(-10);
        asset.rollback();
        assert_eq!(asset.lookup_available_balance(), 75);
    }

    #[test]
    fn test_escrow_min_guard() {
        let asset = RevertableAsset::with_amount(10);
        assert!(!asset.conditional_escrow(i64::MIN));
        assert_eq!(asset.lookup_available_balance(), 10);
    }

    #[test]
    fn test_transfer_min_guard() {
        let asset = RevertableAsset::with_amount(10);
        assert!(!asset.conditional_transfer_available(i64::MIN));
        assert_eq!(asset.lookup_available_balance(), 10);
    }

    #[test]
    fn test_overflow_rejected_without_mutation() {
        let asset = RevertableAsset::with_amount(i64::MIN + 5);
        // available + delta underflows i64
        assert!(!asset.conditional_transfer_available(-10));
        assert_eq!(asset.lookup_available_balance(), i64::MIN + 5);
    }

    #[test]
    fn test_escrow_release_cannot_fail() {
        let asset = RevertableAsset::with_amount(0);
        assert!(asset.conditional_escrow(-40));
        assert_eq!(asset.lookup_available_balance(), 40);
    }

    #[test]
    fn test_in_valid_state() {
        let asset = RevertableAsset::with_amount(5);
        asset.escrow(10);
        assert!(!asset.in_valid_state());
        asset.transfer_available(10);
        assert!(asset.in_valid_state());
    }

    #[test]
    fn test_concurrent_conditional_escrow_never_oversubscribes() {
        use std::sync::Arc;
        let asset = Arc::new(RevertableAsset::with_amount(1000));
        let successes: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let asset = Arc::clone(&asset);
                    s.spawn(move || (0..500).filter(|_| asset.conditional_escrow(1)).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(successes, 1000);
        assert_eq!(asset.lookup_available_balance(), 0);
    }
}
