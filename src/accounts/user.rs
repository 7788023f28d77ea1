//! One account: per-asset balances, sequence tracking, and commitments.

use super::asset::RevertableAsset;
use super::seqno::SequenceTracker;
use crate::processing::TxStatus;
use crate::wire::{AccountCommitment, AccountId, AssetCommitment, AssetId, PublicKeyBytes};

/// An account's full in-memory state.
///
/// The asset vector is allocated once at creation (the asset universe is
/// fixed at genesis), so balance access never reallocates and the
/// `RevertableAsset` atomics stay pinned for the account's lifetime.
#[derive(Debug)]
pub struct UserAccount {
    owner: AccountId,
    public_key: PublicKeyBytes,
    assets: Vec<RevertableAsset>,
    seq_tracker: SequenceTracker,
}

impl UserAccount {
    /// A fresh account with zero balances.
    pub fn new(
        owner: AccountId,
        public_key: PublicKeyBytes,
        num_assets: usize,
        max_seqs_per_block: u64,
    ) -> Self {
        UserAccount {
            owner,
            public_key,
            assets: (0..num_assets).map(|_| RevertableAsset::new()).collect(),
            seq_tracker: SequenceTracker::new(0, max_seqs_per_block),
        }
    }

    /// Rebuild an account from its persisted commitment.
    pub fn from_commitment(
        commitment: &AccountCommitment,
        num_assets: usize,
        max_seqs_per_block: u64,
    ) -> Self {
        let account = UserAccount {
            owner: commitment.owner,
            public_key: commitment.public_key,
            assets: (0..num_assets).map(|_| RevertableAsset::new()).collect(),
            seq_tracker: SequenceTracker::new(commitment.last_committed_seq, max_seqs_per_block),
        };
        for entry in &commitment.balances {
            let asset = &account.assets[entry.asset as usize];
            asset.transfer_available(entry.amount);
            asset.commit();
        }
        account
    }

    /// The account id.
    pub fn owner(&self) -> AccountId {
        self.owner
    }

    /// The controlling public key.
    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public_key
    }

    /// The balance record for one asset.
    pub fn asset(&self, asset: AssetId) -> &RevertableAsset {
        &self.assets[asset as usize]
    }

    /// The sequence tracker.
    pub fn sequence_tracker(&self) -> &SequenceTracker {
        &self.seq_tracker
    }

    /// Reserve a sequence number for this block.
    pub fn reserve_sequence_number(&self, seq: u64) -> TxStatus {
        self.seq_tracker.reserve(seq)
    }

    /// Release a reservation made this block.
    pub fn release_sequence_number(&self, seq: u64) {
        self.seq_tracker.release(seq);
    }

    /// Highest committed sequence number.
    pub fn last_committed_seq(&self) -> u64 {
        self.seq_tracker.produce_commitment()
    }

    /// Commit this round's balance and sequence changes.
    pub fn commit(&self) {
        for asset in &self.assets {
            asset.commit();
        }
        self.seq_tracker.commit();
    }

    /// Revert this round's balance and sequence changes.
    pub fn rollback(&self) {
        for asset in &self.assets {
            asset.rollback();
        }
        self.seq_tracker.rollback();
    }

    /// Whether every balance is nonnegative.
    pub fn in_valid_state(&self) -> bool {
        self.assets.iter().all(|a| a.in_valid_state())
    }

    fn commitment_with<F: Fn(&RevertableAsset) -> i64>(&self, read: F, seq: u64) -> AccountCommitment {
        let balances = self
            .assets
            .iter()
            .enumerate()
            .filter_map(|(idx, asset)| {
                let amount = read(asset);
                (amount != 0).then_some(AssetCommitment {
                    asset: idx as AssetId,
                    amount,
                })
            })
            .collect();
        AccountCommitment {
            owner: self.owner,
            public_key: self.public_key,
            balances,
            last_committed_seq: seq,
        }
    }

    /// Commitment over committed state.
    pub fn produce_commitment(&self) -> AccountCommitment {
        self.commitment_with(
            RevertableAsset::committed_balance,
            self.seq_tracker.produce_commitment(),
        )
    }

    /// Commitment including this round's uncommitted modifications.
    pub fn tentative_commitment(&self) -> AccountCommitment {
        self.commitment_with(
            RevertableAsset::lookup_available_balance,
            self.seq_tracker.tentative_commitment(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> UserAccount {
        UserAccount::new(7, [1u8; 32], 4, 64)
    }

    #[test]
    fn test_commitment_skips_zero_balances() {
        let a = account();
        a.asset(2).transfer_available(100);
        a.commit();
        let c = a.produce_commitment();
        assert_eq!(c.owner, 7);
        assert_eq!(c.balances.len(), 1);
        assert_eq!(c.balances[0].asset, 2);
        assert_eq!(c.balances[0].amount, 100);
    }

    #[test]
    fn test_tentative_vs_committed() {
        let a = account();
        a.asset(0).transfer_available(10);
        a.reserve_sequence_number(256);
        assert_eq!(a.produce_commitment().balances.len(), 0);
        assert_eq!(a.produce_commitment().last_committed_seq, 0);
        let tentative = a.tentative_commitment();
        assert_eq!(tentative.balances.len(), 1);
        assert_eq!(tentative.last_committed_seq, 256);
    }

    #[test]
    fn test_rollback_restores_all() {
        let a = account();
        a.asset(0).transfer_available(10);
        a.commit();
        a.asset(0).transfer_available(5);
        a.asset(1).escrow(3);
        a.reserve_sequence_number(256);
        a.rollback();
        assert_eq!(a.asset(0).lookup_available_balance(), 10);
        assert_eq!(a.asset(1).lookup_available_balance(), 0);
        assert_eq!(a.last_committed_seq(), 0);
    }

    #[test]
    fn test_from_commitment_roundtrip() {
        let a = account();
        a.asset(1).transfer_available(55);
        a.asset(3).transfer_available(7);
        a.reserve_sequence_number(512);
        a.commit();
        let c = a.produce_commitment();
        let restored = UserAccount::from_commitment(&c, 4, 64);
        assert_eq!(restored.produce_commitment(), c);
        assert_eq!(restored.last_committed_seq(), 512);
    }
}
