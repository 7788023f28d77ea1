//! Sharded in-memory account database with Merkle commitments.

use super::thunk::{AccountCreationThunk, AccountPersistenceThunk};
use super::transfer_log::TransferLog;
use super::user::UserAccount;
use crate::crypto::ShardRouter;
use crate::processing::TxStatus;
use crate::trie::{Trie, TrieValue};
use crate::wire::{AccountCommitment, AccountId, AssetId, Hash, PublicKeyBytes, Round, Xdr};
use dashmap::DashMap;
use rayon::prelude::*;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, trace};

/// Serialized account commitment stored at each account-trie leaf.
pub(crate) struct CommitmentBytes(pub Vec<u8>);

impl TrieValue for CommitmentBytes {
    fn merge_from(&mut self, other: Self) {
        self.0 = other.0;
    }

    fn append_hash_data(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }
}

enum StagedCreation {
    /// Id claimed by an in-flight transaction; not yet materialized.
    Reserved,
    /// Fully built account awaiting round commit.
    Ready(Arc<UserAccount>),
}

/// Maps `AccountId -> UserAccount`, sharded by a keyed short hash.
///
/// Lookups hand out `Arc`s, so account pointers stay stable for the
/// round regardless of concurrent creation. A reader-writer lock
/// serializes the commit/rollback/check phases against transaction
/// processing; the shard maps themselves are lock-light.
///
/// Accounts created during a block live in a staging area and become
/// visible to lookups only after [`Self::commit_new_accounts`].
pub struct AccountDatabase {
    num_assets: usize,
    max_seqs_per_block: u64,
    router: ShardRouter,
    shards: Vec<DashMap<AccountId, Arc<UserAccount>>>,
    staging: DashMap<AccountId, StagedCreation>,
    committed_lock: RwLock<()>,
    commitment_trie: Mutex<Trie<CommitmentBytes, 8>>,
    persistence_thunks: Mutex<Vec<AccountPersistenceThunk>>,
    creation_thunks: Mutex<Vec<AccountCreationThunk>>,
    transfer_log: Option<TransferLog>,
}

impl AccountDatabase {
    /// An empty database routing over `router.num_shards()` shards.
    pub fn new(
        router: ShardRouter,
        num_assets: usize,
        max_seqs_per_block: u64,
        transfer_log: Option<TransferLog>,
    ) -> Self {
        let shards = (0..router.num_shards()).map(|_| DashMap::new()).collect();
        AccountDatabase {
            num_assets,
            max_seqs_per_block,
            router,
            shards,
            staging: DashMap::new(),
            committed_lock: RwLock::new(()),
            commitment_trie: Mutex::new(Trie::new()),
            persistence_thunks: Mutex::new(Vec::new()),
            creation_thunks: Mutex::new(Vec::new()),
            transfer_log,
        }
    }

    /// The shard router (its key is persisted alongside the shards).
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Number of assets in the fixed universe.
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    /// Total committed accounts.
    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Shard index for an account.
    pub fn shard_of(&self, account: AccountId) -> usize {
        self.router.shard(account)
    }

    /// Hold this guard while processing transactions; commit, rollback,
    /// and validity checking take the lock exclusively.
    pub fn processing_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.committed_lock.read().unwrap()
    }

    /// Look up a committed account. Staged creations are invisible here.
    pub fn lookup_user(&self, account: AccountId) -> Option<Arc<UserAccount>> {
        self.shards[self.shard_of(account)]
            .get(&account)
            .map(|e| Arc::clone(e.value()))
    }

    fn lookup_incl_staged(&self, account: AccountId) -> Option<Arc<UserAccount>> {
        self.lookup_user(account).or_else(|| {
            self.staging.get(&account).and_then(|e| match e.value() {
                StagedCreation::Ready(acct) => Some(Arc::clone(acct)),
                StagedCreation::Reserved => None,
            })
        })
    }

    /// Public key of a committed account.
    pub fn get_pk(&self, account: AccountId) -> Option<PublicKeyBytes> {
        self.lookup_user(account).map(|a| *a.public_key())
    }

    // --- balance plumbing (routes to a resolved account) ---

    /// Unconditional balance adjustment.
    pub fn transfer_available(
        &self,
        account: &UserAccount,
        asset: AssetId,
        delta: i64,
        reason: &'static str,
    ) {
        account.asset(asset).transfer_available(delta);
        if let Some(log) = &self.transfer_log {
            log.log(account.owner(), asset, delta, reason);
        }
    }

    /// Unconditional escrow adjustment.
    pub fn escrow(
        &self,
        account: &UserAccount,
        asset: AssetId,
        amount: i64,
        reason: &'static str,
    ) {
        account.asset(asset).escrow(amount);
        if let Some(log) = &self.transfer_log {
            log.log(account.owner(), asset, -amount, reason);
        }
    }

    /// Balance adjustment that fails instead of overdrawing.
    pub fn conditional_transfer_available(
        &self,
        account: &UserAccount,
        asset: AssetId,
        delta: i64,
        reason: &'static str,
    ) -> bool {
        let ok = account.asset(asset).conditional_transfer_available(delta);
        if ok {
            if let Some(log) = &self.transfer_log {
                log.log(account.owner(), asset, delta, reason);
            }
        }
        ok
    }

    /// Escrow that fails instead of overdrawing.
    pub fn conditional_escrow(
        &self,
        account: &UserAccount,
        asset: AssetId,
        amount: i64,
        reason: &'static str,
    ) -> bool {
        let ok = account.asset(asset).conditional_escrow(amount);
        if ok {
            if let Some(log) = &self.transfer_log {
                log.log(account.owner(), asset, -amount, reason);
            }
        }
        ok
    }

    /// Flush diagnostic transfer records for a sealed round.
    pub fn flush_transfer_log(&self, round: Round) {
        if let Some(log) = &self.transfer_log {
            log.flush_round(round);
        }
    }

    // --- account creation staging ---

    /// Claim a fresh account id for an in-flight transaction.
    pub fn reserve_account_creation(&self, account: AccountId) -> TxStatus {
        if self.lookup_user(account).is_some() {
            return TxStatus::NewAccountAlreadyExists;
        }
        match self.staging.entry(account) {
            dashmap::mapref::entry::Entry::Occupied(_) => TxStatus::NewAccountTempReserved,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(StagedCreation::Reserved);
                TxStatus::Success
            }
        }
    }

    /// Drop a reservation whose transaction failed.
    pub fn release_account_creation(&self, account: AccountId) {
        self.staging.remove(&account);
    }

    /// Build an account object for a reserved id. The caller owns it
    /// (and may credit it) until [`Self::stage_created_account`] makes it
    /// part of the staged set.
    pub fn new_account_shell(&self, account: AccountId, pk: PublicKeyBytes) -> Arc<UserAccount> {
        Arc::new(UserAccount::new(
            account,
            pk,
            self.num_assets,
            self.max_seqs_per_block,
        ))
    }

    /// Move a prepared account into the staged set; it joins the main
    /// map at round commit.
    pub fn stage_created_account(&self, account: Arc<UserAccount>) {
        self.staging
            .insert(account.owner(), StagedCreation::Ready(account));
    }

    /// Reserve, build, and stage in one step (validation path, where
    /// effects are immediate and rollback is whole-block).
    pub fn commit_account_creation(
        &self,
        account: AccountId,
        pk: PublicKeyBytes,
    ) -> Arc<UserAccount> {
        let acct = self.new_account_shell(account, pk);
        self.stage_created_account(Arc::clone(&acct));
        acct
    }

    /// Move staged accounts into the main map, recording a creation thunk
    /// for `round`. Leftover bare reservations are dropped.
    pub fn commit_new_accounts(&self, round: Round) {
        let _guard = self.committed_lock.write().unwrap();
        let mut ids = Vec::new();
        let staged: Vec<(AccountId, StagedCreation)> = {
            let mut out = Vec::new();
            let keys: Vec<AccountId> = self.staging.iter().map(|e| *e.key()).collect();
            for k in keys {
                if let Some((id, v)) = self.staging.remove(&k) {
                    out.push((id, v));
                }
            }
            out
        };
        for (id, entry) in staged {
            if let StagedCreation::Ready(acct) = entry {
                self.shards[self.shard_of(id)].insert(id, acct);
                ids.push(id);
            }
        }
        if !ids.is_empty() {
            ids.sort_unstable();
            debug!("committed {} new accounts at round {round}", ids.len());
            self.creation_thunks
                .lock()
                .unwrap()
                .push(AccountCreationThunk { round, ids });
        }
    }

    /// Remove every staged account plus every account created after
    /// `round` (exclusive). Their commitment-trie keys are deleted too.
    pub fn rollback_new_accounts(&self, round: Round) {
        let _guard = self.committed_lock.write().unwrap();
        self.staging.clear();
        let mut thunks = self.creation_thunks.lock().unwrap();
        let keep = thunks
            .iter()
            .position(|t| t.round > round)
            .unwrap_or(thunks.len());
        let dropped: Vec<AccountCreationThunk> = thunks.drain(keep..).collect();
        drop(thunks);
        if dropped.is_empty() {
            return;
        }
        let mut trie = self.commitment_trie.lock().unwrap();
        for thunk in dropped {
            for id in thunk.ids {
                self.shards[self.shard_of(id)].remove(&id);
                trie.perform_deletion(&id.to_be_bytes());
            }
        }
    }

    // --- round lifecycle ---

    /// Commit balance and sequence changes on every dirty account.
    pub fn commit_values(&self, dirty: &[AccountId]) {
        let _guard = self.committed_lock.write().unwrap();
        dirty.par_iter().for_each(|id| {
            if let Some(account) = self.lookup_user(*id) {
                account.commit();
            }
        });
    }

    /// Roll back every account in the database.
    ///
    /// Validation can short-circuit before the modification log is
    /// complete, so rollback cannot rely on a dirty list.
    pub fn rollback_values(&self) {
        let _guard = self.committed_lock.write().unwrap();
        self.shards.par_iter().for_each(|shard| {
            for entry in shard.iter() {
                entry.value().rollback();
            }
        });
    }

    /// Whether every dirty account has nonnegative balances.
    pub fn check_valid_state(&self, dirty: &[AccountId]) -> bool {
        let _guard = self.committed_lock.write().unwrap();
        dirty.par_iter().all(|id| {
            match self.lookup_incl_staged(*id) {
                Some(account) => {
                    let ok = account.in_valid_state();
                    if !ok {
                        trace!("account {id} in invalid state");
                    }
                    ok
                }
                // Ids that no longer resolve were rolled-back creations.
                None => true,
            }
        })
    }

    fn rewrite_commitments<F>(&self, dirty: &[AccountId], produce: F) -> Hash
    where
        F: Fn(&UserAccount) -> AccountCommitment + Sync,
    {
        let updates: Vec<(AccountId, Option<Vec<u8>>)> = dirty
            .par_iter()
            .map(|id| {
                let bytes = self
                    .lookup_incl_staged(*id)
                    .map(|acct| produce(&acct).to_xdr_bytes());
                (*id, bytes)
            })
            .collect();
        let mut trie = self.commitment_trie.lock().unwrap();
        for (id, bytes) in updates {
            let key = id.to_be_bytes();
            match bytes {
                Some(b) => {
                    trie.insert(&key, CommitmentBytes(b));
                }
                None => {
                    trie.perform_deletion(&key);
                }
            }
        }
        trie.hash()
    }

    /// Rewrite dirty accounts' trie values from committed state and hash.
    pub fn produce_state_commitment(&self, dirty: &[AccountId]) -> Hash {
        let _guard = self.committed_lock.write().unwrap();
        self.rewrite_commitments(dirty, UserAccount::produce_commitment)
    }

    /// Same, but from uncommitted (tentative) state.
    pub fn tentative_produce_state_commitment(&self, dirty: &[AccountId]) -> Hash {
        let _guard = self.committed_lock.write().unwrap();
        self.rewrite_commitments(dirty, UserAccount::tentative_commitment)
    }

    /// Restore trie values for dirty accounts from committed state after a
    /// failed validation. Keys of rolled-back creations disappear.
    pub fn rollback_produce_state_commitment(&self, dirty: &[AccountId]) {
        let _guard = self.committed_lock.write().unwrap();
        self.rewrite_commitments(dirty, UserAccount::produce_commitment);
    }

    /// Current root of the account-commitment trie.
    pub fn commitment_root(&self) -> Hash {
        self.commitment_trie.lock().unwrap().hash()
    }

    // --- persistence thunks ---

    /// Snapshot the dirty accounts' committed commitments into a thunk
    /// for `round`. Runs at phase 0, before the block leaves the node.
    pub fn add_persistence_thunk(&self, round: Round, dirty: &[AccountId]) {
        let mut entries: Vec<(AccountId, Vec<u8>)> = dirty
            .par_iter()
            .filter_map(|id| {
                self.lookup_user(*id)
                    .map(|acct| (*id, acct.produce_commitment().to_xdr_bytes()))
            })
            .collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        self.persistence_thunks
            .lock()
            .unwrap()
            .push(AccountPersistenceThunk { round, entries });
    }

    /// Detach thunks with `round <= max_round` for writing to the store.
    pub fn take_persistence_thunks(&self, max_round: Round) -> Vec<AccountPersistenceThunk> {
        let mut thunks = self.persistence_thunks.lock().unwrap();
        let keep = thunks
            .iter()
            .position(|t| t.round > max_round)
            .unwrap_or(thunks.len());
        thunks.drain(..keep).collect()
    }

    /// Drop thunks above `round` (reload path).
    pub fn clear_thunks_above(&self, round: Round) {
        self.persistence_thunks
            .lock()
            .unwrap()
            .retain(|t| t.round <= round);
        self.creation_thunks
            .lock()
            .unwrap()
            .retain(|t| t.round <= round);
    }

    // --- genesis and reload ---

    /// Install the genesis account set, run `init` on each (to seed
    /// balances), commit everything, and return the genesis commitment
    /// root.
    pub fn install_genesis_accounts<F>(
        &self,
        accounts: &[(AccountId, PublicKeyBytes)],
        init: F,
    ) -> Hash
    where
        F: Fn(&UserAccount) + Sync,
    {
        let _guard = self.committed_lock.write().unwrap();
        for (id, pk) in accounts {
            let acct = Arc::new(UserAccount::new(
                *id,
                *pk,
                self.num_assets,
                self.max_seqs_per_block,
            ));
            init(&acct);
            acct.commit();
            self.shards[self.shard_of(*id)].insert(*id, acct);
        }
        let dirty: Vec<AccountId> = accounts.iter().map(|(id, _)| *id).collect();
        self.rewrite_commitments(&dirty, UserAccount::produce_commitment)
    }

    /// Install accounts recovered from the KVStore.
    pub fn install_loaded_accounts(&self, commitments: Vec<AccountCommitment>) -> Hash {
        let _guard = self.committed_lock.write().unwrap();
        let dirty: Vec<AccountId> = commitments.iter().map(|c| c.owner).collect();
        for c in commitments {
            let acct = Arc::new(UserAccount::from_commitment(
                &c,
                self.num_assets,
                self.max_seqs_per_block,
            ));
            self.shards[self.shard_of(c.owner)].insert(c.owner, acct);
        }
        self.rewrite_commitments(&dirty, UserAccount::produce_commitment)
    }

    /// Drop every account, staged creation, thunk, and trie entry.
    /// Only the rewind/reload path calls this, with processing stopped.
    pub fn clear_all(&self) {
        let _guard = self.committed_lock.write().unwrap();
        for shard in &self.shards {
            shard.clear();
        }
        self.staging.clear();
        self.commitment_trie.lock().unwrap().clear();
        self.persistence_thunks.lock().unwrap().clear();
        self.creation_thunks.lock().unwrap().clear();
    }

    /// Lookup that genesis/test tooling uses to seed balances.
    pub fn genesis_credit(&self, account: &UserAccount, asset: AssetId, amount: i64) {
        account.asset(asset).transfer_available(amount);
        account.asset(asset).commit();
    }

    /// Direct balance read (test and diagnostic surface).
    pub fn lookup_available_balance(&self, account: AccountId, asset: AssetId) -> Option<i64> {
        self.lookup_user(account)
            .map(|a| a.asset(asset).lookup_available_balance())
    }
}
