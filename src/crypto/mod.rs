//! Signatures, structural hashing, and keyed shard routing.

use crate::wire::{Hash, PublicKeyBytes, SignatureBytes, SignedTransaction, Xdr};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use siphasher::sip::SipHasher24;
use std::hash::Hasher;

/// Sha256 over raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Sha256 over a value's canonical bytes.
pub fn hash_xdr<T: Xdr>(value: &T) -> Hash {
    hash_bytes(&value.to_xdr_bytes())
}

/// A node or account keypair.
///
/// Key generation is deterministic from a 32-byte seed so test and
/// experiment tooling can regenerate keys from account ids.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Derive a keypair from a seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        KeyPair {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Derive the deterministic keypair for an account id: the seed is the
    /// id's canonical bytes, zero padded.
    pub fn for_account(account: u64) -> Self {
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&account.to_be_bytes());
        Self::from_seed(seed)
    }

    /// Public key bytes.
    pub fn public_key(&self) -> PublicKeyBytes {
        self.signing.verifying_key().to_bytes()
    }

    /// Detached signature over arbitrary bytes.
    pub fn sign(&self, msg: &[u8]) -> SignatureBytes {
        self.signing.sign(msg).to_bytes()
    }

    /// Sign a transaction's canonical bytes, producing a [`SignedTransaction`].
    pub fn sign_tx(&self, transaction: crate::wire::Transaction) -> SignedTransaction {
        let signature = self.sign(&transaction.to_xdr_bytes());
        SignedTransaction {
            transaction,
            signature,
        }
    }
}

/// Verify a detached signature over `msg` under `pk`.
///
/// Returns false on malformed keys as well as on bad signatures; a garbage
/// public key can only enter the database through a `CREATE_ACCOUNT` op,
/// and such accounts simply can never authorize anything.
pub fn verify_detached(pk: &PublicKeyBytes, msg: &[u8], sig: &SignatureBytes) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pk) else {
        return false;
    };
    key.verify(msg, &Signature::from_bytes(sig)).is_ok()
}

/// Verify a signed transaction under the source account's public key.
pub fn check_tx_signature(signed: &SignedTransaction, pk: &PublicKeyBytes) -> bool {
    verify_detached(pk, &signed.transaction.to_xdr_bytes(), &signed.signature)
}

/// Keyed short-hash router assigning account ids to database shards.
///
/// The 16-byte key is chosen once at genesis and persisted; the same key is
/// reused for the lifetime of the chain so shard assignment is stable.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    key: [u8; 16],
    num_shards: u32,
}

impl ShardRouter {
    /// Build a router for `num_shards` shards with the given key.
    pub fn new(key: [u8; 16], num_shards: u32) -> Self {
        assert!(num_shards > 0, "shard count must be positive");
        ShardRouter { key, num_shards }
    }

    /// The persisted routing key.
    pub fn key(&self) -> [u8; 16] {
        self.key
    }

    /// Number of shards routed over.
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Shard index for an account id: the keyed short hash truncated to 32
    /// bits, scaled into `[0, num_shards)`.
    pub fn shard(&self, account: u64) -> usize {
        let mut hasher = SipHasher24::new_with_key(&self.key);
        hasher.write_u64(account);
        let short = hasher.finish() as u32;
        ((short as u64 * self.num_shards as u64) >> 32) as usize
    }
}
