//! Block, header, and state-commitment wire types.

use super::price::Price;
use super::tx::{AccountId, AssetId, Hash, PublicKeyBytes, Round, SignedTransaction};
use super::xdr::{read_vec, write_vec, WireError, Xdr, XdrCursor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hard cap on assets, and so on the header's price vector length.
pub const MAX_NUM_ASSETS: u32 = 256;

/// Hard cap on directed asset pairs.
pub const MAX_NUM_PAIRS: u32 = MAX_NUM_ASSETS * (MAX_NUM_ASSETS - 1);

/// Transactions per block are bounded well below this wire cap.
const MAX_BLOCK_TXS: u32 = 1 << 24;

/// Per-orderbook clearing facts committed to by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookClearing {
    /// Units of the book's sell asset that cleared this round.
    pub sold_amount: u64,
    /// Root hash of the book's offer trie after clearing.
    pub root_hash: Hash,
}

impl Default for BookClearing {
    fn default() -> Self {
        BookClearing {
            sold_amount: 0,
            root_hash: [0u8; 32],
        }
    }
}

/// Merkle roots over every authenticated structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateRootHashes {
    /// Root of the account-commitment trie.
    pub accounts: Hash,
    /// Hash over all per-book clearing entries.
    pub orderbooks: Hash,
    /// Root of the round -> header-hash trie.
    pub header_map: Hash,
}

/// A block header. Everything a validator needs, short of the tx list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block number; previous round plus one.
    pub round: Round,
    /// Hash of the previous header.
    pub prev_hash: Hash,
    /// Fee schedule identifier echoed from configuration.
    pub fee_rate: u64,
    /// One valuation per asset, indexed by `AssetId`.
    pub prices: Vec<Price>,
    /// One entry per directed pair, indexed by pair index.
    pub clearing_details: Vec<BookClearing>,
    /// State roots after this block's effects.
    pub state_root_hashes: StateRootHashes,
}

impl Header {
    /// Hash of the canonical header bytes.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.to_xdr_bytes());
        hasher.finalize().into()
    }
}

/// A header plus its precomputed hash and the producer's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedBlock {
    /// The sealed header.
    pub header: Header,
    /// `header.hash()`, precomputed by the producer.
    pub header_hash: Hash,
    /// Producer signature over `header_hash`; checked by the consensus
    /// layer, carried opaquely here.
    #[serde(with = "super::tx::sig_bytes")]
    pub producer_signature: [u8; 64],
}

/// A full block: sealed header plus the transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header, hash, and producer signature.
    pub hashed: HashedBlock,
    /// Transactions in canonical (account, seqno) order.
    pub transactions: Vec<SignedTransaction>,
}

/// Committed per-asset balance inside an [`AccountCommitment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCommitment {
    /// The asset.
    pub asset: AssetId,
    /// Committed balance.
    pub amount: i64,
}

/// The hashed snapshot of one account: what the account trie stores and
/// what the KVStore persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCommitment {
    /// The account.
    pub owner: AccountId,
    /// Controlling public key.
    pub public_key: PublicKeyBytes,
    /// Nonzero committed balances in ascending asset order.
    pub balances: Vec<AssetCommitment>,
    /// Highest committed sequence number.
    pub last_committed_seq: u64,
}

// --- canonical encodings ---

impl Xdr for BookClearing {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.sold_amount.write_xdr(out);
        self.root_hash.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(BookClearing {
            sold_amount: cur.read_u64()?,
            root_hash: cur.read_bytes::<32>()?,
        })
    }
}

impl Xdr for StateRootHashes {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.accounts.write_xdr(out);
        self.orderbooks.write_xdr(out);
        self.header_map.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(StateRootHashes {
            accounts: cur.read_bytes::<32>()?,
            orderbooks: cur.read_bytes::<32>()?,
            header_map: cur.read_bytes::<32>()?,
        })
    }
}

impl Xdr for Header {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.round.write_xdr(out);
        self.prev_hash.write_xdr(out);
        self.fee_rate.write_xdr(out);
        write_vec(&self.prices, out);
        write_vec(&self.clearing_details, out);
        self.state_root_hashes.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(Header {
            round: cur.read_u64()?,
            prev_hash: cur.read_bytes::<32>()?,
            fee_rate: cur.read_u64()?,
            prices: read_vec(cur, MAX_NUM_ASSETS)?,
            clearing_details: read_vec(cur, MAX_NUM_PAIRS)?,
            state_root_hashes: StateRootHashes::read_xdr(cur)?,
        })
    }
}

impl Xdr for HashedBlock {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.header.write_xdr(out);
        self.header_hash.write_xdr(out);
        self.producer_signature.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(HashedBlock {
            header: Header::read_xdr(cur)?,
            header_hash: cur.read_bytes::<32>()?,
            producer_signature: cur.read_bytes::<64>()?,
        })
    }
}

impl Xdr for Block {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.hashed.write_xdr(out);
        write_vec(&self.transactions, out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(Block {
            hashed: HashedBlock::read_xdr(cur)?,
            transactions: read_vec(cur, MAX_BLOCK_TXS)?,
        })
    }
}

impl Xdr for AssetCommitment {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        (self.asset as u32).write_xdr(out);
        self.amount.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        let asset = cur.read_u32()?;
        if asset >= MAX_NUM_ASSETS {
            return Err(WireError::InvalidValue("asset id out of range"));
        }
        Ok(AssetCommitment {
            asset: asset as AssetId,
            amount: cur.read_i64()?,
        })
    }
}

impl Xdr for AccountCommitment {
    fn write_xdr(&self, out: &mut Vec<u8>) {
        self.owner.write_xdr(out);
        self.public_key.write_xdr(out);
        write_vec(&self.balances, out);
        self.last_committed_seq.write_xdr(out);
    }

    fn read_xdr(cur: &mut XdrCursor<'_>) -> Result<Self, WireError> {
        Ok(AccountCommitment {
            owner: cur.read_u64()?,
            public_key: cur.read_bytes::<32>()?,
            balances: read_vec(cur, MAX_NUM_ASSETS)?,
            last_committed_seq: cur.read_u64()?,
        })
    }
}
