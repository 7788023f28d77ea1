//! The account state layer: revertable balances, sequence-number windows,
//! user accounts, and the sharded database that commits to all of them.

pub mod asset;
pub mod db;
pub mod seqno;
pub mod thunk;
pub mod transfer_log;
pub mod user;

pub use asset::RevertableAsset;
pub use db::AccountDatabase;
pub use seqno::{SequenceTracker, SEQ_SPACING};
pub use thunk::{AccountCreationThunk, AccountPersistenceThunk};
pub use transfer_log::{TransferLog, TransferRecord};
pub use user::UserAccount;
