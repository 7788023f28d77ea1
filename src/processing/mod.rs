//! Transaction processing: status codes, database views, the serial
//! evaluators, and the parallel batch driver.

pub mod driver;
pub mod serial;
pub mod stats;
pub mod status;
pub mod view;

pub use driver::{produce_tx_block, replay_tx_block};
pub use serial::{SerialTxProcessor, SerialTxValidator};
pub use stats::BlockStateUpdateStats;
pub use status::TxStatus;
pub use view::{BufferedDbView, DbView, UnbufferedDbView};
