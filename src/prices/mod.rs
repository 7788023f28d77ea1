//! Market-clearing price computation: the tâtonnement search and the
//! feasibility solver that arbitrates it.

pub mod demand;
pub mod solver;
pub mod tatonnement;

pub use demand::MarketSnapshot;
pub use solver::{FeasibleClearing, LpSolver};
pub use tatonnement::{
    PriceComputationTimeout, PriceSearchResult, TatonnementConfig, TatonnementOracle,
};
