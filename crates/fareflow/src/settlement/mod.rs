//! Post-completion settlement paths: cash dual-confirmation and multi-party
//! split fares. Immediate charges live on the lifecycle itself.

pub mod cash;
pub mod router;
pub mod split;

#[cfg(test)]
mod tests;

pub use cash::{
    derive_outcome, CashConfirmationView, CashOutcome, CashResolution, CashSettlementError,
    CashSettlementService,
};
pub use router::settlement_router;
pub use split::{
    build_allocation, equal_split, validate_shares, SplitAllocationView, SplitFareService,
    SplitLegView, SplitSettlementError,
};
