//! Usage accounting: pricing each model call and persisting it to the ledger.

mod ledger;
mod tracker;

pub use ledger::{LedgerError, UsageLedger};
pub use tracker::{CostTracker, UsageSummary};
