//! Purchase and wallet engine
//!
//! The ledger holds the money, the orchestrator moves purchases through
//! reserve, dispatch and settle, referral pays commissions on qualifying
//! purchases, and the reconciliation sweep resolves whatever dispatch left
//! pending.

pub mod ledger;
pub mod orchestrator;
pub mod reconciliation;
pub mod referral;

pub use ledger::WalletLedger;
pub use orchestrator::PurchaseOrchestrator;
pub use reconciliation::{ReconciliationSweep, SweepReport};
pub use referral::{ReferralEngine, ReferralPolicy};
