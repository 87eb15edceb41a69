//! Vendor adapter trait
//!
//! Every third-party fulfillment API is wrapped in an adapter implementing
//! this trait, so the purchase orchestrator can walk a route of vendors
//! without knowing any wire details.

use async_trait::async_trait;

use crate::error::AppResult;
use crate::model::ServiceType;
use crate::vendors::types::{DispatchOutcome, PlanQuote, PurchaseOrder, VerifyOutcome};

/// Abstraction over one external fulfillment vendor.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Stable identifier used in routes and vendor configs.
    fn id(&self) -> &str;

    /// Whether this vendor is configured to serve the given service.
    fn supports(&self, service_type: ServiceType) -> bool;

    /// List purchasable plans for a service and network.
    async fn quote(&self, service_type: ServiceType, network: &str) -> AppResult<Vec<PlanQuote>>;

    /// Send one order to the vendor, exactly once, and classify the result.
    ///
    /// Adapters never retry here; retrying is a routing decision and an
    /// uncounted retry could fulfil an order twice. Every failure mode folds
    /// into `Rejected` or `Unavailable` rather than an error.
    async fn execute(&self, order: &PurchaseOrder) -> DispatchOutcome;

    /// Ask the vendor what became of a past attempt, by its request id.
    ///
    /// Read-only, so adapters may retry transport failures internally.
    /// Anything short of a definitive answer is `Unknown`.
    async fn verify(&self, request_id: &str) -> VerifyOutcome;
}

impl std::fmt::Debug for dyn VendorAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorAdapter").field("id", &self.id()).finish()
    }
}
