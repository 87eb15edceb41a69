//! Vendor integration layer
//!
//! Adapters wrap each third-party fulfillment API behind [`VendorAdapter`];
//! the registry holds the built adapters and the router decides which ones a
//! purchase should try, in what order.

pub mod providers;
pub mod registry;
pub mod router;
pub mod traits;
pub mod types;

pub use registry::VendorRegistry;
pub use router::VendorRouter;
pub use traits::VendorAdapter;
pub use types::{DispatchOutcome, PlanQuote, PurchaseOrder, VerifyOutcome};
