//! Vendor candidate resolution
//!
//! Turns a (service, network) pair into the ordered list of adapters that
//! dispatch should walk. An explicit service route pins the order; without
//! one, enabled vendor configs are used in priority order.

use std::sync::Arc;
use tracing::warn;

use crate::database::repository::{RoutingStore, VendorConfigStore};
use crate::error::{AppError, AppResult};
use crate::model::ServiceType;
use crate::vendors::registry::VendorRegistry;
use crate::vendors::traits::VendorAdapter;
use crate::vendors::types::PlanQuote;

pub struct VendorRouter {
    registry: Arc<VendorRegistry>,
    routing: Arc<dyn RoutingStore>,
    vendor_configs: Arc<dyn VendorConfigStore>,
}

impl VendorRouter {
    pub fn new(
        registry: Arc<VendorRegistry>,
        routing: Arc<dyn RoutingStore>,
        vendor_configs: Arc<dyn VendorConfigStore>,
    ) -> Self {
        Self {
            registry,
            routing,
            vendor_configs,
        }
    }

    /// Ordered adapters to try for a purchase. Errors with `NoVendorAvailable`
    /// when nothing can serve the pair.
    pub async fn resolve(
        &self,
        service_type: ServiceType,
        network: &str,
    ) -> AppResult<Vec<Arc<dyn VendorAdapter>>> {
        let enabled = self.vendor_configs.list_enabled_for(service_type).await?;
        let enabled_ids: Vec<String> = enabled.iter().map(|c| c.adapter_id.clone()).collect();

        let ordered_ids = match self.routing.find_route(service_type, network).await? {
            Some(route) => {
                let kept: Vec<String> = route
                    .vendors
                    .iter()
                    .filter(|id| {
                        let on = enabled_ids.iter().any(|e| e == *id);
                        if !on {
                            warn!(
                                "Route for {}/{} names disabled vendor '{}', skipping",
                                service_type, network, id
                            );
                        }
                        on
                    })
                    .cloned()
                    .collect();
                // A route whose vendors are all disabled should not black-hole
                // the pair; fall back to whatever is enabled.
                if kept.is_empty() {
                    enabled_ids
                } else {
                    kept
                }
            }
            None => enabled_ids,
        };

        let mut candidates: Vec<Arc<dyn VendorAdapter>> = Vec::new();
        for adapter_id in &ordered_ids {
            match self.registry.get(adapter_id) {
                Some(adapter) if adapter.supports(service_type) => candidates.push(adapter),
                Some(_) => {
                    warn!(
                        "Adapter '{}' does not support {}, skipping",
                        adapter_id, service_type
                    );
                }
                None => {
                    warn!("No registered adapter for vendor '{}', skipping", adapter_id);
                }
            }
        }

        if candidates.is_empty() {
            return Err(AppError::NoVendorAvailable {
                service_type: service_type.to_string(),
                network: network.to_string(),
            });
        }
        Ok(candidates)
    }

    /// Plan catalog for a (service, network) pair, taken from the first
    /// resolved vendor that returns a non-empty list.
    pub async fn quote_plans(
        &self,
        service_type: ServiceType,
        network: &str,
    ) -> AppResult<Vec<PlanQuote>> {
        let candidates = self.resolve(service_type, network).await?;
        let mut last_error = None;
        for adapter in candidates {
            match adapter.quote(service_type, network).await {
                Ok(plans) if !plans.is_empty() => return Ok(plans),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Plan quote from '{}' failed for {}/{}: {}",
                        adapter.id(),
                        service_type,
                        network,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }
}
