//! Adapter registry
//!
//! Holds the constructed vendor adapters keyed by adapter id. Built once at
//! startup from the enabled vendor configs; routing looks adapters up here.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::VendorConfig;
use crate::vendors::providers::{ClubKonnectAdapter, VtPassAdapter};
use crate::vendors::traits::VendorAdapter;

#[derive(Default)]
pub struct VendorRegistry {
    adapters: HashMap<String, Arc<dyn VendorAdapter>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Construct adapters for every enabled config. Configs that fail to
    /// parse are skipped with a warning so one bad row cannot take the
    /// whole engine down.
    pub fn from_configs(configs: &[VendorConfig]) -> Self {
        let mut registry = Self::new();
        for config in configs {
            if !config.is_enabled {
                continue;
            }
            let built: Result<Arc<dyn VendorAdapter>, String> = match config.adapter_id.as_str() {
                "vtpass" => VtPassAdapter::from_config(config).map(|a| Arc::new(a) as _),
                "clubkonnect" => ClubKonnectAdapter::from_config(config).map(|a| Arc::new(a) as _),
                other => Err(format!("unknown adapter id '{}'", other)),
            };
            match built {
                Ok(adapter) => registry.register(adapter),
                Err(reason) => {
                    warn!(
                        "Skipping vendor config '{}' ({}): {}",
                        config.adapter_id, config.display_name, reason
                    );
                }
            }
        }
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn VendorAdapter>) {
        info!("Registered vendor adapter: {}", adapter.id());
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, adapter_id: &str) -> Option<Arc<dyn VendorAdapter>> {
        self.adapters.get(adapter_id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
