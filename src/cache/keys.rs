//! Cache key builders.
//!
//! Every key carries a `v1:` prefix so a layout change can roll out by
//! bumping the version instead of flushing Redis.

/// Wallet-related keys
pub mod wallet {
    use std::fmt;
    use uuid::Uuid;

    /// Key for a cached wallet row
    pub struct BalanceKey {
        owner_id: Uuid,
    }

    impl BalanceKey {
        pub fn new(owner_id: Uuid) -> Self {
            Self { owner_id }
        }
    }

    impl fmt::Display for BalanceKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "v1:wallet:balance:{}", self.owner_id)
        }
    }
}

/// Vendor routing keys
pub mod routing {
    use crate::model::ServiceType;
    use std::fmt;

    /// Key for an explicit route lookup
    pub struct RouteKey {
        service_type: ServiceType,
        network: String,
    }

    impl RouteKey {
        pub fn new(service_type: ServiceType, network: &str) -> Self {
            Self {
                service_type,
                network: network.to_string(),
            }
        }
    }

    impl fmt::Display for RouteKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "v1:route:{}:{}", self.service_type, self.network)
        }
    }

    /// Key for the enabled-vendor list of one service
    pub struct VendorsKey {
        service_type: ServiceType,
    }

    impl VendorsKey {
        pub fn new(service_type: ServiceType) -> Self {
            Self { service_type }
        }
    }

    impl fmt::Display for VendorsKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "v1:vendors:enabled:{}", self.service_type)
        }
    }
}
