mod builder;
pub mod cache;
mod client;
mod context;
pub mod feature;
pub mod global;
mod identity;
mod metrics;
mod registry;
pub mod strategy;

pub use builder::{Backend, Builder, ConfigurationError};
pub use cache::{Caches, ProvisioningCache, RedisSettings, RedisTopology};
pub use client::{
    BUSINESS_KEY, Client, DOMAIN_KEY, EXPERT_KEY, PARTNER_KEY, TEAM_KEY, UpdateError,
};
pub use context::Context;
pub use feature::{FeatureRecord, Features, Scope, Variant};
pub use identity::{AppName, InstanceId};
pub use metrics::{MetricsBucket, MetricsReport, ToggleCount};
pub use registry::{RefreshError, StalePolicy};
pub use strategy::{Parameters, Strategy};

/// A [`Builder`] for `tenant` and `environment` whose app name is the
/// calling crate's package name.
#[macro_export]
macro_rules! builder {
    ($tenant:expr, $environment:expr) => {{
        $crate::Builder::new($tenant, $environment)
            .set_app_name(Some($crate::AppName::from(env!("CARGO_PKG_NAME"))))
    }};
}

#[cfg(test)]
mod test;
