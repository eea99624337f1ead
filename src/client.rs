use std::collections::BTreeMap;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cache::{FEATURES_KEY, ProvisioningCache};
use crate::context::StaticContext;
use crate::feature::{FeatureRecord, Features, Scope, SnapshotError, Variant, encode_snapshot};
use crate::metrics::{Metrics, MetricsReport};
use crate::registry::{FeatureRegistry, RefreshError};

pub const DOMAIN_KEY: &str = "domain_names";
pub const PARTNER_KEY: &str = "partner_names";
pub const BUSINESS_KEY: &str = "business_via_names";
pub const EXPERT_KEY: &str = "expert_emails";
pub const TEAM_KEY: &str = "team_ids";

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Encode(#[from] SnapshotError),

    #[error("Writing the snapshot to the provisioning cache failed: {0}")]
    Cache(Box<dyn std::error::Error + Send + Sync>),

    #[error("Writing the snapshot to the provisioning cache timed out after {0:?}")]
    Timeout(Duration),

    #[error("The snapshot was written but reloading it failed: {0}")]
    Refresh(#[from] RefreshError),
}

pub(crate) struct Inner<C: ProvisioningCache> {
    pub(crate) registry: FeatureRegistry<C>,
    pub(crate) statics: StaticContext,
    pub(crate) default_value: bool,
    pub(crate) metrics: Metrics,
}

/// Answers feature-flag questions for one tenant and environment.
///
/// Cloning is cheap; clones share the cached flags and the metrics.
pub struct Client<C: ProvisioningCache> {
    inner: Arc<Inner<C>>,
}

impl<C: ProvisioningCache> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: ProvisioningCache> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("scope", self.inner.registry.scope())
            .finish()
    }
}

impl<C: ProvisioningCache> Client<C> {
    pub(crate) fn new(inner: Inner<C>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn scope(&self) -> &Scope {
        self.inner.registry.scope()
    }

    /// Evaluates `feature`, answering with the configured default when it
    /// cannot be evaluated.
    pub async fn is_enabled(&self, feature: &str, context: &Context) -> bool {
        let default_value = self.inner.default_value;
        self.is_enabled_or(feature, context, |_, _| default_value).await
    }

    /// Evaluates `feature`, calling `fallback` with the caller's context when
    /// the flag is unknown, was never loaded, or its evaluation panicked.
    #[tracing::instrument(skip(self, context, fallback))]
    pub async fn is_enabled_or(
        &self,
        feature: &str,
        context: &Context,
        fallback: impl FnOnce(&str, &Context) -> bool,
    ) -> bool {
        let Some(features) = self.loaded(feature).await else {
            return fallback(feature, context);
        };

        let Some(definition) = features.get(feature) else {
            tracing::debug!(feature, "Unknown feature, using the fallback");
            return fallback(feature, context);
        };

        let merged = self.inner.statics.merge(context);
        match catch_unwind(AssertUnwindSafe(|| definition.is_enabled(&merged))) {
            Ok(enabled) => {
                self.inner.metrics.record(feature, enabled);
                enabled
            }
            Err(_) => {
                tracing::warn!(feature, "Evaluating the feature panicked, using the fallback");
                fallback(feature, context)
            }
        }
    }

    pub async fn is_enabled_for(
        &self,
        feature: &str,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> bool {
        self.is_enabled(feature, &Context::new().with(key, value)).await
    }

    pub async fn is_enabled_for_domain(&self, feature: &str, domain: &str) -> bool {
        self.is_enabled_for(feature, DOMAIN_KEY, domain).await
    }

    pub async fn is_enabled_for_partner(&self, feature: &str, partner: &str) -> bool {
        self.is_enabled_for(feature, PARTNER_KEY, partner).await
    }

    pub async fn is_enabled_for_business(&self, feature: &str, business_via_name: &str) -> bool {
        self.is_enabled_for(feature, BUSINESS_KEY, business_via_name).await
    }

    pub async fn is_enabled_for_expert(&self, feature: &str, expert_email: &str) -> bool {
        self.is_enabled_for(feature, EXPERT_KEY, expert_email).await
    }

    /// Team ids are often numeric; they are compared in their display form.
    pub async fn is_enabled_for_team(&self, feature: &str, team_id: impl Display) -> bool {
        self.is_enabled_for(feature, TEAM_KEY, team_id.to_string()).await
    }

    /// The variant of `feature` for `context`; [`Variant::disabled`] when
    /// the flag is off or cannot be evaluated.
    #[tracing::instrument(skip(self, context))]
    pub async fn get_variant(&self, feature: &str, context: &Context) -> Variant {
        let Some(features) = self.loaded(feature).await else {
            return Variant::disabled();
        };

        let Some(definition) = features.get(feature) else {
            tracing::debug!(feature, "Unknown feature, answering with the disabled variant");
            return Variant::disabled();
        };

        let merged = self.inner.statics.merge(context);
        match catch_unwind(AssertUnwindSafe(|| definition.get_variant(&merged))) {
            Ok(variant) => {
                self.inner.metrics.record(feature, variant.enabled);
                variant
            }
            Err(_) => {
                tracing::warn!(
                    feature,
                    "Selecting a variant panicked, answering with the disabled variant"
                );
                Variant::disabled()
            }
        }
    }

    /// The flags currently in use, refreshing first if they expired.
    pub async fn features(&self) -> Option<Arc<Features>> {
        self.inner.registry.get_or_refresh().await
    }

    /// The membership lists configured on `feature`, keyed by parameter name.
    pub async fn provisioning(&self, feature: &str) -> Option<BTreeMap<String, Vec<String>>> {
        self.features().await?.provisioning(feature)
    }

    /// Reloads the snapshot now, returning how many flags this scope has.
    pub async fn refresh(&self) -> Result<usize, RefreshError> {
        self.inner.registry.refresh().await
    }

    /// Replaces the stored snapshot with `records` and reloads it.
    ///
    /// Records carry qualified names; see [`Scope::qualify`].
    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub async fn update_cache(&self, records: &[FeatureRecord]) -> Result<usize, UpdateError> {
        let bytes = encode_snapshot(records)?;

        let registry = &self.inner.registry;
        tokio::time::timeout(registry.timeout(), registry.cache().set(FEATURES_KEY, bytes))
            .await
            .map_err(|_| UpdateError::Timeout(registry.timeout()))?
            .map_err(|e| UpdateError::Cache(Box::new(e)))?;

        Ok(self.refresh().await?)
    }

    /// Returns the evaluation counts since the previous call.
    pub fn take_metrics(&self) -> MetricsReport {
        self.inner.metrics.take()
    }

    async fn loaded(&self, feature: &str) -> Option<Arc<Features>> {
        let features = self.inner.registry.get_or_refresh().await;
        if features.is_none() {
            tracing::warn!(
                feature,
                "Feature toggles have not been loaded from the provisioning cache yet, using the fallback"
            );
        }
        features
    }
}
