use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::cache::{FEATURES_KEY, ProvisioningCache};
use crate::feature::{Features, Scope, SnapshotError, decode_snapshot};
use crate::strategy::StrategyRegistry;

/// What callers do when they notice an expired snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StalePolicy {
    /// Answer from the expired snapshot unless no refresh is running, in
    /// which case this caller performs it.
    #[default]
    ServeStale,
    /// Wait for the refresh to finish and answer from its result.
    WaitForRefresh,
}

#[derive(Clone, Debug)]
pub(crate) struct RefreshPolicy {
    pub(crate) ttl: Duration,
    pub(crate) retry_interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) stale: StalePolicy,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            retry_interval: Duration::from_secs(15),
            timeout: Duration::from_secs(3),
            stale: StalePolicy::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Reading the provisioning cache failed: {0}")]
    Cache(Box<dyn std::error::Error + Send + Sync>),

    #[error("Reading the provisioning cache timed out after {0:?}")]
    Timeout(Duration),

    #[error("No snapshot is stored under `{0}`")]
    Missing(&'static str),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Freshness {
    Uninitialized,
    Fresh,
    /// The last attempt failed recently; no new attempt yet.
    BackingOff,
    Stale,
}

#[derive(Debug, Default)]
struct View {
    features: Arc<Features>,
    refreshed_at: Option<Instant>,
    failed_at: Option<Instant>,
}

impl View {
    fn freshness(&self, now: Instant, policy: &RefreshPolicy) -> Freshness {
        if self.refreshed_at.is_none() && self.failed_at.is_none() {
            return Freshness::Uninitialized;
        }

        if let Some(refreshed_at) = self.refreshed_at
            && now.duration_since(refreshed_at) < policy.ttl
        {
            return Freshness::Fresh;
        }

        if let Some(failed_at) = self.failed_at
            && now.duration_since(failed_at) < policy.retry_interval
        {
            return Freshness::BackingOff;
        }

        Freshness::Stale
    }

    fn loaded(&self) -> Option<Arc<Features>> {
        self.refreshed_at.map(|_| self.features.clone())
    }
}

/// The in-process view of this scope's flags, rebuilt from the
/// provisioning cache when it expires.
///
/// The view is replaced as a whole; readers hold an `Arc` to the snapshot
/// they started with.
pub(crate) struct FeatureRegistry<C: ProvisioningCache> {
    cache: C,
    scope: Scope,
    strategies: StrategyRegistry,
    policy: RefreshPolicy,
    view: RwLock<Arc<View>>,
    refresh_lock: Mutex<()>,
}

impl<C: ProvisioningCache> FeatureRegistry<C> {
    pub(crate) fn new(
        cache: C,
        scope: Scope,
        strategies: StrategyRegistry,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            cache,
            scope,
            strategies,
            policy,
            view: RwLock::new(Arc::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub(crate) fn cache(&self) -> &C {
        &self.cache
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.policy.timeout
    }

    async fn current(&self) -> Arc<View> {
        self.view.read().await.clone()
    }

    /// Returns the flags to evaluate against, refreshing first if needed.
    ///
    /// `None` means no snapshot was ever loaded successfully.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    pub(crate) async fn get_or_refresh(&self) -> Option<Arc<Features>> {
        let view = self.current().await;

        match view.freshness(Instant::now(), &self.policy) {
            Freshness::Fresh | Freshness::BackingOff => return view.loaded(),
            // Until a load succeeds there is nothing to serve, so every caller
            // waits for the load in flight.
            Freshness::Uninitialized => {
                let _guard = self.refresh_lock.lock().await;
                self.refresh_if_needed_locked().await;
            }
            Freshness::Stale
                if view.refreshed_at.is_none()
                    || self.policy.stale == StalePolicy::WaitForRefresh =>
            {
                let _guard = self.refresh_lock.lock().await;
                self.refresh_if_needed_locked().await;
            }
            Freshness::Stale => match self.refresh_lock.try_lock() {
                Ok(_guard) => self.refresh_if_needed_locked().await,
                Err(_) => {
                    tracing::trace!("Refresh already running, serving the stale snapshot");
                    return view.loaded();
                }
            },
        }

        self.current().await.loaded()
    }

    /// Reloads unconditionally, waiting for a running refresh first.
    #[tracing::instrument(skip(self))]
    pub(crate) async fn refresh(&self) -> Result<usize, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        self.reload_locked().await
    }

    // Callers hold `refresh_lock`. Another caller may have refreshed while
    // this one waited for the lock, so check again.
    async fn refresh_if_needed_locked(&self) {
        let view = self.current().await;
        if matches!(
            view.freshness(Instant::now(), &self.policy),
            Freshness::Uninitialized | Freshness::Stale
        ) {
            // Errors are logged by reload_locked and the previous view kept.
            let _ = self.reload_locked().await;
        }
    }

    async fn reload_locked(&self) -> Result<usize, RefreshError> {
        let result = self.load().await;
        let previous = self.current().await;
        let now = Instant::now();

        let next = match &result {
            Ok(features) => View {
                features: features.clone(),
                refreshed_at: Some(now),
                failed_at: None,
            },
            Err(e) => {
                tracing::warn!(
                    %e,
                    tenant = self.scope.tenant(),
                    environment = self.scope.environment(),
                    "Refreshing feature toggles failed, keeping the previous snapshot"
                );
                View {
                    features: previous.features.clone(),
                    refreshed_at: previous.refreshed_at,
                    failed_at: Some(now),
                }
            }
        };

        *self.view.write().await = Arc::new(next);

        result.map(|features| features.len())
    }

    async fn load(&self) -> Result<Arc<Features>, RefreshError> {
        let bytes = tokio::time::timeout(self.policy.timeout, self.cache.get(FEATURES_KEY))
            .await
            .map_err(|_| RefreshError::Timeout(self.policy.timeout))?
            .map_err(|e| RefreshError::Cache(Box::new(e)))?
            .ok_or(RefreshError::Missing(FEATURES_KEY))?;

        let records = decode_snapshot(&bytes)?;
        let features = Features::build(records, &self.scope, &self.strategies);

        if features.is_empty() {
            tracing::warn!(
                tenant = self.scope.tenant(),
                environment = self.scope.environment(),
                "Snapshot holds no features for this scope"
            );
        }
        tracing::debug!(count = features.len(), "Loaded feature toggles");

        Ok(Arc::new(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::flaky_cache::FlakyCache;

    const SNAPSHOT_V1: &str = r#"[
        {"name": "acme.prod.new_ui", "enabled": true,
         "strategies": [{"name": "EnableForDomains", "parameters": {"domain_names": "shop"}}]}
    ]"#;

    const SNAPSHOT_V2: &str = r#"[
        {"name": "acme.prod.new_ui", "enabled": false, "strategies": []},
        {"name": "acme.prod.checkout", "enabled": true, "strategies": []}
    ]"#;

    fn registry(cache: FlakyCache) -> Arc<FeatureRegistry<FlakyCache>> {
        Arc::new(FeatureRegistry::new(
            cache,
            Scope::new("acme", "prod"),
            StrategyRegistry::new(),
            RefreshPolicy::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn loads_lazily_on_first_query() {
        let cache = FlakyCache::new(Duration::ZERO);
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());

        assert_eq!(cache.reads(), 0);
        let features = registry.get_or_refresh().await.unwrap();
        assert!(features.get("new_ui").unwrap().enabled());
        assert_eq!(cache.reads(), 1);

        registry.get_or_refresh().await.unwrap();
        assert_eq!(cache.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reloads_once_the_ttl_expires() {
        let cache = FlakyCache::new(Duration::ZERO);
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());
        registry.get_or_refresh().await.unwrap();

        cache.store(SNAPSHOT_V2).await;
        tokio::time::advance(Duration::from_secs(59 * 60)).await;
        assert!(registry.get_or_refresh().await.unwrap().get("checkout").is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        let features = registry.get_or_refresh().await.unwrap();
        assert!(features.get("checkout").is_some());
        assert!(!features.get("new_ui").unwrap().enabled());
        assert_eq!(cache.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_the_previous_snapshot() {
        let cache = FlakyCache::new(Duration::ZERO);
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());
        registry.get_or_refresh().await.unwrap();

        cache.set_failing(true);
        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;

        let features = registry.get_or_refresh().await.unwrap();
        assert!(features.get("new_ui").unwrap().enabled());
        assert!(registry.refresh().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn garbled_snapshot_keeps_the_previous_snapshot() {
        let cache = FlakyCache::new(Duration::ZERO);
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());
        registry.get_or_refresh().await.unwrap();

        cache.store("\u{80}\u{4}not json").await;
        assert!(matches!(
            registry.refresh().await,
            Err(RefreshError::Snapshot(_))
        ));
        assert!(registry.get_or_refresh().await.unwrap().get("new_ui").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_before_retrying() {
        let cache = FlakyCache::new(Duration::ZERO);
        cache.store(SNAPSHOT_V1).await;
        cache.set_failing(true);
        let registry = registry(cache.clone());

        assert!(registry.get_or_refresh().await.is_none());
        assert!(registry.get_or_refresh().await.is_none());
        assert_eq!(cache.reads(), 1);

        cache.set_failing(false);
        tokio::time::advance(Duration::from_secs(16)).await;
        assert!(registry.get_or_refresh().await.is_some());
        assert_eq!(cache.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_snapshot_is_a_refresh_failure() {
        let registry = registry(FlakyCache::new(Duration::ZERO));

        assert!(registry.get_or_refresh().await.is_none());
        assert!(matches!(
            registry.refresh().await,
            Err(RefreshError::Missing(FEATURES_KEY))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cache_times_out() {
        let cache = FlakyCache::new(Duration::from_secs(10));
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache);

        assert!(matches!(
            registry.refresh().await,
            Err(RefreshError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_queries_share_one_load() {
        let cache = FlakyCache::new(Duration::from_millis(500));
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_or_refresh().await })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap().unwrap().get("new_ui").is_some());
        }
        assert_eq!(cache.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_readers_do_not_wait_for_a_running_refresh() {
        let cache = FlakyCache::new(Duration::from_millis(500));
        cache.store(SNAPSHOT_V1).await;
        let registry = registry(cache.clone());
        registry.get_or_refresh().await.unwrap();

        cache.store(SNAPSHOT_V2).await;
        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;

        let refreshing = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_refresh().await })
        };
        tokio::task::yield_now().await;

        let stale = registry.get_or_refresh().await.unwrap();
        assert!(stale.get("checkout").is_none());

        let fresh = refreshing.await.unwrap().unwrap();
        assert!(fresh.get("checkout").is_some());
        assert_eq!(cache.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn callers_wait_for_a_retried_first_load() {
        let cache = FlakyCache::new(Duration::from_millis(500));
        cache.store(SNAPSHOT_V1).await;
        cache.set_failing(true);
        let registry = registry(cache.clone());
        assert!(registry.get_or_refresh().await.is_none());

        cache.set_failing(false);
        tokio::time::advance(Duration::from_secs(16)).await;

        let retrying = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_refresh().await })
        };
        tokio::task::yield_now().await;

        let concurrent = registry.get_or_refresh().await;
        assert!(concurrent.unwrap().get("new_ui").is_some());
        assert!(retrying.await.unwrap().is_some());
        assert_eq!(cache.reads(), 2);
    }
}
