use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{
    Caches, DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT, Generic, JsonFile, JsonFileError,
    ProvisioningCache, RedisCache, RedisConfigError, RedisSettings, RedisTopology,
};
use crate::client::{Client, Inner};
use crate::context::StaticContext;
use crate::feature::Scope;
use crate::identity::{AppName, InstanceId};
use crate::metrics::Metrics;
use crate::registry::{FeatureRegistry, RefreshPolicy, StalePolicy};
use crate::strategy::{Strategy, StrategyRegistry, parse_list};

#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error(transparent)]
    Redis(#[from] RedisConfigError),

    #[error(transparent)]
    File(#[from] JsonFileError),

    #[error("A process-wide client is already installed")]
    AlreadyInitialized,

    #[error("The environment variable `{0}` is required")]
    MissingEnv(&'static str),

    #[error("The environment variable `{name}` has an invalid value `{value}`")]
    InvalidEnv { name: &'static str, value: String },
}

/// Where the provisioning snapshot is read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    Memory,
    File(PathBuf),
    Redis(RedisSettings),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Redis(RedisSettings::default())
    }
}

pub struct Builder {
    scope: Scope,
    app_name: Option<AppName>,
    instance_id: Option<InstanceId>,
    backend: Backend,
    ttl: Option<Duration>,
    retry_interval: Option<Duration>,
    timeout: Option<Duration>,
    stale_policy: Option<StalePolicy>,
    default_value: bool,
    strategies: StrategyRegistry,
    disable_metrics: bool,
}

impl Builder {
    pub fn new(tenant: impl Into<String>, environment: impl Into<String>) -> Self {
        Builder {
            scope: Scope::new(tenant, environment),
            app_name: None,
            instance_id: None,
            backend: Backend::default(),
            ttl: None,
            retry_interval: None,
            timeout: None,
            stale_policy: None,
            default_value: false,
            strategies: StrategyRegistry::new(),
            disable_metrics: false,
        }
    }

    /// Configures a builder from `TOGGLES_*` environment variables.
    ///
    /// `TOGGLES_TENANT` and `TOGGLES_ENVIRONMENT` are required. The backend
    /// is chosen by `TOGGLES_BACKEND` (`redis`, `file` or `memory`) and
    /// defaults to Redis.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let tenant =
            var("TOGGLES_TENANT").ok_or(ConfigurationError::MissingEnv("TOGGLES_TENANT"))?;
        let environment = var("TOGGLES_ENVIRONMENT")
            .ok_or(ConfigurationError::MissingEnv("TOGGLES_ENVIRONMENT"))?;

        let backend = match var("TOGGLES_BACKEND").as_deref() {
            None | Some("redis") => Backend::Redis(redis_from_lookup(&var)?),
            Some("memory") => Backend::Memory,
            Some("file") => Backend::File(
                var("TOGGLES_FILE")
                    .map(PathBuf::from)
                    .ok_or(ConfigurationError::MissingEnv("TOGGLES_FILE"))?,
            ),
            Some(other) => {
                return Err(ConfigurationError::InvalidEnv {
                    name: "TOGGLES_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let seconds = |name: &'static str| -> Result<Option<Duration>, ConfigurationError> {
            Ok(parse_var::<u64>(name, var(name))?.map(Duration::from_secs))
        };

        Ok(Builder::new(tenant, environment)
            .set_app_name(var("TOGGLES_APP_NAME").map(AppName::from))
            .set_instance_id(var("TOGGLES_INSTANCE_ID").map(InstanceId::from))
            .set_backend(backend)
            .set_ttl(seconds("TOGGLES_TTL_SECS")?)
            .set_retry_interval(seconds("TOGGLES_RETRY_SECS")?)
            .set_timeout(seconds("TOGGLES_TIMEOUT_SECS")?)
            .set_default_value(
                parse_var("TOGGLES_DEFAULT", var("TOGGLES_DEFAULT"))?.unwrap_or(false),
            )
            .set_disable_metrics(
                parse_var("TOGGLES_DISABLE_METRICS", var("TOGGLES_DISABLE_METRICS"))?
                    .unwrap_or(false),
            ))
    }

    pub fn set_app_name(mut self, app_name: Option<AppName>) -> Self {
        self.app_name = app_name;
        self
    }

    pub fn set_instance_id(mut self, instance_id: Option<InstanceId>) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn set_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// How long a loaded snapshot is used before it is reloaded. One hour
    /// when unset.
    pub fn set_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// How long to wait after a failed reload before trying again.
    pub fn set_retry_interval(mut self, retry_interval: Option<Duration>) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Bound on a single read of the provisioning cache.
    pub fn set_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout = duration;
        self
    }

    pub fn set_stale_policy(mut self, stale_policy: Option<StalePolicy>) -> Self {
        self.stale_policy = stale_policy;
        self
    }

    /// The answer for flags that are unknown or cannot be evaluated.
    ///
    /// ```rust
    /// use toggle_client::{Backend, Builder, Context};
    ///
    /// # tokio_test::block_on(async {
    /// let client = Builder::new("acme", "prod")
    ///     .set_backend(Backend::Memory)
    ///     .set_default_value(true)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert!(client.is_enabled("not-provisioned", &Context::new()).await);
    /// # })
    /// ```
    pub fn set_default_value(mut self, default_value: bool) -> Self {
        self.default_value = default_value;
        self
    }

    /// Registers a strategy under `name`, replacing a built-in of that name.
    pub fn add_strategy(mut self, name: impl Into<String>, strategy: impl Strategy) -> Self {
        self.strategies.insert(name, Arc::new(strategy));
        self
    }

    pub fn set_disable_metrics(mut self, disable_metrics: bool) -> Self {
        self.disable_metrics = disable_metrics;
        self
    }

    /// Builds a client on the configured backend.
    ///
    /// Invalid backend settings fail here; the backend itself is first
    /// contacted by the first query.
    #[tracing::instrument(skip(self))]
    pub fn build(self) -> Result<Client<Caches>, ConfigurationError> {
        let cache = match &self.backend {
            Backend::Memory => Caches::Memory(Generic::default()),
            Backend::File(path) => Caches::File(JsonFile::new(path.clone())?),
            Backend::Redis(settings) => Caches::Redis(
                RedisCache::new(settings)
                    .inspect_err(|e| tracing::error!(%e, ?settings, "Invalid Redis settings"))?,
            ),
        };

        Ok(self.build_with(cache))
    }

    /// Builds a client on a caller-supplied cache, ignoring the backend
    /// setting.
    pub fn build_with<C: ProvisioningCache>(self, cache: C) -> Client<C> {
        let defaults = RefreshPolicy::default();
        let policy = RefreshPolicy {
            ttl: self.ttl.unwrap_or(defaults.ttl),
            retry_interval: self.retry_interval.unwrap_or(defaults.retry_interval),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            stale: self.stale_policy.unwrap_or(defaults.stale),
        };

        let app_name = self.app_name.unwrap_or_default();
        let statics = StaticContext {
            app_name: app_name.to_string(),
            environment: self.scope.context_label(),
        };

        let metrics = Metrics::new(
            !self.disable_metrics,
            app_name,
            self.instance_id.unwrap_or_default(),
        );

        Client::new(Inner {
            registry: FeatureRegistry::new(cache, self.scope, self.strategies, policy),
            statics,
            default_value: self.default_value,
            metrics,
        })
    }
}

fn parse_var<T: FromStr>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigurationError> {
    value
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigurationError::InvalidEnv { name, value })
        })
        .transpose()
}

fn redis_from_lookup(
    var: &impl Fn(&str) -> Option<String>,
) -> Result<RedisSettings, ConfigurationError> {
    let topology = match var("TOGGLES_REDIS_SENTINELS") {
        Some(sentinels) => RedisTopology::Sentinel {
            sentinels: parse_list(&sentinels)
                .into_iter()
                .map(|address| {
                    address
                        .rsplit_once(':')
                        .and_then(|(host, port)| Some((host.to_string(), port.parse().ok()?)))
                        .ok_or_else(|| ConfigurationError::InvalidEnv {
                            name: "TOGGLES_REDIS_SENTINELS",
                            value: address.clone(),
                        })
                })
                .collect::<Result<_, _>>()?,
            service_name: var("TOGGLES_REDIS_SERVICE").unwrap_or_default(),
        },
        None => RedisTopology::Standalone {
            host: var("TOGGLES_REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            port: parse_var("TOGGLES_REDIS_PORT", var("TOGGLES_REDIS_PORT"))?
                .unwrap_or(DEFAULT_REDIS_PORT),
        },
    };

    let password = var("TOGGLES_REDIS_PASSWORD");

    Ok(RedisSettings {
        topology,
        db: parse_var("TOGGLES_REDIS_DB", var("TOGGLES_REDIS_DB"))?.unwrap_or(0),
        auth_enabled: parse_var("TOGGLES_REDIS_AUTH", var("TOGGLES_REDIS_AUTH"))?
            .unwrap_or(password.is_some()),
        password,
    })
}
