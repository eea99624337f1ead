use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use url::Url;

use super::ProvisioningCache;

/// How to reach the Redis holding the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RedisTopology {
    Standalone {
        host: String,
        port: u16,
    },
    /// Sentinels tracking the primary of `service_name`. The primary is
    /// looked up again for every operation, so fail-overs are followed.
    Sentinel {
        sentinels: Vec<(String, u16)>,
        service_name: String,
    },
}

pub const DEFAULT_REDIS_HOST: &str = "localhost";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

impl Default for RedisTopology {
    fn default() -> Self {
        RedisTopology::Standalone {
            host: DEFAULT_REDIS_HOST.into(),
            port: DEFAULT_REDIS_PORT,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default)]
    pub topology: RedisTopology,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub auth_enabled: bool,
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSettings")
            .field("topology", &self.topology)
            .field("db", &self.db)
            .field("auth_enabled", &self.auth_enabled)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RedisConfigError {
    #[error("Mandatory arguments for Redis Sentinel are missing, both sentinels and a service name are required")]
    MissingSentinelArgs,

    #[error("Redis auth is enabled but no Redis password was provided")]
    MissingPassword,

    #[error("Invalid Redis address `{0}`")]
    InvalidAddress(String),

    #[error(transparent)]
    Client(#[from] redis::RedisError),
}

#[derive(thiserror::Error, Debug)]
pub enum RedisCacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("No sentinel knows a primary for the service `{0}`")]
    NoPrimary(String),

    #[error("Sentinel reported an unusable primary address `{0}`")]
    InvalidPrimary(String),
}

#[derive(Clone)]
enum Target {
    Standalone(redis::Client),
    Sentinel {
        sentinels: Vec<redis::Client>,
        service_name: String,
    },
}

#[derive(Clone)]
pub struct RedisCache {
    target: Target,
    db: i64,
    password: Option<String>,
}

impl RedisCache {
    /// Validates the settings and prepares clients. No connection is made.
    pub fn new(settings: &RedisSettings) -> Result<Self, RedisConfigError> {
        let password = if settings.auth_enabled {
            match settings.password.as_deref() {
                Some(p) if !p.is_empty() => Some(p.to_string()),
                _ => return Err(RedisConfigError::MissingPassword),
            }
        } else {
            None
        };

        let target = match &settings.topology {
            RedisTopology::Standalone { host, port } => Target::Standalone(redis::Client::open(
                node_url(host, *port, Some(settings.db), password.as_deref())?.as_str(),
            )?),
            RedisTopology::Sentinel {
                sentinels,
                service_name,
            } => {
                if sentinels.is_empty() || service_name.is_empty() {
                    return Err(RedisConfigError::MissingSentinelArgs);
                }

                let sentinels = sentinels
                    .iter()
                    .map(|(host, port)| -> Result<redis::Client, RedisConfigError> {
                        let url = node_url(host, *port, None, password.as_deref())?;
                        Ok(redis::Client::open(url.as_str())?)
                    })
                    .collect::<Result<Vec<_>, RedisConfigError>>()?;

                Target::Sentinel {
                    sentinels,
                    service_name: service_name.clone(),
                }
            }
        };

        Ok(Self {
            target,
            db: settings.db,
            password,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, RedisCacheError> {
        match &self.target {
            Target::Standalone(client) => Ok(client.get_multiplexed_async_connection().await?),
            Target::Sentinel {
                sentinels,
                service_name,
            } => {
                let (host, port) = discover_primary(sentinels, service_name).await?;
                let url = node_url(&host, port, Some(self.db), self.password.as_deref())
                    .map_err(|_| RedisCacheError::InvalidPrimary(format!("{host}:{port}")))?;

                tracing::trace!(%host, port, service = %service_name, "Connecting to the primary");
                let client = redis::Client::open(url.as_str())?;
                Ok(client.get_multiplexed_async_connection().await?)
            }
        }
    }
}

impl ProvisioningCache for RedisCache {
    type Error = RedisCacheError;

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RedisCacheError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    #[tracing::instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), RedisCacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }
}

fn node_url(
    host: &str,
    port: u16,
    db: Option<i64>,
    password: Option<&str>,
) -> Result<Url, RedisConfigError> {
    let address = format!("{host}:{port}");
    let mut url = Url::parse(&format!("redis://{address}"))
        .map_err(|_| RedisConfigError::InvalidAddress(address.clone()))?;

    if let Some(db) = db {
        url.set_path(&db.to_string());
    }

    url.set_password(password)
        .map_err(|()| RedisConfigError::InvalidAddress(address))?;

    Ok(url)
}

async fn discover_primary(
    sentinels: &[redis::Client],
    service_name: &str,
) -> Result<(String, u16), RedisCacheError> {
    let mut last_error = None;

    for sentinel in sentinels {
        match ask_sentinel(sentinel, service_name).await {
            Ok(Some(primary)) => return Ok(primary),
            Ok(None) => {
                tracing::debug!(service = %service_name, "Sentinel does not know the service");
            }
            Err(e) => {
                tracing::debug!(%e, "Sentinel unreachable, trying the next one");
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => e.into(),
        None => RedisCacheError::NoPrimary(service_name.to_string()),
    })
}

async fn ask_sentinel(
    sentinel: &redis::Client,
    service_name: &str,
) -> redis::RedisResult<Option<(String, u16)>> {
    let mut conn = sentinel.get_multiplexed_async_connection().await?;
    let reply: Option<(String, String)> = redis::cmd("SENTINEL")
        .arg("get-master-addr-by-name")
        .arg(service_name)
        .query_async(&mut conn)
        .await?;

    Ok(reply.and_then(|(host, port)| port.parse().ok().map(|port| (host, port))))
}
