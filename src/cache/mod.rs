//! The shared backing store holding the provisioning snapshot.
//!
//! The store only sees opaque bytes under a key; decoding is the registry's
//! business.

mod generic;
mod json_file;
mod redis_cache;

use std::future::Future;

pub use generic::Generic;
pub use json_file::{JsonFile, JsonFileError};
pub use redis_cache::{
    DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT, RedisCache, RedisCacheError, RedisConfigError,
    RedisSettings, RedisTopology,
};

/// Key of the serialized list of flag records.
pub const FEATURES_KEY: &str = "/client/features";

pub trait ProvisioningCache: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, Self::Error>> + Send;

    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// The backends selectable through [`crate::Builder`].
#[derive(Clone)]
pub enum Caches {
    Memory(Generic),
    File(JsonFile),
    Redis(RedisCache),
}

impl ProvisioningCache for Caches {
    type Error = CachesError;

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self)))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        match self {
            Self::Memory(c) => Ok(c.get(key).await?),
            Self::File(c) => Ok(c.get(key).await?),
            Self::Redis(c) => Ok(c.get(key).await?),
        }
    }

    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(skip(self, value)))]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Self::Error> {
        match self {
            Self::Memory(c) => Ok(c.set(key, value).await?),
            Self::File(c) => Ok(c.set(key, value).await?),
            Self::Redis(c) => Ok(c.set(key, value).await?),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CachesError {
    #[error(transparent)]
    Infallible(#[from] std::convert::Infallible),

    #[error(transparent)]
    File(#[from] JsonFileError),

    #[error(transparent)]
    Redis(#[from] RedisCacheError),
}
