use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// An in-process store, shared between clones.
#[derive(Clone, Default)]
pub struct Generic {
    state: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl super::ProvisioningCache for Generic {
    type Error = std::convert::Infallible;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.state.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Self::Error> {
        self.state.write().await.insert(key.to_string(), value);
        Ok(())
    }
}
