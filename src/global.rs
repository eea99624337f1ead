//! An optional process-wide client for code paths that cannot carry one.

use once_cell::sync::OnceCell;

use crate::builder::ConfigurationError;
use crate::cache::Caches;
use crate::client::Client;

static CLIENT: OnceCell<Client<Caches>> = OnceCell::new();

/// Installs `client` as the process-wide instance. Only the first call
/// succeeds.
pub fn install(client: Client<Caches>) -> Result<(), ConfigurationError> {
    CLIENT.set(client).map_err(|rejected| {
        tracing::warn!(scope = ?rejected.scope(), "A process-wide client is already installed");
        ConfigurationError::AlreadyInitialized
    })
}

pub fn get() -> Option<&'static Client<Caches>> {
    CLIENT.get()
}
