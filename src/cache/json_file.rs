use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use super::ProvisioningCache;

const NOTES: &[&str] = &[
    "This file holds a provisioning snapshot for toggle-client.",
    "It is rewritten whenever the snapshot is updated; edits are picked up on the next refresh.",
];

#[derive(thiserror::Error, Debug)]
pub enum JsonFileError {
    #[error("The storage location has no parent directory")]
    LocationHasNoParent,

    #[error("Serializing / deserializing failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Value stored under `{0}` is not valid UTF-8")]
    NotUtf8(String),

    #[error("Loading from storage failed when opening the file `{0}`: {1}")]
    Open(PathBuf, std::io::Error),

    #[error("Creating the storage file `{0}` failed: {1}")]
    Create(PathBuf, std::io::Error),

    #[error("Reading from storage at `{0}` failed: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("Writing storage to `{0}` failed: {1}")]
    Write(PathBuf, std::io::Error),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct WrappedStorage {
    #[serde(default)]
    notes: Vec<String>,
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// A snapshot store backed by one JSON file, for local development and
/// hosts without a shared store.
#[derive(Clone)]
pub struct JsonFile {
    location: PathBuf,
    directory: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonFile {
    #[tracing::instrument]
    pub fn new(location: PathBuf) -> Result<Self, JsonFileError> {
        Ok(Self {
            directory: location
                .parent()
                .ok_or(JsonFileError::LocationHasNoParent)?
                .to_owned(),
            location,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    async fn load(&self) -> Result<Option<WrappedStorage>, JsonFileError> {
        let mut file = match OpenOptions::new()
            .read(true)
            .write(false)
            .create(false)
            .truncate(false)
            .open(&self.location)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JsonFileError::Open(self.location.clone(), e)),
        };

        let mut contents = vec![];
        file.read_to_end(&mut contents)
            .await
            .map_err(|e| JsonFileError::Read(self.location.clone(), e))?;

        Ok(Some(serde_json::from_slice(&contents)?))
    }
}

impl ProvisioningCache for JsonFile {
    type Error = JsonFileError;

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, JsonFileError> {
        Ok(self
            .load()
            .await?
            .and_then(|mut wrapped| wrapped.entries.remove(key))
            .map(String::into_bytes))
    }

    #[tracing::instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), JsonFileError> {
        let value = String::from_utf8(value).map_err(|_| JsonFileError::NotUtf8(key.to_string()))?;

        let _guard = self.write_lock.lock().await;

        let mut wrapped = self.load().await?.unwrap_or_default();
        wrapped.notes = NOTES.iter().map(|v| String::from(*v)).collect();
        wrapped.entries.insert(key.to_string(), value);
        let json = serde_json::to_string_pretty(&wrapped)?;

        let directory = self.directory.clone();
        let location = self.location.clone();

        tracing::trace!("Storing snapshot");
        tokio::task::spawn_blocking(move || -> Result<(), JsonFileError> {
            let mut tempfile = tempfile::NamedTempFile::new_in(&directory)
                .map_err(|e| JsonFileError::Create(directory.clone(), e))?;

            tempfile
                .write_all(json.as_bytes())
                .map_err(|e| JsonFileError::Write(tempfile.path().into(), e))?;

            tempfile.persist(&location)?;

            Ok(())
        })
        .await??;

        tracing::trace!(location = ?self.location, "Snapshot persisted");

        Ok(())
    }
}
