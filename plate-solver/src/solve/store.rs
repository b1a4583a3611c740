//! Persisted key-value state: API key, session token, last submission id

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::{Result, SolveError};

pub const API_KEY: &str = "apiKey";
pub const SESSION_KEY: &str = "sessionKey";
pub const LAST_SUBMISSION: &str = "lastSubmission";

/// Minimal string key-value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, lost on exit
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a flat JSON object on disk
///
/// The whole file is rewritten on every change; the values are small and
/// writes are rare (login, upload).
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<Option<HashMap<String, String>>>,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            values: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            debug!("Store file does not exist: {:?}", self.path);
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| SolveError::Store(format!("Failed to read {:?}: {}", self.path, e)))?;

        let values: HashMap<String, String> = serde_json::from_str(&content)
            .map_err(|e| SolveError::Store(format!("Failed to parse {:?}: {}", self.path, e)))?;

        debug!("Loaded {} keys from {:?}", values.len(), self.path);
        Ok(values)
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SolveError::Store(format!("Failed to create {:?}: {}", parent, e)))?;
                info!("Created store directory: {:?}", parent);
            }
        }

        let content = serde_json::to_string_pretty(values)
            .map_err(|e| SolveError::Store(format!("Failed to serialize store: {}", e)))?;

        // Readers only ever see a complete file: write beside it, then rename over
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, content)
            .await
            .map_err(|e| SolveError::Store(format!("Failed to write {:?}: {}", tmp_path, e)))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| SolveError::Store(format!("Failed to replace {:?}: {}", self.path, e)))?;

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Apply `f` to the cached map (loading it on first use) and persist the result
    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashMap<String, String>) + Send,
    {
        let mut guard = self.values.write().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        if let Some(values) = guard.as_mut() {
            f(values);
            self.save(values).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(values) = self.values.read().await.as_ref() {
            return Ok(values.get(key).cloned());
        }

        let mut guard = self.values.write().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|values| values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
        .await
    }
}
