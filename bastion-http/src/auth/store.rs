//! Token storage backends
//!
//! The coordinator only needs get/set/remove of named string values. Every
//! backend is exposed through the same async trait, whether or not the
//! underlying storage blocks.

use async_trait::async_trait;
use bastion_config::{AuthConfig, StorageKind, StorageOptions};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Errors raised by token storage backends
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenStoreError {
    #[error("Token storage I/O error: {0}")]
    Io(String),

    #[error("Token storage is corrupt: {0}")]
    Corrupt(String),

    #[error("Token storage misconfigured: {0}")]
    Config(String),
}

/// Named string storage for tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError>;

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError>;

    /// `Cookie` header value to attach to outgoing requests, if the backend keeps cookies
    fn cookie_header(&self) -> Option<String> {
        None
    }
}

/// Process-memory storage
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// JSON file storage
#[derive(Debug)]
pub struct LocalTokenStore {
    path: PathBuf,
    lock: AsyncMutex<()>,
}

impl LocalTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, TokenStoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| TokenStoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(TokenStoreError::Io(e.to_string())),
        }
    }

    async fn save(&self, values: &BTreeMap<String, String>) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TokenStoreError::Io(e.to_string()))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(values).map_err(|e| TokenStoreError::Corrupt(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| TokenStoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl TokenStore for LocalTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values).await
    }

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.save(&values).await?;
        }
        Ok(())
    }
}

/// A cookie kept by [`CookieTokenStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct CookieRecord {
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
}

/// Cookie-jar storage whose values are sent back as a `Cookie` header
#[derive(Debug)]
pub struct CookieTokenStore {
    cookies: RwLock<BTreeMap<String, CookieRecord>>,
    options: StorageOptions,
}

impl CookieTokenStore {
    pub fn new(options: StorageOptions) -> Self {
        Self {
            cookies: RwLock::new(BTreeMap::new()),
            options,
        }
    }

    pub fn record(&self, key: &str) -> Option<CookieRecord> {
        self.cookies.read().get(key).cloned()
    }
}

#[async_trait]
impl TokenStore for CookieTokenStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError> {
        Ok(self.cookies.read().get(key).map(|record| record.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError> {
        self.cookies.write().insert(
            key.to_string(),
            CookieRecord {
                value: value.to_string(),
                domain: self.options.cookie_domain.clone(),
                path: self.options.cookie_path.clone(),
                secure: self.options.secure,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TokenStoreError> {
        self.cookies.write().remove(key);
        Ok(())
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.read();
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, record)| format!("{}={}", name, record.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Build the backend selected by the auth configuration
pub fn build_token_store(config: &AuthConfig) -> Result<Arc<dyn TokenStore>, TokenStoreError> {
    debug!("Using {} token storage", config.storage);

    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryTokenStore::new())),
        StorageKind::Cookie => Ok(Arc::new(CookieTokenStore::new(config.storage_options.clone()))),
        StorageKind::Local => {
            let path = config.storage_options.path.as_ref().ok_or_else(|| {
                TokenStoreError::Config("local storage requires storage_options.path".to_string())
            })?;
            Ok(Arc::new(LocalTokenStore::new(path)))
        }
    }
}

#[cfg(any(test, feature = "testing"))]
mockall::mock! {
    pub TokenStore {}

    #[async_trait]
    impl TokenStore for TokenStore {
        async fn get(&self, key: &str) -> Result<Option<String>, TokenStoreError>;
        async fn set(&self, key: &str, value: &str) -> Result<(), TokenStoreError>;
        async fn remove(&self, key: &str) -> Result<(), TokenStoreError>;
        fn cookie_header(&self) -> Option<String>;
    }
}
