//! Persistence for access tokens across process restarts.

use crate::token::AccessToken;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Somewhere an access token can be kept between runs.
///
/// The token manager treats a stored token past its expiry as absent, so
/// stores do not need to check expiry themselves.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Returns the stored token, if any.
    async fn load(&self) -> Result<Option<AccessToken>>;

    /// Replaces the stored token.
    async fn save(&self, token: &AccessToken) -> Result<()>;

    /// Removes the stored token. Removing an absent token succeeds.
    async fn clear(&self) -> Result<()>;
}

/// Keeps the token in memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<AccessToken>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<AccessToken>> {
        Ok(self.slot.lock().clone())
    }

    async fn save(&self, token: &AccessToken) -> Result<()> {
        *self.slot.lock() = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.slot.lock().take();
        Ok(())
    }
}

/// Keeps the token as JSON in a file.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Creates a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<AccessToken>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::TokenStore(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            Error::TokenStore(format!("Corrupt token file {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, token: &AccessToken) -> Result<()> {
        let json = serde_json::to_vec(token)
            .map_err(|e| Error::TokenStore(format!("Failed to encode token: {e}")))?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            Error::TokenStore(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::TokenStore(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
