//! Local subscription cache: a single persisted slot holding the last web
//! push subscription this device believed it held.
//!
//! The slot lives outside the registry and survives restarts and registry
//! unavailability. Its only job is detecting divergence between what the
//! browser reports now and what was last recorded, which signals a
//! revocation performed entirely outside the app (e.g. browser
//! notification settings).

use crate::registration::types::WebPushSubscription;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Storage key of the cached subscription slot.
pub const LATEST_SUBSCRIPTION_KEY: &str = "latest_push_subscription";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage failure: {0}")]
    Io(String),
}

/// Device-local persistent key-value slots. A single string per key,
/// surviving process restarts. Never contended across devices.
pub trait SubscriptionCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Snapshot written to the cache slot after every successful web
/// subscribe/refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSubscription {
    pub delivery_token: String,
    pub subscription: WebPushSubscription,
}

/// Read and decode the cached slot. A corrupt or unreadable value is
/// logged and treated as absent rather than aborting the caller's pass.
pub fn read_cached_subscription(cache: &dyn SubscriptionCache) -> Option<CachedSubscription> {
    let raw = match cache.get(LATEST_SUBSCRIPTION_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            log::warn!("Failed to read the cached subscription slot: {}", e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(cached) => Some(cached),
        Err(e) => {
            log::warn!("Corrupted cached subscription JSON data: {}", e);
            None
        }
    }
}

/// Persist the cached slot.
pub fn write_cached_subscription(
    cache: &dyn SubscriptionCache,
    cached: &CachedSubscription,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(cached)
        .map_err(|e| CacheError::Io(format!("failed to encode cached subscription: {}", e)))?;
    cache.set(LATEST_SUBSCRIPTION_KEY, &raw)
}

/// Best-effort clear of the cached slot.
pub fn clear_cached_subscription(cache: &dyn SubscriptionCache) {
    if let Err(e) = cache.remove(LATEST_SUBSCRIPTION_KEY) {
        log::warn!("Failed to clear the cached subscription slot: {}", e);
    }
}

/// File-backed cache: each key is one file under a device-local directory.
pub struct FileSubscriptionCache {
    dir: PathBuf,
}

impl FileSubscriptionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default slot directory under the user's home.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".greenstay")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Default for FileSubscriptionCache {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

impl SubscriptionCache for FileSubscriptionCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| CacheError::Io(format!("failed to create {}: {}", self.dir.display(), e)))?;
        let path = self.path_for(key);
        std::fs::write(&path, value)
            .map_err(|e| CacheError::Io(format!("failed to write {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-memory cache for tests and for platforms where the shell owns
/// persistence.
#[derive(Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.slots.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.slots
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.slots.lock().unwrap().remove(key);
        Ok(())
    }
}
