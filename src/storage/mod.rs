//! Durable key/value storage.
//!
//! Mirrors the browser's `storage.local` area: each key holds one JSON
//! blob, reads and writes are atomic per key, and there are no
//! multi-key transactions. Each key has a single owning writer.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `memory` | [`MemoryStorage`] in-process backend |
//! | `file` | [`FileStorage`] JSON file backend |
//! | `keys` | well-known storage keys |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// JSON file backend.
pub mod file;

/// Well-known keys.
pub mod keys;

/// In-memory backend.
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// ============================================================================
// Storage
// ============================================================================

/// Awaitable key/value store holding JSON values.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads a key; `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes a key, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Deletes a key. Deleting an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Reads a key and deserializes it.
///
/// # Errors
///
/// Returns the backend error, or [`crate::Error::Json`] if the stored value
/// has the wrong shape.
pub async fn load<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    match storage.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serializes a value and writes it under `key`.
///
/// # Errors
///
/// Returns [`crate::Error::Json`] or the backend error.
pub async fn save<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    storage.set(key, serde_json::to_value(value)?).await
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        total: u64,
    }

    #[tokio::test]
    async fn test_load_save_typed() {
        let storage = MemoryStorage::new();

        save(&storage, "counter", &Counter { total: 12 })
            .await
            .expect("save");
        let loaded: Option<Counter> = load(&storage, "counter").await.expect("load");

        assert_eq!(loaded, Some(Counter { total: 12 }));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let storage = MemoryStorage::new();
        let loaded: Option<Counter> = load(&storage, "absent").await.expect("load");
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_wrong_shape_is_json_error() {
        let storage = MemoryStorage::new();
        storage
            .set("counter", Value::String("nope".into()))
            .await
            .expect("set");

        let result: Result<Option<Counter>> = load(&storage, "counter").await;
        assert!(matches!(result, Err(crate::Error::Json(_))));
    }
}
