//! Persistent key-value store with change notifications.
//!
//! Values are JSON. Every `set` that changes a value publishes a
//! [`StorageChange`] to all subscribers.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{FilterError, FilterResult};

/// Ordered list of blocked country codes.
pub const BLOCKED_COUNTRIES_KEY: &str = "blockedCountries";
/// Display mode for blocked items.
pub const DISPLAY_MODE_KEY: &str = "displayMode";
/// Snapshot of the resolution cache.
pub const LOCATION_CACHE_KEY: &str = "locationCache";

const CHANGE_CAPACITY: usize = 64;

/// Notification for one changed key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// An async key-value store that announces changes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> FilterResult<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> FilterResult<()>;
    async fn remove(&self, key: &str) -> FilterResult<()>;
    /// Subscribe to changes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Shared bookkeeping for both store implementations.
struct Entries {
    values: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
}

impl Entries {
    fn new(values: BTreeMap<String, Value>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            values: Mutex::new(values),
            changes,
        }
    }

    fn get(&self, key: &str) -> FilterResult<Option<Value>> {
        let values = self.lock()?;
        Ok(values.get(key).cloned())
    }

    /// Apply a change. Returns false when the value was already current.
    fn apply(&self, key: &str, new_value: Option<Value>) -> FilterResult<bool> {
        let mut values = self.lock()?;
        let old_value = match &new_value {
            Some(v) => values.insert(key.to_string(), v.clone()),
            None => values.remove(key),
        };
        if old_value == new_value {
            return Ok(false);
        }
        drop(values);

        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
        });
        Ok(true)
    }

    fn lock(&self) -> FilterResult<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.values
            .lock()
            .map_err(|_| FilterError::Storage("Store lock poisoned".to_string()))
    }
}

/// Volatile store, for tests and dry runs.
pub struct MemoryStore {
    entries: Entries,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Entries::new(BTreeMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> FilterResult<Option<Value>> {
        self.entries.get(key)
    }

    async fn set(&self, key: &str, value: Value) -> FilterResult<()> {
        self.entries.apply(key, Some(value)).map(|_| ())
    }

    async fn remove(&self, key: &str) -> FilterResult<()> {
        self.entries.apply(key, None).map(|_| ())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.entries.changes.subscribe()
    }
}

/// Store persisted to a single `.geos` file, rewritten on every change.
pub struct FileStore {
    entries: Entries,
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, creating an empty one if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> FilterResult<Self> {
        let path = path.into();
        let values = if path.exists() {
            tracing::info!("Opening store: {}", path.display());
            GeosReader::read_from_file(&path)?
        } else {
            tracing::info!("Creating new store: {}", path.display());
            BTreeMap::new()
        };
        Ok(Self {
            entries: Entries::new(values),
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current contents. Writers are serialized and each writes the
    /// latest state, so the file never ends up older than memory.
    async fn persist(&self) -> FilterResult<()> {
        let _guard = self.write_lock.lock().await;
        let values = self.entries.lock()?.clone();
        let mut buf = Vec::new();
        GeosWriter::write_to(&values, &mut buf)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, buf).await?;
        tracing::debug!("Saved store: {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> FilterResult<Option<Value>> {
        self.entries.get(key)
    }

    async fn set(&self, key: &str, value: Value) -> FilterResult<()> {
        if self.entries.apply(key, Some(value))? {
            self.persist().await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> FilterResult<()> {
        if self.entries.apply(key, None)? {
            self.persist().await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.entries.changes.subscribe()
    }
}

/// Magic bytes: "GEOS"
const GEOS_MAGIC: u32 = 0x47454F53;

/// Current format version.
const FORMAT_VERSION: u16 = 1;

/// Header size in bytes.
const HEADER_SIZE: usize = 16;

/// Writer for .geos files.
pub struct GeosWriter;

/// Reader for .geos files.
pub struct GeosReader;

impl GeosWriter {
    /// Write a key-value map to any writer.
    pub fn write_to<W: Write>(values: &BTreeMap<String, Value>, writer: &mut W) -> FilterResult<()> {
        let payload = serde_json::to_vec(values)
            .map_err(|e| FilterError::Storage(format!("Serialization failed: {e}")))?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&GEOS_MAGIC.to_le_bytes());
        header[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        // Bytes 6..8 are reserved and written as zero.
        header[8..16].copy_from_slice(&(payload.len() as u64).to_le_bytes());

        writer.write_all(&header)?;
        writer.write_all(&payload)?;
        Ok(())
    }
}

impl GeosReader {
    pub fn read_from_file(path: &Path) -> FilterResult<BTreeMap<String, Value>> {
        let mut file = std::fs::File::open(path)?;
        Self::read_from(&mut file)
    }

    /// Read a key-value map from any reader.
    pub fn read_from<R: Read>(reader: &mut R) -> FilterResult<BTreeMap<String, Value>> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != GEOS_MAGIC {
            return Err(FilterError::Storage(format!(
                "Invalid magic: expected 0x{GEOS_MAGIC:08X}, got 0x{magic:08X}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FORMAT_VERSION {
            return Err(FilterError::Storage(format!(
                "Unsupported version: {version}"
            )));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&header[8..16]);
        let payload_len = u64::from_le_bytes(len_bytes);

        let mut payload = Vec::new();
        reader.take(payload_len).read_to_end(&mut payload)?;
        if payload.len() as u64 != payload_len {
            return Err(FilterError::Storage(format!(
                "Truncated payload: header declares {payload_len} bytes, found {}",
                payload.len()
            )));
        }

        serde_json::from_slice(&payload)
            .map_err(|e| FilterError::Storage(format!("Deserialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_change_feed() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store.set(BLOCKED_COUNTRIES_KEY, json!(["DE"])).await.unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, BLOCKED_COUNTRIES_KEY);
        assert_eq!(change.old_value, None);
        assert_eq!(change.new_value, Some(json!(["DE"])));

        // Writing the same value is not a change.
        store.set(BLOCKED_COUNTRIES_KEY, json!(["DE"])).await.unwrap();
        assert!(rx.try_recv().is_err());

        store.remove(BLOCKED_COUNTRIES_KEY).await.unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.old_value, Some(json!(["DE"])));
        assert_eq!(change.new_value, None);
    }

    #[test]
    fn test_roundtrip_header() {
        let mut values = BTreeMap::new();
        values.insert(DISPLAY_MODE_KEY.to_string(), json!("overlay"));
        let mut buf = Vec::new();
        GeosWriter::write_to(&values, &mut buf).unwrap();
        assert_eq!(&buf[0..4], &GEOS_MAGIC.to_le_bytes());

        let loaded = GeosReader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(loaded, values);
    }

    #[test]
    fn test_invalid_magic() {
        let buf = [0u8; HEADER_SIZE + 4];
        assert!(GeosReader::read_from(&mut &buf[..]).is_err());
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let mut values = BTreeMap::new();
        values.insert(DISPLAY_MODE_KEY.to_string(), json!("hide"));
        let mut buf = Vec::new();
        GeosWriter::write_to(&values, &mut buf).unwrap();
        buf[8..16].copy_from_slice(&u64::MAX.to_le_bytes());

        let err = GeosReader::read_from(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, FilterError::Storage(msg) if msg.contains("Truncated")));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.geos");

        let store = FileStore::open(&path).unwrap();
        store.set(DISPLAY_MODE_KEY, json!("hide")).await.unwrap();
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get(DISPLAY_MODE_KEY).await.unwrap(),
            Some(json!("hide"))
        );
    }
}
