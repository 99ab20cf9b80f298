//! Offline lookup backend backed by a fixed author → location table.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use geo_filter::AuthorId;

use super::LookupBackend;
use crate::types::{LookupError, RuntimeError, RuntimeResult};

/// Answers lookups from an in-memory table. Unknown authors are reported as
/// not found.
#[derive(Debug, Clone, Default)]
pub struct TableLookup {
    locations: HashMap<String, String>,
    delay: Option<Duration>,
}

impl TableLookup {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            locations: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            delay: None,
        }
    }

    /// Load a JSON object of `{"author": "location text", ...}`.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("Failed to read lookup table {}: {e}", path.display()))
        })?;
        let locations: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            RuntimeError::Config(format!("Invalid lookup table {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded {} lookup table entries", locations.len());
        Ok(Self {
            locations,
            delay: None,
        })
    }

    /// Simulate network latency on every lookup.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LookupBackend for TableLookup {
    async fn account_location(&self, author: &AuthorId) -> Result<String, LookupError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.locations
            .get(author.as_str())
            .cloned()
            .ok_or(LookupError::UserNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ada": "Lagos, Nigeria", "bob": ""}}"#).unwrap();

        let table = TableLookup::from_file(file.path()).unwrap();
        assert_eq!(
            table.account_location(&AuthorId::new("ada")).await.unwrap(),
            "Lagos, Nigeria"
        );
        assert_eq!(table.account_location(&AuthorId::new("bob")).await.unwrap(), "");
        assert_eq!(
            table.account_location(&AuthorId::new("eve")).await,
            Err(LookupError::UserNotFound)
        );
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2]").unwrap();
        let err = TableLookup::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }
}
