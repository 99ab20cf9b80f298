//! Resolution cache snapshots kept under the `locationCache` store key.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::store::{KeyValueStore, LOCATION_CACHE_KEY};
use crate::types::{AuthorId, FilterResult, GeoClassification};

/// Author → classification mapping as persisted.
pub type LocationSnapshot = BTreeMap<AuthorId, GeoClassification>;

/// Read the stored snapshot. Entries that fail to parse are skipped.
pub async fn load_snapshot(store: &dyn KeyValueStore) -> FilterResult<LocationSnapshot> {
    let Some(value) = store.get(LOCATION_CACHE_KEY).await? else {
        return Ok(LocationSnapshot::new());
    };
    let Value::Object(entries) = value else {
        tracing::warn!("Ignoring {LOCATION_CACHE_KEY}: not an object");
        return Ok(LocationSnapshot::new());
    };

    let mut snapshot = LocationSnapshot::new();
    for (author, entry) in entries {
        match serde_json::from_value::<GeoClassification>(entry) {
            Ok(classification) => {
                snapshot.insert(AuthorId::new(author), classification);
            }
            Err(e) => tracing::debug!("Skipping cached entry for {author}: {e}"),
        }
    }
    Ok(snapshot)
}

/// Overwrite the stored snapshot.
pub async fn save_snapshot(
    store: &dyn KeyValueStore,
    snapshot: &LocationSnapshot,
) -> FilterResult<()> {
    let value = serde_json::to_value(snapshot)?;
    store.set(LOCATION_CACHE_KEY, value).await
}
