//! Blocklist and display mode, mirrored from the key-value store.

use serde_json::Value;

use crate::classifier::find_country;
use crate::store::{KeyValueStore, StorageChange, BLOCKED_COUNTRIES_KEY, DISPLAY_MODE_KEY};
use crate::types::{BlockedSet, CountryCode, DisplayMode, FilterError, FilterResult};

/// Working copy of the user's filter settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSettings {
    pub blocked: BlockedSet,
    pub mode: DisplayMode,
}

impl FilterSettings {
    /// Load the current settings. Missing keys fall back to defaults.
    pub async fn load(store: &dyn KeyValueStore) -> FilterResult<Self> {
        let mut settings = Self::default();
        if let Some(value) = store.get(BLOCKED_COUNTRIES_KEY).await? {
            settings.blocked = parse_blocked(&value);
        }
        if let Some(value) = store.get(DISPLAY_MODE_KEY).await? {
            settings.mode = parse_mode(&value);
        }
        Ok(settings)
    }

    /// Mirror one change notification. Returns true when items must be
    /// reprocessed.
    pub fn apply_change(&mut self, change: &StorageChange) -> bool {
        match change.key.as_str() {
            BLOCKED_COUNTRIES_KEY => {
                self.blocked = change
                    .new_value
                    .as_ref()
                    .map(parse_blocked)
                    .unwrap_or_default();
                tracing::info!(
                    "Blocked countries updated: {:?}",
                    self.blocked.iter().map(|c| c.as_str()).collect::<Vec<_>>()
                );
                true
            }
            DISPLAY_MODE_KEY => {
                self.mode = change.new_value.as_ref().map(parse_mode).unwrap_or_default();
                tracing::info!("Display mode updated: {}", self.mode.as_str());
                true
            }
            _ => false,
        }
    }
}

/// Accepts an array of codes; anything that is not a two-letter code is
/// dropped.
fn parse_blocked(value: &Value) -> BlockedSet {
    value
        .as_array()
        .map(|codes| {
            codes
                .iter()
                .filter_map(Value::as_str)
                .filter_map(CountryCode::parse)
                .collect()
        })
        .unwrap_or_default()
}

/// Accepts `"hide"`/`"overlay"`, or a boolean where `true` means overlay.
fn parse_mode(value: &Value) -> DisplayMode {
    match value {
        Value::Bool(true) => DisplayMode::Overlay,
        Value::String(s) => s.parse().unwrap_or_default(),
        _ => DisplayMode::Hide,
    }
}

/// Add a catalog country to the stored blocklist, preserving order.
pub async fn block_country(store: &dyn KeyValueStore, code: &str) -> FilterResult<CountryCode> {
    let country = find_country(code).ok_or_else(|| FilterError::UnknownCountry(code.to_string()))?;
    let code = CountryCode::parse(country.code)
        .ok_or_else(|| FilterError::UnknownCountry(code.to_string()))?;

    let mut codes = stored_codes(store).await?;
    if !codes.iter().any(|c| c == code.as_str()) {
        codes.push(code.as_str().to_string());
        store.set(BLOCKED_COUNTRIES_KEY, Value::from(codes)).await?;
    }
    Ok(code)
}

/// Remove a country from the stored blocklist. Returns whether it was present.
pub async fn unblock_country(store: &dyn KeyValueStore, code: &str) -> FilterResult<bool> {
    let code = CountryCode::parse(code)
        .ok_or_else(|| FilterError::InvalidInput(format!("Not a country code: {code}")))?;
    let mut codes = stored_codes(store).await?;
    let before = codes.len();
    codes.retain(|c| !c.eq_ignore_ascii_case(code.as_str()));
    if codes.len() == before {
        return Ok(false);
    }
    store.set(BLOCKED_COUNTRIES_KEY, Value::from(codes)).await?;
    Ok(true)
}

/// Persist the display mode.
pub async fn set_display_mode(store: &dyn KeyValueStore, mode: DisplayMode) -> FilterResult<()> {
    store.set(DISPLAY_MODE_KEY, Value::from(mode.as_str())).await
}

async fn stored_codes(store: &dyn KeyValueStore) -> FilterResult<Vec<String>> {
    Ok(store
        .get(BLOCKED_COUNTRIES_KEY)
        .await?
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}
