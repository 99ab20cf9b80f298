//! Integration tests: a captured feed page through extraction, classification,
//! and policy, with settings kept in an on-disk store.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use geo_filter::settings::{block_country, set_display_mode, unblock_country};
use geo_filter::store::{BLOCKED_COUNTRIES_KEY, DISPLAY_MODE_KEY};
use geo_filter::{
    decide, extract_author, DisplayMode, FeedDocument, FileStore, FilterError, FilterSettings,
    GeoClassification, HtmlFeed, ItemKey, KeyValueStore, Visibility,
};

const PAGE: &str = r#"<!doctype html>
<html><body>
  <nav><a href="/home">Home</a></nav>
  <main>
    <article data-testid="tweet">
      <div data-testid="User-Name"><a href="/berlin_dev">Berliner</a><a href="/berlin_dev/status/1">1h</a></div>
      <div lang="en">Guten Morgen</div>
    </article>
    <article data-testid="tweet">
      <div data-testid="User-Name"><a href="/tokyo_dev">東京</a></div>
    </article>
    <article data-testid="tweet">
      <div data-testid="User-Name"><a href="/explore">Explore</a></div>
    </article>
    <article data-testid="tweet">
      <div data-testid="User-Name"><a href="/no_location">Mystery</a></div>
    </article>
  </main>
</body></html>"#;

fn locations() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("berlin_dev", "Berlin, Germany"),
        ("tokyo_dev", "Tokyo, Japan"),
        ("no_location", ""),
    ])
}

#[test]
fn test_page_through_policy() {
    let feed = HtmlFeed::from_page(PAGE);
    assert_eq!(feed.len(), 4);

    let blocked = ["DE", "JP"]
        .iter()
        .filter_map(|c| geo_filter::CountryCode::parse(c))
        .collect();
    let table = locations();

    let decisions: Vec<Visibility> = feed
        .items()
        .into_iter()
        .map(|item| {
            let author = feed.markup(item).and_then(extract_author);
            let classification = author.as_ref().and_then(|a| {
                table
                    .get(a.as_str())
                    .map(|text| GeoClassification::from_location_text(*text, Utc::now()))
            });
            decide(classification.as_ref(), &blocked, DisplayMode::Overlay)
        })
        .collect();

    assert_eq!(
        decisions,
        vec![
            Visibility::Overlay,
            Visibility::Overlay,
            Visibility::Show,
            Visibility::Show,
        ]
    );
}

#[test]
fn test_effects_reset_cleanly() {
    let mut feed = HtmlFeed::from_page(PAGE);
    let first = ItemKey(0);
    let second = ItemKey(1);

    feed.set_display_none(first, true);
    feed.set_marker(first, geo_filter::Marker::Hidden, true);
    feed.attach_overlay(second);
    feed.attach_overlay(second);
    feed.set_marker(second, geo_filter::Marker::Overlaid, true);
    assert_eq!(feed.overlay_count(second), 1);
    assert_eq!(feed.marked_items(), vec![first, second]);

    for item in feed.marked_items() {
        feed.reset_item(item);
    }
    assert!(feed.marked_items().is_empty());
    assert!(!feed.is_display_none(first));
    assert_eq!(feed.overlay_count(second), 0);
    assert!(!feed.is_position_relative(second));
}

#[tokio::test]
async fn test_settings_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.geos");

    {
        let store = FileStore::open(&path).unwrap();
        let mut changes = store.subscribe();

        block_country(&store, "de").await.unwrap();
        block_country(&store, "NG").await.unwrap();
        block_country(&store, "DE").await.unwrap();
        set_display_mode(&store, DisplayMode::Overlay).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, BLOCKED_COUNTRIES_KEY);
        assert_eq!(change.new_value, Some(json!(["DE"])));
        let change = changes.recv().await.unwrap();
        assert_eq!(change.new_value, Some(json!(["DE", "NG"])));
        let change = changes.recv().await.unwrap();
        assert_eq!(change.key, DISPLAY_MODE_KEY);
    }

    let store = FileStore::open(&path).unwrap();
    let settings = FilterSettings::load(&store).await.unwrap();
    assert_eq!(settings.mode, DisplayMode::Overlay);
    assert_eq!(
        settings.blocked.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
        vec!["DE", "NG"]
    );

    assert!(unblock_country(&store, "ng").await.unwrap());
    assert!(!unblock_country(&store, "NG").await.unwrap());
    assert_eq!(
        store.get(BLOCKED_COUNTRIES_KEY).await.unwrap(),
        Some(json!(["DE"]))
    );
}

#[tokio::test]
async fn test_blocking_unknown_country_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("store.geos")).unwrap();

    let err = block_country(&store, "ZZ").await.unwrap_err();
    assert!(matches!(err, FilterError::UnknownCountry(_)));
    assert_eq!(store.get(BLOCKED_COUNTRIES_KEY).await.unwrap(), None);
}
