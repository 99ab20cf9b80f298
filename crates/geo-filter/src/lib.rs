//! geo-filter: core library for filtering feed items by author geography.

pub mod classifier;
pub mod document;
pub mod extract;
pub mod policy;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod types;

pub use classifier::{classify, find_country, Country, COUNTRIES};
pub use document::{FeedDocument, HtmlFeed, ItemKey, ItemState, Marker, MutationBatch, MutationSource};
pub use extract::{extract_author, split_feed_items};
pub use policy::decide;
pub use settings::FilterSettings;
pub use snapshot::{load_snapshot, save_snapshot, LocationSnapshot};
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageChange};
pub use types::*;
