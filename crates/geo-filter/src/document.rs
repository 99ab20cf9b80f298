//! Feed document abstraction and an in-memory implementation.
//!
//! The `FeedDocument` trait is the seam to whatever hosts the live page. The
//! pipeline only ever touches items through it: reading markup, flipping the
//! three processing markers, toggling hide styling, and attaching or detaching
//! the overlay node.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::extract::split_feed_items;

/// Data attribute set once an item has been claimed by a discovery pass.
pub const PROCESSED_ATTR: &str = "data-geo-processed";
/// Data attribute set while an item is hidden.
pub const HIDDEN_ATTR: &str = "data-geo-hidden";
/// Data attribute set while an item carries the overlay node.
pub const OVERLAY_ATTR: &str = "data-geo-overlay";
/// Class name of the inserted overlay node.
pub const OVERLAY_CLASS: &str = "geo-blocked-overlay";
/// Text content of the inserted overlay node.
pub const OVERLAY_TEXT: &str = "BLOCKED";

/// Stable handle to one feed item inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemKey(pub usize);

/// The three independent per-item processing markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Processed,
    Hidden,
    Overlaid,
}

impl Marker {
    pub fn attribute(self) -> &'static str {
        match self {
            Self::Processed => PROCESSED_ATTR,
            Self::Hidden => HIDDEN_ATTR,
            Self::Overlaid => OVERLAY_ATTR,
        }
    }
}

/// Presentation state derived from an item's markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Unprocessed,
    Shown,
    Hidden,
    Overlaid,
}

/// A live document holding feed items.
pub trait FeedDocument: Send + Sync + 'static {
    /// Every feed item currently in the document, in document order.
    fn items(&self) -> Vec<ItemKey>;
    /// Outer markup of an item, if it still exists.
    fn markup(&self, item: ItemKey) -> Option<&str>;
    fn has_marker(&self, item: ItemKey, marker: Marker) -> bool;
    fn set_marker(&mut self, item: ItemKey, marker: Marker, on: bool);
    /// Apply or remove `display: none`.
    fn set_display_none(&mut self, item: ItemKey, hidden: bool);
    /// Insert the overlay node (and `position: relative`). No-op if present.
    fn attach_overlay(&mut self, item: ItemKey);
    /// Remove the overlay node and the positioning it added.
    fn detach_overlay(&mut self, item: ItemKey);

    /// Items not yet claimed by any discovery pass.
    fn unprocessed_items(&self) -> Vec<ItemKey> {
        self.items()
            .into_iter()
            .filter(|item| !self.has_marker(*item, Marker::Processed))
            .collect()
    }

    /// Items bearing any of the three markers.
    fn marked_items(&self) -> Vec<ItemKey> {
        self.items()
            .into_iter()
            .filter(|item| {
                [Marker::Processed, Marker::Hidden, Marker::Overlaid]
                    .iter()
                    .any(|m| self.has_marker(*item, *m))
            })
            .collect()
    }

    /// Return an item to the unprocessed state, undoing every effect.
    fn reset_item(&mut self, item: ItemKey) {
        self.set_marker(item, Marker::Processed, false);
        self.set_marker(item, Marker::Hidden, false);
        self.set_marker(item, Marker::Overlaid, false);
        self.set_display_none(item, false);
        self.detach_overlay(item);
    }

    fn state(&self, item: ItemKey) -> ItemState {
        if self.has_marker(item, Marker::Hidden) {
            ItemState::Hidden
        } else if self.has_marker(item, Marker::Overlaid) {
            ItemState::Overlaid
        } else if self.has_marker(item, Marker::Processed) {
            ItemState::Shown
        } else {
            ItemState::Unprocessed
        }
    }
}

/// One batch of items added to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    pub added: Vec<ItemKey>,
}

/// Broadcast source of document mutation batches.
///
/// Any number of observers may subscribe; with no observers, batches are
/// dropped. A fresh subscription starts from the next batch.
#[derive(Debug, Clone)]
pub struct MutationSource {
    sender: broadcast::Sender<MutationBatch>,
}

impl MutationSource {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, batch: MutationBatch) {
        let _ = self.sender.send(batch);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MutationBatch> {
        self.sender.subscribe()
    }
}

impl Default for MutationSource {
    fn default() -> Self {
        Self::new(64)
    }
}

#[derive(Debug, Clone, Default)]
struct ItemNode {
    markup: String,
    processed: bool,
    hidden: bool,
    overlaid: bool,
    display_none: bool,
    position_relative: bool,
    overlay_nodes: usize,
}

/// In-memory feed document built from page HTML.
#[derive(Debug, Default)]
pub struct HtmlFeed {
    nodes: Vec<ItemNode>,
    mutations: MutationSource,
}

impl HtmlFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from a full page, keeping only feed items.
    pub fn from_page(page: &str) -> Self {
        let mut feed = Self::new();
        for markup in split_feed_items(page) {
            feed.push_node(markup);
        }
        feed
    }

    /// The mutation source observers subscribe to.
    pub fn mutations(&self) -> &MutationSource {
        &self.mutations
    }

    /// Append items and emit one mutation batch for them.
    pub fn append_items<I, S>(&mut self, markups: I) -> Vec<ItemKey>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added: Vec<ItemKey> = markups
            .into_iter()
            .map(|m| self.push_node(m.into()))
            .collect();
        if !added.is_empty() {
            self.mutations.emit(MutationBatch {
                added: added.clone(),
            });
        }
        added
    }

    /// Append the feed items found in a page fragment.
    pub fn append_page(&mut self, page: &str) -> Vec<ItemKey> {
        self.append_items(split_feed_items(page))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_display_none(&self, item: ItemKey) -> bool {
        self.nodes.get(item.0).is_some_and(|n| n.display_none)
    }

    pub fn is_position_relative(&self, item: ItemKey) -> bool {
        self.nodes.get(item.0).is_some_and(|n| n.position_relative)
    }

    /// Number of overlay nodes currently inside the item.
    pub fn overlay_count(&self, item: ItemKey) -> usize {
        self.nodes.get(item.0).map_or(0, |n| n.overlay_nodes)
    }

    /// Item markup with its markers, styling, and overlay node applied.
    pub fn render_item(&self, item: ItemKey) -> Option<String> {
        let node = self.nodes.get(item.0)?;

        let mut attrs = String::new();
        for (on, marker) in [
            (node.processed, Marker::Processed),
            (node.hidden, Marker::Hidden),
            (node.overlaid, Marker::Overlaid),
        ] {
            if on {
                let _ = write!(attrs, r#" {}="true""#, marker.attribute());
            }
        }
        let mut styles = Vec::new();
        if node.display_none {
            styles.push("display: none");
        }
        if node.position_relative {
            styles.push("position: relative");
        }
        if !styles.is_empty() {
            let _ = write!(attrs, r#" style="{}""#, styles.join("; "));
        }

        let markup = node.markup.as_str();
        let (open_end, close_start) = match (markup.find('>'), markup.rfind("</")) {
            (Some(open), Some(close)) if close > open => (open, close),
            _ => return Some(markup.to_string()),
        };

        let mut out = String::with_capacity(markup.len() + attrs.len() + 64);
        out.push_str(&markup[..open_end]);
        out.push_str(&attrs);
        out.push_str(&markup[open_end..close_start]);
        if node.overlay_nodes > 0 {
            let _ = write!(out, r#"<div class="{OVERLAY_CLASS}">{OVERLAY_TEXT}</div>"#);
        }
        out.push_str(&markup[close_start..]);
        Some(out)
    }

    /// Every item rendered, one per line.
    pub fn render(&self) -> String {
        self.items()
            .into_iter()
            .filter_map(|item| self.render_item(item))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn push_node(&mut self, markup: String) -> ItemKey {
        self.nodes.push(ItemNode {
            markup,
            ..ItemNode::default()
        });
        ItemKey(self.nodes.len() - 1)
    }
}

impl FeedDocument for HtmlFeed {
    fn items(&self) -> Vec<ItemKey> {
        (0..self.nodes.len()).map(ItemKey).collect()
    }

    fn markup(&self, item: ItemKey) -> Option<&str> {
        self.nodes.get(item.0).map(|n| n.markup.as_str())
    }

    fn has_marker(&self, item: ItemKey, marker: Marker) -> bool {
        self.nodes.get(item.0).is_some_and(|n| match marker {
            Marker::Processed => n.processed,
            Marker::Hidden => n.hidden,
            Marker::Overlaid => n.overlaid,
        })
    }

    fn set_marker(&mut self, item: ItemKey, marker: Marker, on: bool) {
        if let Some(node) = self.nodes.get_mut(item.0) {
            match marker {
                Marker::Processed => node.processed = on,
                Marker::Hidden => node.hidden = on,
                Marker::Overlaid => node.overlaid = on,
            }
        }
    }

    fn set_display_none(&mut self, item: ItemKey, hidden: bool) {
        if let Some(node) = self.nodes.get_mut(item.0) {
            node.display_none = hidden;
        }
    }

    fn attach_overlay(&mut self, item: ItemKey) {
        if let Some(node) = self.nodes.get_mut(item.0) {
            if node.overlay_nodes == 0 {
                node.overlay_nodes = 1;
                node.position_relative = true;
            }
        }
    }

    fn detach_overlay(&mut self, item: ItemKey) {
        if let Some(node) = self.nodes.get_mut(item.0) {
            node.overlay_nodes = 0;
            node.position_relative = false;
        }
    }
}
