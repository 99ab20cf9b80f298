//! Feed reprocessing pipeline.
//!
//! A discovery pass claims every unprocessed item by setting its Processed
//! marker before any lookup starts, so overlapping passes never handle the
//! same item twice. Claimed items are grouped by author; each author is
//! resolved once and the resulting decision applies to all of their items.
//! Settling re-checks the Processed marker under the document lock, which is
//! what keeps a lookup that completes after a settings reset from touching
//! the freshly reset item.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use geo_filter::{
    decide, extract_author, AuthorId, FeedDocument, FilterSettings, ItemKey, Marker,
    MutationBatch, MutationSource, StorageChange, Visibility,
};

use crate::cache::ResolutionCache;

/// Per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Items claimed by this pass.
    pub discovered: usize,
    /// Claimed items with no recognizable author; left shown.
    pub unextractable: usize,
    pub shown: usize,
    pub hidden: usize,
    pub overlaid: usize,
    /// Items reset while their lookup was outstanding.
    pub skipped: usize,
}

impl PassReport {
    fn record(&mut self, outcome: Settled) {
        match outcome {
            Settled::Applied(Visibility::Show) => self.shown += 1,
            Settled::Applied(Visibility::Hide) => self.hidden += 1,
            Settled::Applied(Visibility::Overlay) => self.overlaid += 1,
            Settled::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Settled {
    Applied(Visibility),
    Skipped,
}

/// Drives discovery passes over one document.
pub struct Pipeline<D: FeedDocument> {
    document: Arc<Mutex<D>>,
    cache: Arc<ResolutionCache>,
    settings: RwLock<FilterSettings>,
    active_passes: AtomicUsize,
}

impl<D: FeedDocument> Pipeline<D> {
    pub fn new(document: D, cache: Arc<ResolutionCache>, settings: FilterSettings) -> Self {
        Self {
            document: Arc::new(Mutex::new(document)),
            cache,
            settings: RwLock::new(settings),
            active_passes: AtomicUsize::new(0),
        }
    }

    /// Shared handle to the document, for hosts that mutate it.
    pub fn document(&self) -> &Arc<Mutex<D>> {
        &self.document
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub async fn settings(&self) -> FilterSettings {
        self.settings.read().await.clone()
    }

    /// True when no pass is running, nothing is unprocessed, and no lookup
    /// is outstanding.
    pub async fn is_settled(&self) -> bool {
        if self.active_passes.load(Ordering::SeqCst) > 0 || !self.cache.is_idle() {
            return false;
        }
        self.document.lock().await.unprocessed_items().is_empty()
    }

    /// Claim and settle every unprocessed item.
    pub async fn discovery_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let claimed: Vec<(AuthorId, Vec<ItemKey>)> = {
            let mut doc = self.document.lock().await;
            let mut claimed: Vec<(AuthorId, Vec<ItemKey>)> = Vec::new();
            for item in doc.unprocessed_items() {
                doc.set_marker(item, Marker::Processed, true);
                report.discovered += 1;
                let Some(author) = doc.markup(item).and_then(extract_author) else {
                    report.unextractable += 1;
                    continue;
                };
                match claimed.iter_mut().find(|(a, _)| *a == author) {
                    Some((_, items)) => items.push(item),
                    None => claimed.push((author, vec![item])),
                }
            }
            claimed
        };

        if report.discovered > 0 {
            tracing::debug!(
                "Discovery pass claimed {} items by {} authors ({} without author)",
                report.discovered,
                claimed.len(),
                report.unextractable
            );
        }

        let outcomes = join_all(
            claimed
                .into_iter()
                .map(|(author, items)| self.settle(author, items)),
        )
        .await;
        for outcome in outcomes.into_iter().flatten() {
            report.record(outcome);
        }
        report
    }

    /// Resolve `author` once and apply the result to each of their items.
    async fn settle(&self, author: AuthorId, items: Vec<ItemKey>) -> Vec<Settled> {
        let classification = self.cache.resolve(&author).await;

        let mut doc = self.document.lock().await;
        let settings = self.settings.read().await;
        let visibility = decide(classification.as_ref(), &settings.blocked, settings.mode);

        let mut outcomes = Vec::with_capacity(items.len());
        for item in items {
            if !doc.has_marker(item, Marker::Processed) {
                tracing::debug!("Item {} was reset while resolving {author}", item.0);
                outcomes.push(Settled::Skipped);
                continue;
            }
            match visibility {
                Visibility::Show => {}
                Visibility::Hide => {
                    doc.set_display_none(item, true);
                    doc.set_marker(item, Marker::Hidden, true);
                    tracing::debug!("Hid item {} by {author}", item.0);
                }
                Visibility::Overlay => {
                    doc.attach_overlay(item);
                    doc.set_marker(item, Marker::Overlaid, true);
                    tracing::debug!("Overlaid item {} by {author}", item.0);
                }
            }
            outcomes.push(Settled::Applied(visibility));
        }
        outcomes
    }

    /// Undo every effect and clear every marker. Returns the number of items
    /// reset.
    pub async fn reset_all(&self) -> usize {
        let mut doc = self.document.lock().await;
        let marked = doc.marked_items();
        for item in &marked {
            doc.reset_item(*item);
        }
        marked.len()
    }

    /// Mirror a storage change into the working settings, resetting the
    /// document when it affects visibility. Returns true if a reset happened.
    pub async fn apply_settings_change(&self, change: &StorageChange) -> bool {
        let relevant = self.settings.write().await.apply_change(change);
        if relevant {
            let reset = self.reset_all().await;
            tracing::info!("Settings changed, reset {reset} items");
        }
        relevant
    }

    /// Apply a storage change and reprocess if it was relevant.
    pub async fn handle_settings_change(&self, change: &StorageChange) -> Option<PassReport> {
        if self.apply_settings_change(change).await {
            Some(self.discovery_pass().await)
        } else {
            None
        }
    }

    /// Run until `shutdown` fires: an initial pass, then one pass per
    /// mutation batch and one reset-and-pass per relevant settings change.
    ///
    /// Passes run on their own tasks so a slow lookup never delays the next
    /// notification.
    pub async fn run<S>(
        self: Arc<Self>,
        mut mutations: S,
        mut changes: broadcast::Receiver<StorageChange>,
        shutdown: Arc<Notify>,
    ) where
        S: Stream<Item = MutationBatch> + Unpin + Send,
    {
        tracing::info!("Pipeline started");
        self.spawn_pass();

        let mut mutations_open = true;
        let mut changes_open = true;
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    tracing::info!("Pipeline shutting down");
                    break;
                }
                batch = mutations.next(), if mutations_open => match batch {
                    Some(batch) => {
                        tracing::trace!("Mutation batch with {} added items", batch.added.len());
                        self.spawn_pass();
                    }
                    None => {
                        tracing::debug!("Mutation source closed");
                        mutations_open = false;
                    }
                },
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        if self.apply_settings_change(&change).await {
                            self.spawn_pass();
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Missed {n} settings changes, reloading from scratch");
                        self.reset_all().await;
                        self.spawn_pass();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Settings change feed closed");
                        changes_open = false;
                    }
                },
            }
        }
    }

    fn spawn_pass(self: &Arc<Self>) {
        let pipeline = Arc::clone(self);
        self.active_passes.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let report = pipeline.discovery_pass().await;
            pipeline.active_passes.fetch_sub(1, Ordering::SeqCst);
            if report.discovered > 0 {
                tracing::info!(
                    "Pass settled {} items: {} shown, {} hidden, {} overlaid, {} skipped",
                    report.discovered,
                    report.shown + report.unextractable,
                    report.hidden,
                    report.overlaid,
                    report.skipped
                );
            }
        });
    }
}

/// Adapt a mutation source into the stream `Pipeline::run` consumes.
///
/// A lagging observer yields an empty batch, which still triggers a pass
/// that picks up everything unprocessed.
pub fn observe(source: &MutationSource) -> impl Stream<Item = MutationBatch> + Unpin + Send {
    BroadcastStream::new(source.subscribe()).map(|batch| match batch {
        Ok(batch) => batch,
        Err(BroadcastStreamRecvError::Lagged(n)) => {
            tracing::warn!("Mutation observer lagged by {n} batches");
            MutationBatch { added: Vec::new() }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use geo_filter::{CountryCode, DisplayMode, HtmlFeed, ItemState};

    use crate::transport::duplex;

    fn item(author: &str) -> String {
        format!(
            r#"<article data-testid="tweet"><div data-testid="User-Name"><a href="/{author}">{author}</a></div></article>"#
        )
    }

    /// Pipeline whose cache has no bridge behind it; every lookup fails.
    fn offline_pipeline(feed: HtmlFeed, settings: FilterSettings) -> Pipeline<HtmlFeed> {
        let (consumer, privileged) = duplex();
        drop(privileged);
        let (cache, _rx) = ResolutionCache::connect(consumer, Duration::from_secs(1));
        Pipeline::new(feed, cache, settings)
    }

    fn blocking(code: &str, mode: DisplayMode) -> FilterSettings {
        FilterSettings {
            blocked: [CountryCode::parse(code).unwrap()].into_iter().collect(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_unresolved_items_are_shown() {
        let mut feed = HtmlFeed::new();
        feed.append_items([item("ada"), "<article>no author</article>".to_string()]);
        let pipeline = offline_pipeline(feed, blocking("DE", DisplayMode::Hide));

        let report = pipeline.discovery_pass().await;
        assert_eq!(report.discovered, 2);
        assert_eq!(report.unextractable, 1);
        assert_eq!(report.shown, 1);

        let doc = pipeline.document().lock().await;
        assert_eq!(doc.state(ItemKey(0)), ItemState::Shown);
        assert_eq!(doc.state(ItemKey(1)), ItemState::Shown);
    }

    #[tokio::test]
    async fn test_reset_clears_markers() {
        let mut feed = HtmlFeed::new();
        feed.append_items([item("ada")]);
        let pipeline = offline_pipeline(feed, FilterSettings::default());
        pipeline.discovery_pass().await;

        {
            let mut doc = pipeline.document().lock().await;
            doc.set_display_none(ItemKey(0), true);
            doc.set_marker(ItemKey(0), Marker::Hidden, true);
        }
        assert_eq!(pipeline.reset_all().await, 1);

        let doc = pipeline.document().lock().await;
        assert_eq!(doc.state(ItemKey(0)), ItemState::Unprocessed);
        assert!(!doc.is_display_none(ItemKey(0)));
    }

    #[tokio::test]
    async fn test_irrelevant_change_keeps_state() {
        let mut feed = HtmlFeed::new();
        feed.append_items([item("ada")]);
        let pipeline = offline_pipeline(feed, FilterSettings::default());
        pipeline.discovery_pass().await;

        let change = StorageChange {
            key: "locationCache".to_string(),
            old_value: None,
            new_value: Some(serde_json::json!({})),
        };
        assert!(pipeline.handle_settings_change(&change).await.is_none());
        let doc = pipeline.document().lock().await;
        assert_eq!(doc.state(ItemKey(0)), ItemState::Shown);
    }
}
