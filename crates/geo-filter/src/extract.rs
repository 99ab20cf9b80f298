//! Author identifier extraction from feed item markup.
//!
//! Synchronous on purpose: `scraper::Html` is `!Send`, so callers must finish
//! extraction before their next await point.

use scraper::{Html, Selector};

use crate::types::AuthorId;

/// Selector matching one feed item in a page.
pub const FEED_ITEM_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

/// Container holding the author's display and profile link.
const AUTHOR_CONTAINER_SELECTOR: &str = r#"[data-testid="User-Name"]"#;

/// Profile link nested inside the author container.
const PROFILE_LINK_SELECTOR: &str = r#"a[href*="/"]"#;

/// Top-level routes that look like profile links but are not authors.
const SYSTEM_ROUTES: &[&str] = &[
    "home",
    "explore",
    "notifications",
    "messages",
    "i",
    "compose",
    "settings",
    "search",
];

const MAX_AUTHOR_LEN: usize = 20;

/// Extract the author of a single feed item from its markup.
///
/// Returns `None` when the markup has no author container, no profile link,
/// or the link points to a system route.
pub fn extract_author(item_markup: &str) -> Option<AuthorId> {
    let container_sel = Selector::parse(AUTHOR_CONTAINER_SELECTOR).ok()?;
    let link_sel = Selector::parse(PROFILE_LINK_SELECTOR).ok()?;

    let fragment = Html::parse_fragment(item_markup);
    let container = fragment.select(&container_sel).next()?;
    let link = container.select(&link_sel).next()?;
    let href = link.value().attr("href")?;

    author_from_href(href)
}

/// Apply the profile-link rules to a raw `href`: the first path segment of a
/// root-relative link.
pub fn author_from_href(href: &str) -> Option<AuthorId> {
    let name = href.strip_prefix('/')?.split('/').next()?;

    if name.is_empty() || name.len() > MAX_AUTHOR_LEN {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    if SYSTEM_ROUTES.contains(&lower.as_str()) {
        return None;
    }
    Some(AuthorId::new(name))
}

/// Split a page into the outer markup of each feed item, in document order.
pub fn split_feed_items(page: &str) -> Vec<String> {
    let Ok(item_sel) = Selector::parse(FEED_ITEM_SELECTOR) else {
        return Vec::new();
    };
    Html::parse_document(page)
        .select(&item_sel)
        .map(|el| el.html())
        .collect()
}
