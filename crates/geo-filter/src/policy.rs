//! Visibility decision for a classified feed item.

use crate::types::{BlockedSet, DisplayMode, GeoClassification, Visibility};

/// Decide how an item should be presented.
///
/// Anything unresolved, unclassified, or not blocked is shown.
pub fn decide(
    classification: Option<&GeoClassification>,
    blocked: &BlockedSet,
    mode: DisplayMode,
) -> Visibility {
    let is_blocked = classification
        .and_then(|c| c.country_code.as_ref())
        .is_some_and(|code| blocked.contains(code));

    match (is_blocked, mode) {
        (false, _) => Visibility::Show,
        (true, DisplayMode::Hide) => Visibility::Hide,
        (true, DisplayMode::Overlay) => Visibility::Overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CountryCode;
    use chrono::Utc;

    fn blocked(codes: &[&str]) -> BlockedSet {
        codes.iter().filter_map(|c| CountryCode::parse(c)).collect()
    }

    #[test]
    fn test_unresolved_is_shown() {
        assert_eq!(
            decide(None, &blocked(&["DE"]), DisplayMode::Hide),
            Visibility::Show
        );
    }

    #[test]
    fn test_unclassified_is_shown() {
        let entry = GeoClassification::from_location_text("Unknown", Utc::now());
        assert_eq!(
            decide(Some(&entry), &blocked(&["DE"]), DisplayMode::Hide),
            Visibility::Show
        );
    }

    #[test]
    fn test_blocked_respects_mode() {
        let entry = GeoClassification::from_location_text("Munich, Germany", Utc::now());
        let set = blocked(&["DE"]);
        assert_eq!(decide(Some(&entry), &set, DisplayMode::Hide), Visibility::Hide);
        assert_eq!(
            decide(Some(&entry), &set, DisplayMode::Overlay),
            Visibility::Overlay
        );
    }

    #[test]
    fn test_not_in_blocklist_is_shown() {
        let entry = GeoClassification::from_location_text("Paris, France", Utc::now());
        assert_eq!(
            decide(Some(&entry), &blocked(&["DE"]), DisplayMode::Overlay),
            Visibility::Show
        );
    }
}
