//! Location text to country code classification.
//!
//! First-match over a fixed, ordered table of case-insensitive, word-bounded
//! patterns. Text that matches nothing (or is empty) classifies as `None`.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::CountryCode;

/// A country offered by the settings surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    pub code: &'static str,
    pub name: &'static str,
    pub flag: &'static str,
}

/// Every country a user can block, in display order.
pub const COUNTRIES: &[Country] = &[
    Country { code: "US", name: "United States", flag: "🇺🇸" },
    Country { code: "GB", name: "United Kingdom", flag: "🇬🇧" },
    Country { code: "CA", name: "Canada", flag: "🇨🇦" },
    Country { code: "AU", name: "Australia", flag: "🇦🇺" },
    Country { code: "IN", name: "India", flag: "🇮🇳" },
    Country { code: "DE", name: "Germany", flag: "🇩🇪" },
    Country { code: "FR", name: "France", flag: "🇫🇷" },
    Country { code: "JP", name: "Japan", flag: "🇯🇵" },
    Country { code: "BR", name: "Brazil", flag: "🇧🇷" },
    Country { code: "MX", name: "Mexico", flag: "🇲🇽" },
    Country { code: "ES", name: "Spain", flag: "🇪🇸" },
    Country { code: "IT", name: "Italy", flag: "🇮🇹" },
    Country { code: "RU", name: "Russia", flag: "🇷🇺" },
    Country { code: "CN", name: "China", flag: "🇨🇳" },
    Country { code: "KR", name: "South Korea", flag: "🇰🇷" },
    Country { code: "NL", name: "Netherlands", flag: "🇳🇱" },
    Country { code: "SE", name: "Sweden", flag: "🇸🇪" },
    Country { code: "PL", name: "Poland", flag: "🇵🇱" },
    Country { code: "TR", name: "Turkey", flag: "🇹🇷" },
    Country { code: "AR", name: "Argentina", flag: "🇦🇷" },
    Country { code: "BE", name: "Belgium", flag: "🇧🇪" },
    Country { code: "CH", name: "Switzerland", flag: "🇨🇭" },
    Country { code: "AT", name: "Austria", flag: "🇦🇹" },
    Country { code: "NO", name: "Norway", flag: "🇳🇴" },
    Country { code: "DK", name: "Denmark", flag: "🇩🇰" },
    Country { code: "FI", name: "Finland", flag: "🇫🇮" },
    Country { code: "PT", name: "Portugal", flag: "🇵🇹" },
    Country { code: "GR", name: "Greece", flag: "🇬🇷" },
    Country { code: "CZ", name: "Czech Republic", flag: "🇨🇿" },
    Country { code: "IE", name: "Ireland", flag: "🇮🇪" },
    Country { code: "NZ", name: "New Zealand", flag: "🇳🇿" },
    Country { code: "SG", name: "Singapore", flag: "🇸🇬" },
    Country { code: "HK", name: "Hong Kong", flag: "🇭🇰" },
    Country { code: "ZA", name: "South Africa", flag: "🇿🇦" },
    Country { code: "AE", name: "United Arab Emirates", flag: "🇦🇪" },
    Country { code: "SA", name: "Saudi Arabia", flag: "🇸🇦" },
    Country { code: "IL", name: "Israel", flag: "🇮🇱" },
    Country { code: "EG", name: "Egypt", flag: "🇪🇬" },
    Country { code: "NG", name: "Nigeria", flag: "🇳🇬" },
    Country { code: "ID", name: "Indonesia", flag: "🇮🇩" },
    Country { code: "TH", name: "Thailand", flag: "🇹🇭" },
    Country { code: "MY", name: "Malaysia", flag: "🇲🇾" },
    Country { code: "PH", name: "Philippines", flag: "🇵🇭" },
    Country { code: "VN", name: "Vietnam", flag: "🇻🇳" },
    Country { code: "PK", name: "Pakistan", flag: "🇵🇰" },
    Country { code: "BD", name: "Bangladesh", flag: "🇧🇩" },
    Country { code: "CL", name: "Chile", flag: "🇨🇱" },
    Country { code: "CO", name: "Colombia", flag: "🇨🇴" },
    Country { code: "PE", name: "Peru", flag: "🇵🇪" },
    Country { code: "VE", name: "Venezuela", flag: "🇻🇪" },
    Country { code: "UA", name: "Ukraine", flag: "🇺🇦" },
    Country { code: "RO", name: "Romania", flag: "🇷🇴" },
    Country { code: "HU", name: "Hungary", flag: "🇭🇺" },
];

// Order matters: the first matching row wins.
const PATTERNS: &[(&str, &str)] = &[
    ("US", r"\b(USA?|United States|America|US)\b"),
    ("GB", r"\b(UK|United Kingdom|Britain|England|Scotland|Wales)\b"),
    ("CA", r"\b(Canada|Canadian)\b"),
    ("AU", r"\b(Australia|Australian)\b"),
    ("IN", r"\b(India|Indian)\b"),
    ("DE", r"\b(Germany|German|Deutschland)\b"),
    ("FR", r"\b(France|French)\b"),
    ("JP", r"\b(Japan|Japanese)\b"),
    ("BR", r"\b(Brazil|Brazilian)\b"),
    ("MX", r"\b(Mexico|Mexican)\b"),
    ("ES", r"\b(Spain|Spanish|España)\b"),
    ("IT", r"\b(Italy|Italian|Italia)\b"),
    ("RU", r"\b(Russia|Russian)\b"),
    ("CN", r"\b(China|Chinese)\b"),
    ("KR", r"\b(Korea|Korean)\b"),
    ("NL", r"\b(Netherlands|Dutch|Holland)\b"),
    ("SE", r"\b(Sweden|Swedish)\b"),
    ("PL", r"\b(Poland|Polish)\b"),
    ("TR", r"\b(Turkey|Turkish|Türkiye)\b"),
    ("AR", r"\b(Argentina|Argentine)\b"),
    ("BE", r"\b(Belgium|Belgian)\b"),
    ("CH", r"\b(Switzerland|Swiss)\b"),
    ("AT", r"\b(Austria|Austrian)\b"),
    ("NO", r"\b(Norway|Norwegian)\b"),
    ("DK", r"\b(Denmark|Danish)\b"),
    ("FI", r"\b(Finland|Finnish)\b"),
    ("PT", r"\b(Portugal|Portuguese)\b"),
    ("GR", r"\b(Greece|Greek)\b"),
    ("CZ", r"\b(Czech Republic|Czechia|Czech)\b"),
    ("IE", r"\b(Ireland|Irish)\b"),
    ("NZ", r"\b(New Zealand)\b"),
    ("SG", r"\b(Singapore|Singaporean)\b"),
    ("HK", r"\b(Hong Kong)\b"),
    ("ZA", r"\b(South Africa|South African)\b"),
    ("AE", r"\b(United Arab Emirates|UAE|Dubai|Abu Dhabi)\b"),
    ("SA", r"\b(Saudi Arabia|Saudi)\b"),
    ("IL", r"\b(Israel|Israeli)\b"),
    ("EG", r"\b(Egypt|Egyptian)\b"),
    ("NG", r"\b(Nigeria|Nigerian)\b"),
    ("ID", r"\b(Indonesia|Indonesian)\b"),
    ("TH", r"\b(Thailand|Thai)\b"),
    ("MY", r"\b(Malaysia|Malaysian)\b"),
    ("PH", r"\b(Philippines|Filipino)\b"),
    ("VN", r"\b(Vietnam|Viet Nam|Vietnamese)\b"),
    ("PK", r"\b(Pakistan|Pakistani)\b"),
    ("BD", r"\b(Bangladesh|Bangladeshi)\b"),
    ("CL", r"\b(Chile|Chilean)\b"),
    ("CO", r"\b(Colombia|Colombian)\b"),
    ("PE", r"\b(Peru|Peruvian)\b"),
    ("VE", r"\b(Venezuela|Venezuelan)\b"),
    ("UA", r"\b(Ukraine|Ukrainian)\b"),
    ("RO", r"\b(Romania|Romanian)\b"),
    ("HU", r"\b(Hungary|Hungarian)\b"),
];

fn compiled() -> &'static [(CountryCode, Regex)] {
    static TABLE: OnceLock<Vec<(CountryCode, Regex)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|(code, pattern)| match Regex::new(&format!("(?i){pattern}")) {
                Ok(re) => Some((CountryCode::from_static(code), re)),
                Err(e) => {
                    tracing::error!("Skipping invalid country pattern for {code}: {e}");
                    None
                }
            })
            .collect()
    })
}

/// Classify free-form location text. Returns the first matching country.
pub fn classify(location: &str) -> Option<CountryCode> {
    if location.trim().is_empty() {
        return None;
    }
    compiled()
        .iter()
        .find(|(_, re)| re.is_match(location))
        .map(|(code, _)| code.clone())
}

/// Look up a catalog entry by code (case-insensitive).
pub fn find_country(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.code.eq_ignore_ascii_case(code.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(text: &str) -> Option<String> {
        classify(text).map(|c| c.as_str().to_string())
    }

    #[test]
    fn test_known_locations() {
        assert_eq!(code("Lagos, Nigeria").as_deref(), Some("NG"));
        assert_eq!(code("Berlin, Deutschland").as_deref(), Some("DE"));
        assert_eq!(code("based in the UK").as_deref(), Some("GB"));
        assert_eq!(code("São Paulo, brazil").as_deref(), Some("BR"));
        assert_eq!(code("Cape Town, South Africa").as_deref(), Some("ZA"));
    }

    #[test]
    fn test_unknown_or_empty() {
        assert_eq!(code("Unknown"), None);
        assert_eq!(code(""), None);
        assert_eq!(code("   "), None);
        assert_eq!(code("the moon"), None);
    }

    #[test]
    fn test_word_boundaries() {
        // "Indiana" must not match India, "Indonesia" must not either.
        assert_eq!(code("Indianapolis, Indiana"), None);
        assert_eq!(code("Jakarta, Indonesia").as_deref(), Some("ID"));
    }

    #[test]
    fn test_first_match_wins() {
        assert_eq!(code("Canada / USA").as_deref(), Some("US"));
    }

    #[test]
    fn test_every_catalog_country_has_a_pattern() {
        for country in COUNTRIES {
            assert!(
                PATTERNS.iter().any(|(c, _)| *c == country.code),
                "no pattern for {}",
                country.code
            );
        }
        assert_eq!(compiled().len(), PATTERNS.len());
    }

    #[test]
    fn test_find_country() {
        assert_eq!(find_country("ng").unwrap().name, "Nigeria");
        assert!(find_country("XX").is_none());
    }
}
