//! Catalogue of sportsbooks that get dedicated price/link columns.
//!
//! Every canonical odds row carries one `<book>_odds` / `<book>_link` column
//! pair per entry below. Bookmakers the provider reports that are not listed
//! here are dropped during consolidation.

/// Bookmaker keys as they appear in the provider's `byBookmaker` map.
pub const KNOWN_BOOKMAKERS: &[&str] = &[
    "draftkings",
    "fanduel",
    "betmgm",
    "caesars",
    "espnbet",
    "fanatics",
    "bet365",
    "betrivers",
    "hardrockbet",
    "pinnacle",
    "bovada",
    "betonline",
];

/// Map a raw provider bookmaker key onto a catalogue entry.
///
/// Provider keys are matched case-insensitively and ignoring punctuation,
/// so "DraftKings", "draft_kings" and "draftkings" all resolve.
pub fn canonical_bookmaker(raw: &str) -> Option<&'static str> {
    let folded: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    KNOWN_BOOKMAKERS.iter().copied().find(|b| *b == folded)
}

pub fn odds_column(book: &str) -> String {
    format!("{}_odds", book)
}

pub fn link_column(book: &str) -> String {
    format!("{}_link", book)
}
