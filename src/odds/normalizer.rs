//! Parsing of the provider's per-event `odds` map.
//!
//! Each map entry is one (market, side) with a `byBookmaker` sub-map. The
//! payload is loosely typed: prices arrive as strings ("+150") or numbers,
//! fields come and go per sport. Everything downstream works on
//! [`NormalizedQuote`], whose [`MarketFamily`] is decided once here.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::bookmakers::canonical_bookmaker;

/// Largest absolute American price we store.
pub const MAX_AMERICAN_ODDS: i32 = 100_000;
pub const MAX_MARKET_NAME_LEN: usize = 255;
pub const MAX_ID_LEN: usize = 255;
pub const MAX_LINK_LEN: usize = 1024;

/// One entry of the provider's `odds` map, as received.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuote {
    #[serde(rename = "oddID")]
    pub odd_id: String,
    #[serde(default)]
    pub market_name: String,
    #[serde(rename = "betTypeID")]
    pub bet_type_id: String,
    #[serde(rename = "sideID")]
    pub side_id: String,
    #[serde(default)]
    pub book_odds: Option<Value>,
    #[serde(default)]
    pub book_spread: Option<Value>,
    #[serde(default)]
    pub book_over_under: Option<Value>,
    #[serde(default)]
    pub line: Option<Value>,
    /// Kept untyped so one malformed bookmaker cannot sink the whole quote.
    #[serde(default)]
    pub by_bookmaker: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBookmakerEntry {
    #[serde(default)]
    odds: Option<Value>,
    #[serde(default)]
    available: bool,
    #[serde(default)]
    deeplink: Option<String>,
    #[serde(default)]
    alt_lines: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAltLine {
    #[serde(default)]
    odds: Option<Value>,
    #[serde(default)]
    spread: Option<Value>,
    #[serde(default)]
    over_under: Option<Value>,
    #[serde(default)]
    available: Option<bool>,
}

/// Market-type family. Decides which line field is the reference line,
/// how final scores are encoded and how a bet on the market is graded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketFamily {
    Total,
    Spread,
    Moneyline,
    /// A recognised bet-type code outside the three graded families
    Other(String),
    /// Bet type and side disagree (e.g. a spread quoted on "over")
    Unclassified,
}

impl MarketFamily {
    /// Classify a bet-type string from either the provider or a bet record.
    pub fn from_bet_type(bet_type: &str) -> Self {
        match bet_type.trim().to_lowercase().as_str() {
            "ou" | "total" | "totals" | "over_under" | "over/under" => MarketFamily::Total,
            "sp" | "spread" | "spreads" | "point_spread" | "handicap" => MarketFamily::Spread,
            "ml" | "moneyline" | "money_line" | "h2h" => MarketFamily::Moneyline,
            "" => MarketFamily::Unclassified,
            other => MarketFamily::Other(other.to_string()),
        }
    }

    /// Classify a provider quote, checking the side is one the family allows.
    pub fn classify(bet_type_id: &str, side_id: &str) -> Self {
        let family = Self::from_bet_type(bet_type_id);
        let side = Side::parse(side_id);
        let consistent = match family {
            MarketFamily::Total => matches!(side, Side::Over | Side::Under),
            MarketFamily::Spread | MarketFamily::Moneyline => {
                matches!(side, Side::Home | Side::Away)
            }
            MarketFamily::Other(_) => !matches!(side, Side::Other(ref s) if s.is_empty()),
            MarketFamily::Unclassified => false,
        };
        if consistent {
            family
        } else {
            MarketFamily::Unclassified
        }
    }

    /// Lowercase fragments a market name of this family contains.
    pub fn market_name_hints(&self) -> &'static [&'static str] {
        match self {
            MarketFamily::Total => &["over/under", "total"],
            MarketFamily::Spread => &["spread", "handicap"],
            MarketFamily::Moneyline => &["moneyline", "money line"],
            MarketFamily::Other(_) | MarketFamily::Unclassified => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Side {
    Home,
    Away,
    Over,
    Under,
    Other(String),
}

impl Side {
    pub fn parse(side: &str) -> Self {
        match side.trim().to_lowercase().as_str() {
            "home" => Side::Home,
            "away" => Side::Away,
            "over" => Side::Over,
            "under" => Side::Under,
            other => Side::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AltLine {
    pub line: f64,
    pub odds: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub bookmaker: &'static str,
    pub odds: Option<i32>,
    pub available: bool,
    pub deeplink: Option<String>,
    pub alt_lines: Vec<AltLine>,
}

/// A provider quote flattened into bookmaker-indexed form.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedQuote {
    pub odd_id: String,
    pub market_name: String,
    pub bet_type_id: String,
    pub side_id: String,
    pub family: MarketFamily,
    pub reference_line: Option<f64>,
    pub reference_price: Option<i32>,
    pub books: Vec<BookEntry>,
    /// Bookmaker entries dropped as malformed or unknown
    pub skipped_books: usize,
}

/// Parse a whole `odds` map. Entries that do not deserialize are skipped.
pub fn normalize_odds_map(odds: &Value) -> Vec<NormalizedQuote> {
    let Some(map) = odds.as_object() else {
        return vec![];
    };
    map.iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<RawQuote>(raw.clone()) {
            Ok(quote) => Some(normalize(&quote)),
            Err(e) => {
                debug!("Skipping malformed quote {}: {}", key, e);
                None
            }
        })
        .filter(|q| !q.odd_id.is_empty())
        .collect()
}

pub fn normalize(raw: &RawQuote) -> NormalizedQuote {
    let family = MarketFamily::classify(&raw.bet_type_id, &raw.side_id);
    let reference_line = match family {
        MarketFamily::Spread => parse_number(raw.book_spread.as_ref())
            .or_else(|| parse_number(raw.line.as_ref())),
        MarketFamily::Total => parse_number(raw.book_over_under.as_ref())
            .or_else(|| parse_number(raw.line.as_ref())),
        MarketFamily::Moneyline => None,
        MarketFamily::Other(_) | MarketFamily::Unclassified => parse_number(raw.line.as_ref()),
    };

    let mut books = Vec::with_capacity(raw.by_bookmaker.len());
    let mut skipped_books = 0;
    for (key, value) in &raw.by_bookmaker {
        match parse_book_entry(key, value, &family) {
            Some(entry) => books.push(entry),
            None => skipped_books += 1,
        }
    }

    NormalizedQuote {
        odd_id: truncate(&raw.odd_id, MAX_ID_LEN),
        market_name: truncate(&raw.market_name, MAX_MARKET_NAME_LEN),
        bet_type_id: truncate(&raw.bet_type_id, MAX_ID_LEN),
        side_id: truncate(&raw.side_id, MAX_ID_LEN),
        family,
        reference_line,
        reference_price: parse_american_odds(raw.book_odds.as_ref()),
        books,
        skipped_books,
    }
}

fn parse_book_entry(key: &str, value: &Value, family: &MarketFamily) -> Option<BookEntry> {
    let bookmaker = canonical_bookmaker(key)?;
    let entry: RawBookmakerEntry = match serde_json::from_value(value.clone()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Skipping malformed bookmaker entry {}: {}", key, e);
            return None;
        }
    };
    let alt_lines = entry
        .alt_lines
        .iter()
        .filter_map(|alt| parse_alt_line(alt, family))
        .collect();
    Some(BookEntry {
        bookmaker,
        odds: parse_american_odds(entry.odds.as_ref()),
        available: entry.available,
        deeplink: entry
            .deeplink
            .filter(|l| !l.trim().is_empty())
            .map(|l| truncate(&l, MAX_LINK_LEN)),
        alt_lines,
    })
}

/// Alternate lines explicitly marked unavailable, or without a usable line
/// value, are dropped.
fn parse_alt_line(value: &Value, family: &MarketFamily) -> Option<AltLine> {
    let alt: RawAltLine = serde_json::from_value(value.clone()).ok()?;
    if alt.available == Some(false) {
        return None;
    }
    let line = match family {
        MarketFamily::Total => parse_number(alt.over_under.as_ref()),
        MarketFamily::Spread => parse_number(alt.spread.as_ref()),
        _ => parse_number(alt.spread.as_ref()).or_else(|| parse_number(alt.over_under.as_ref())),
    }?;
    Some(AltLine {
        line,
        odds: parse_american_odds(alt.odds.as_ref()),
    })
}

/// Numbers arrive either as JSON numbers or as strings like "+6.5".
pub fn parse_number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_start_matches('+').parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse an American price, clamped to ±[`MAX_AMERICAN_ODDS`].
///
/// Non-numeric values, zero, and values that do not fit an `i32` map to
/// `None` so the row is still stored with a null price.
pub fn parse_american_odds(value: Option<&Value>) -> Option<i32> {
    let n = parse_number(value)?.round();
    if n == 0.0 || n.abs() > i32::MAX as f64 {
        return None;
    }
    Some((n as i32).clamp(-MAX_AMERICAN_ODDS, MAX_AMERICAN_ODDS))
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
