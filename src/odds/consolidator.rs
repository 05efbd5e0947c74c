//! Merge per-bookmaker quotes into canonical `(event, odd, line)` rows.
//!
//! One provider quote yields a reference row keyed on its reference line,
//! plus one extra row per distinct alternate line any bookmaker reports.
//! Rows are built in a single pass with get-or-create semantics, so a key
//! seen twice in a batch always lands on the same row.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::db::models::{line_key, BookQuote, OddsRow};

use super::normalizer::NormalizedQuote;

pub const CONSENSUS_TAG: &str = "consensus";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationStats {
    pub input_quotes: usize,
    /// Bookmaker price contributions seen, alternates included
    pub contributions: usize,
    pub output_rows: usize,
    pub alternate_rows: usize,
    pub skipped_entries: usize,
}

impl ConsolidationStats {
    /// How much merging shrank the contributions, in percent.
    pub fn reduction_pct(&self) -> f64 {
        if self.contributions == 0 {
            return 0.0;
        }
        let ratio = self.output_rows as f64 / self.contributions as f64;
        ((1.0 - ratio) * 100.0).max(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct Consolidation {
    pub rows: Vec<OddsRow>,
    pub stats: ConsolidationStats,
}

struct Builder<'a> {
    event_id: &'a str,
    fetched_at: DateTime<Utc>,
    rows: Vec<OddsRow>,
    index: HashMap<(String, String), usize>,
}

impl<'a> Builder<'a> {
    /// Find the row for `(odd_id, line)` or create it. New rows get a
    /// timestamp one millisecond after the previous one so that no two rows
    /// of a batch share a creation instant.
    fn get_or_create(
        &mut self,
        quote: &NormalizedQuote,
        line: Option<f64>,
        alternate_of: Option<&str>,
    ) -> &mut OddsRow {
        let key = (quote.odd_id.clone(), line_key(line));
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let stamp = self.fetched_at + Duration::milliseconds(self.rows.len() as i64);
                self.rows.push(OddsRow {
                    event_id: self.event_id.to_string(),
                    odd_id: quote.odd_id.clone(),
                    line,
                    is_alternate: alternate_of.is_some(),
                    sportsbook_tag: alternate_of.unwrap_or(CONSENSUS_TAG).to_string(),
                    market_name: quote.market_name.clone(),
                    bet_type_id: quote.bet_type_id.clone(),
                    side_id: quote.side_id.clone(),
                    reference_price: if alternate_of.is_some() {
                        None
                    } else {
                        quote.reference_price
                    },
                    books: BTreeMap::new(),
                    score: None,
                    home_score: None,
                    away_score: None,
                    fetched_at: self.fetched_at,
                    created_at: stamp,
                    updated_at: stamp,
                });
                self.index.insert(key, self.rows.len() - 1);
                self.rows.len() - 1
            }
        };
        &mut self.rows[idx]
    }
}

/// Consolidate one event's quotes into canonical rows.
pub fn consolidate(
    event_id: &str,
    quotes: &[NormalizedQuote],
    fetched_at: DateTime<Utc>,
) -> Consolidation {
    let mut builder = Builder {
        event_id,
        fetched_at,
        rows: Vec::new(),
        index: HashMap::new(),
    };
    let mut stats = ConsolidationStats {
        input_quotes: quotes.len(),
        ..Default::default()
    };

    for quote in quotes {
        stats.skipped_entries += quote.skipped_books;

        let row = builder.get_or_create(quote, quote.reference_line, None);
        for book in quote.books.iter().filter(|b| b.available) {
            if book.odds.is_none() && book.deeplink.is_none() {
                stats.skipped_entries += 1;
                continue;
            }
            stats.contributions += 1;
            row.books.insert(
                book.bookmaker.to_string(),
                BookQuote {
                    odds: book.odds,
                    link: book.deeplink.clone(),
                },
            );
        }

        for book in &quote.books {
            for alt in &book.alt_lines {
                stats.contributions += 1;
                let alt_row = builder.get_or_create(quote, Some(alt.line), Some(book.bookmaker));
                // Alternate entries carry no deep-link; keep one the book
                // already gave this row.
                alt_row
                    .books
                    .entry(book.bookmaker.to_string())
                    .or_default()
                    .odds = alt.odds;
            }
        }
    }

    let rows = builder.rows;
    stats.output_rows = rows.len();
    stats.alternate_rows = rows.iter().filter(|r| r.is_alternate).count();
    Consolidation { rows, stats }
}
