//! Grading of a single selection against a scored odds row.
//!
//! Grading is conservative: anything the rules below do not cover returns
//! `Pending` with a reason, never a guessed result.

use serde::Serialize;
use std::cmp::Ordering;

use crate::db::models::{BetStatus, OddsRow, Selection};
use crate::odds::{MarketFamily, Side};

/// Result of grading one selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub status: BetStatus,
    pub reason: String,
}

impl Outcome {
    fn new(status: BetStatus, reason: impl Into<String>) -> Self {
        Outcome {
            status,
            reason: reason.into(),
        }
    }

    fn pending(reason: impl Into<String>) -> Self {
        Self::new(BetStatus::Pending, reason)
    }
}

/// Final score as recorded on an odds row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FinalScore {
    /// Only the combined points are known
    Total(f64),
    Pair { home: i32, away: i32 },
}

impl FinalScore {
    /// Prefer the explicit home/away columns; fall back to the legacy text
    /// encoding ("215" or "110,100").
    pub fn from_row(row: &OddsRow) -> Option<Self> {
        if let (Some(home), Some(away)) = (row.home_score, row.away_score) {
            return Some(FinalScore::Pair { home, away });
        }
        row.score.as_deref().and_then(Self::parse)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some((home, away)) = s.split_once(',') {
            let home = home.trim().parse().ok()?;
            let away = away.trim().parse().ok()?;
            return Some(FinalScore::Pair { home, away });
        }
        s.parse::<f64>()
            .ok()
            .filter(|t| t.is_finite())
            .map(FinalScore::Total)
    }

    pub fn total(&self) -> f64 {
        match *self {
            FinalScore::Total(t) => t,
            FinalScore::Pair { home, away } => f64::from(home + away),
        }
    }

    pub fn pair(&self) -> Option<(i32, i32)> {
        match *self {
            FinalScore::Pair { home, away } => Some((home, away)),
            FinalScore::Total(_) => None,
        }
    }
}

/// Grade `selection` using the final score on `row`.
///
/// The selection's own line wins over the row's line. Exact pushes on every
/// market settle as `Void`.
pub fn evaluate(selection: &Selection, row: &OddsRow) -> Outcome {
    let family = if selection.bet_type.trim().is_empty() {
        MarketFamily::from_bet_type(&row.bet_type_id)
    } else {
        MarketFamily::from_bet_type(&selection.bet_type)
    };
    let side = Side::parse(&selection.side);
    let line = selection.line_value.or(row.line);

    let Some(score) = FinalScore::from_row(row) else {
        return Outcome::pending("no final score on odds row");
    };

    match family {
        MarketFamily::Total => {
            let Some(line) = line else {
                return Outcome::pending("total bet without a line");
            };
            let total = score.total();
            let status = match side {
                Side::Over | Side::Under if total == line => BetStatus::Void,
                Side::Over if total > line => BetStatus::Won,
                Side::Under if total < line => BetStatus::Won,
                Side::Over | Side::Under => BetStatus::Lost,
                other => {
                    return Outcome::pending(format!("unsupported side {:?} for total", other))
                }
            };
            Outcome::new(status, format!("total {} vs line {}", total, line))
        }
        MarketFamily::Spread => {
            let Some((home, away)) = score.pair() else {
                return Outcome::pending("spread bet needs home/away scores");
            };
            let Some(line) = line else {
                return Outcome::pending("spread bet without a line");
            };
            // Lines are expressed from the home team's perspective.
            let (adjusted, opponent) = match side {
                Side::Home => (f64::from(home) + line, f64::from(away)),
                Side::Away => (f64::from(away) - line, f64::from(home)),
                other => {
                    return Outcome::pending(format!("unsupported side {:?} for spread", other))
                }
            };
            let status = match adjusted.partial_cmp(&opponent).unwrap_or(Ordering::Equal) {
                Ordering::Greater => BetStatus::Won,
                Ordering::Less => BetStatus::Lost,
                Ordering::Equal => BetStatus::Void,
            };
            Outcome::new(
                status,
                format!("final {}-{} (home-away), line {}", home, away, line),
            )
        }
        MarketFamily::Moneyline => {
            let Some((home, away)) = score.pair() else {
                return Outcome::pending("moneyline bet needs home/away scores");
            };
            let (mine, theirs) = match side {
                Side::Home => (home, away),
                Side::Away => (away, home),
                other => {
                    return Outcome::pending(format!("unsupported side {:?} for moneyline", other))
                }
            };
            let status = match mine.cmp(&theirs) {
                Ordering::Greater => BetStatus::Won,
                Ordering::Less => BetStatus::Lost,
                Ordering::Equal => BetStatus::Void,
            };
            Outcome::new(status, format!("final {}-{} (home-away)", home, away))
        }
        MarketFamily::Other(kind) => Outcome::pending(format!("unsupported bet type '{}'", kind)),
        MarketFamily::Unclassified => Outcome::pending("unclassified bet type"),
    }
}

/// Combine parlay leg results into the parent status.
///
/// Any lost leg loses the parlay; any pending leg keeps it pending; a parlay
/// whose legs all pushed is void; otherwise it is won (pushed legs drop out
/// of the payout).
pub fn aggregate_parlay(legs: &[BetStatus]) -> BetStatus {
    if legs.is_empty() {
        return BetStatus::Pending;
    }
    if legs.contains(&BetStatus::Lost) {
        return BetStatus::Lost;
    }
    if legs.contains(&BetStatus::Pending) {
        return BetStatus::Pending;
    }
    if legs
        .iter()
        .all(|s| matches!(s, BetStatus::Void | BetStatus::Cancelled))
    {
        return BetStatus::Void;
    }
    BetStatus::Won
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn row(bet_type_id: &str, line: Option<f64>, score: Option<&str>) -> OddsRow {
        let now = Utc::now();
        OddsRow {
            event_id: "ev1".into(),
            odd_id: "odd".into(),
            line,
            is_alternate: false,
            sportsbook_tag: "consensus".into(),
            market_name: "Market".into(),
            bet_type_id: bet_type_id.into(),
            side_id: "home".into(),
            reference_price: None,
            books: BTreeMap::new(),
            score: score.map(str::to_string),
            home_score: None,
            away_score: None,
            fetched_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn sel(bet_type: &str, side: &str, line: Option<f64>) -> Selection {
        Selection {
            bet_type: bet_type.into(),
            side: side.into(),
            line_value: line,
            ..Default::default()
        }
    }

    #[test]
    fn test_spread_home_cover() {
        let r = row("sp", Some(-6.5), Some("110,100"));
        let out = evaluate(&sel("spread", "home", Some(-6.5)), &r);
        assert_eq!(out.status, BetStatus::Won);
    }

    #[test]
    fn test_spread_home_fails_to_cover() {
        let r = row("sp", Some(-12.5), Some("110,100"));
        assert_eq!(evaluate(&sel("spread", "home", None), &r).status, BetStatus::Lost);
    }

    #[test]
    fn test_spread_away_uses_home_perspective_line() {
        // away 100 - (-12.5) = 112.5 > 110
        let r = row("sp", Some(-12.5), Some("110,100"));
        assert_eq!(evaluate(&sel("spread", "away", None), &r).status, BetStatus::Won);
    }

    #[test]
    fn test_spread_exact_cover_is_void() {
        let r = row("sp", Some(-10.0), Some("110,100"));
        assert_eq!(evaluate(&sel("spread", "home", None), &r).status, BetStatus::Void);
    }

    #[test]
    fn test_moneyline_away_loss() {
        let r = row("ml", None, Some("98,95"));
        assert_eq!(evaluate(&sel("moneyline", "away", None), &r).status, BetStatus::Lost);
        assert_eq!(evaluate(&sel("moneyline", "home", None), &r).status, BetStatus::Won);
    }

    #[test]
    fn test_moneyline_tie_is_void() {
        let r = row("ml", None, Some("2,2"));
        assert_eq!(evaluate(&sel("ml", "home", None), &r).status, BetStatus::Void);
    }

    #[test]
    fn test_total_over_under_and_push() {
        let r = row("ou", Some(215.5), Some("215"));
        assert_eq!(evaluate(&sel("total", "over", None), &r).status, BetStatus::Lost);
        assert_eq!(evaluate(&sel("total", "under", None), &r).status, BetStatus::Won);

        let push = row("ou", Some(215.0), Some("215"));
        assert_eq!(evaluate(&sel("total", "over", None), &push).status, BetStatus::Void);
        assert_eq!(evaluate(&sel("total", "under", None), &push).status, BetStatus::Void);
    }

    #[test]
    fn test_total_from_pair_encoding() {
        let r = row("ou", Some(200.5), Some("110,100"));
        assert_eq!(evaluate(&sel("ou", "over", None), &r).status, BetStatus::Won);
    }

    #[test]
    fn test_bet_line_takes_precedence() {
        let r = row("ou", Some(215.5), Some("215"));
        assert_eq!(
            evaluate(&sel("total", "over", Some(210.5)), &r).status,
            BetStatus::Won
        );
    }

    #[test]
    fn test_unknown_side_or_type_stays_pending() {
        let r = row("ou", Some(215.5), Some("215"));
        assert_eq!(evaluate(&sel("total", "home", None), &r).status, BetStatus::Pending);
        let r = row("prop", None, Some("110,100"));
        assert_eq!(evaluate(&sel("player_points", "over", None), &r).status, BetStatus::Pending);
        let r = row("sp", Some(-3.5), Some("110,100"));
        assert_eq!(evaluate(&sel("spread", "draw", None), &r).status, BetStatus::Pending);
    }

    #[test]
    fn test_unscored_row_stays_pending() {
        let r = row("ml", None, None);
        assert_eq!(evaluate(&sel("moneyline", "home", None), &r).status, BetStatus::Pending);
    }

    #[test]
    fn test_spread_needs_pair() {
        let r = row("sp", Some(-3.5), Some("210"));
        assert_eq!(evaluate(&sel("spread", "home", None), &r).status, BetStatus::Pending);
    }

    #[test]
    fn test_explicit_columns_win_over_text() {
        let mut r = row("ml", None, Some("215"));
        r.home_score = Some(100);
        r.away_score = Some(115);
        assert_eq!(evaluate(&sel("moneyline", "away", None), &r).status, BetStatus::Won);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let r = row("sp", Some(-6.5), Some("110,100"));
        let s = sel("spread", "home", None);
        assert_eq!(evaluate(&s, &r), evaluate(&s, &r));
    }

    #[test]
    fn test_final_score_parse() {
        assert_eq!(FinalScore::parse("215"), Some(FinalScore::Total(215.0)));
        assert_eq!(
            FinalScore::parse(" 110 , 100 "),
            Some(FinalScore::Pair { home: 110, away: 100 })
        );
        assert_eq!(FinalScore::parse("a,b"), None);
        assert_eq!(FinalScore::parse(""), None);
    }

    #[test]
    fn test_aggregate_parlay() {
        use BetStatus::*;
        assert_eq!(aggregate_parlay(&[Won, Won]), Won);
        assert_eq!(aggregate_parlay(&[Won, Lost, Pending]), Lost);
        assert_eq!(aggregate_parlay(&[Won, Pending]), Pending);
        assert_eq!(aggregate_parlay(&[Void, Void]), Void);
        assert_eq!(aggregate_parlay(&[Won, Void]), Won);
        assert_eq!(aggregate_parlay(&[]), Pending);
    }
}
