use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A game as reported by the odds provider and mirrored in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    /// Provider event ID
    pub event_id: String,
    /// League identifier used for fetching, e.g. "NBA"
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    /// e.g. "Boston Celtics @ Los Angeles Lakers"
    pub display_name: String,
    pub status: GameStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub starts_at: Option<DateTime<Utc>>,
}

impl Game {
    /// Final home/away scores, only once the game is finished.
    pub fn final_scores(&self) -> Option<(i32, i32)> {
        if self.status != GameStatus::Finished {
            return None;
        }
        Some((self.home_score?, self.away_score?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    NotStarted,
    InProgress,
    HalfTime,
    Finished,
    Postponed,
}

impl GameStatus {
    /// Once a game has started its odds are closing-line data and must not move.
    pub fn has_started(self) -> bool {
        matches!(
            self,
            GameStatus::InProgress | GameStatus::HalfTime | GameStatus::Finished
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::NotStarted => "not_started",
            GameStatus::InProgress => "in_progress",
            GameStatus::HalfTime => "half_time",
            GameStatus::Finished => "finished",
            GameStatus::Postponed => "postponed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => GameStatus::InProgress,
            "half_time" => GameStatus::HalfTime,
            "finished" => GameStatus::Finished,
            "postponed" => GameStatus::Postponed,
            _ => GameStatus::NotStarted,
        }
    }
}

/// One bookmaker's contribution to a canonical row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookQuote {
    /// American odds, clamped to the storable range
    pub odds: Option<i32>,
    pub link: Option<String>,
}

/// Deduplicated (event, market, line) price record aggregating all bookmakers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsRow {
    pub event_id: String,
    /// Provider market identifier, e.g. "points-home-game-sp-home"
    pub odd_id: String,
    /// Reference line for the row; `None` for lineless markets (moneyline)
    pub line: Option<f64>,
    /// Whether this row was produced from a bookmaker's alternate line
    pub is_alternate: bool,
    /// "consensus" for reference rows, otherwise the first contributing bookmaker
    pub sportsbook_tag: String,
    pub market_name: String,
    pub bet_type_id: String,
    pub side_id: String,
    pub reference_price: Option<i32>,
    /// bookmaker key → price + deep-link
    pub books: BTreeMap<String, BookQuote>,
    /// Legacy encoding: combined total, or "home,away"
    pub score: Option<String>,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OddsRow {
    /// Text form of the line used in the unique identity.
    pub fn line_key(&self) -> String {
        line_key(self.line)
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some() || (self.home_score.is_some() && self.away_score.is_some())
    }
}

/// Canonical text for a line value. `None` maps to the empty string so that
/// lineless rows still collide on the unique index.
pub fn line_key(line: Option<f64>) -> String {
    match line {
        Some(l) if l == 0.0 => "0".to_string(),
        Some(l) => format!("{}", l),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Void,
    Cancelled,
}

impl BetStatus {
    pub fn is_terminal(self) -> bool {
        self != BetStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BetStatus::Pending => "pending",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::Void => "void",
            BetStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BetStatus::Pending),
            "won" => Some(BetStatus::Won),
            "lost" => Some(BetStatus::Lost),
            "void" | "push" => Some(BetStatus::Void),
            "cancelled" => Some(BetStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a wager (or a parlay leg) was placed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Provider event ID; may be missing for bets entered by hand
    pub game_id: Option<String>,
    pub sport: Option<String>,
    /// Odd ID of the canonical row that priced the bet; may be absent or stale
    pub market_reference: Option<String>,
    /// "moneyline" | "spread" | "total" (provider codes "ml", "sp", "ou" accepted)
    pub bet_type: String,
    /// "home" | "away" | "over" | "under"
    pub side: String,
    pub line_value: Option<f64>,
    /// Team the bettor picked, as recorded at placement
    pub team: Option<String>,
    pub description: Option<String>,
}

/// A wager. Singles carry their selection directly; parlays own ordered legs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Option<i64>,
    pub selection: Selection,
    pub stake: f64,
    pub american_odds: i32,
    pub status: BetStatus,
    /// Human-readable settlement reason
    pub result: Option<String>,
    pub profit: Option<f64>,
    pub potential_payout: f64,
    pub actual_payout: Option<f64>,
    pub placed_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub legs: Vec<BetLeg>,
}

impl Bet {
    pub fn is_parlay(&self) -> bool {
        !self.legs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetLeg {
    pub id: Option<i64>,
    pub bet_id: Option<i64>,
    /// Position within the parlay, starting at 0
    pub position: i32,
    pub selection: Selection,
    pub american_odds: i32,
    pub status: BetStatus,
    pub result: Option<String>,
}

/// Aggregate bet counters for the inspection API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    pub pending: i64,
    pub won: i64,
    pub lost: i64,
    pub void: i64,
    pub cancelled: i64,
    pub total_staked: f64,
    pub realized_profit: f64,
    pub odds_rows: i64,
    pub games: i64,
}
