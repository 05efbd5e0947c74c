use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::db::models::{Bet, BetLeg, BetStatus, Selection};
use crate::db::Database;
use crate::error::AppError;
use crate::settlement::applier::{potential_payout, profit_multiplier};
use crate::settlement::{RunSummary, SettlementJob};

const DEFAULT_BET_LIMIT: i64 = 100;
const MAX_BET_LIMIT: i64 = 1000;

pub struct AppState {
    pub db: Database,
    pub job: SettlementJob,
    /// Serializes settlement runs between the scheduler and HTTP callers
    pub run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(db: Database, job: SettlementJob) -> Self {
        AppState {
            db,
            job,
            run_lock: Mutex::new(()),
        }
    }

    pub async fn run_settlement(&self) -> anyhow::Result<RunSummary> {
        let _guard = self.run_lock.lock().await;
        self.job.run().await
    }
}

/// Build the Axum router for the job and inspection endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/settle", get(settle_handler).post(settle_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/bets", get(bets_handler).post(create_bet_handler))
        .route("/api/odds/:event_id", get(odds_handler))
        .route("/api/odds/:event_id/opening", get(opening_odds_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET|POST /api/settle
async fn settle_handler(State(state): State<Arc<AppState>>) -> Result<Json<RunSummary>, AppError> {
    let summary = state.run_settlement().await?;
    Ok(Json(summary))
}

/// GET /api/stats
async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.db.get_stats()?))
}

#[derive(Debug, Deserialize)]
struct BetsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

/// GET /api/bets?status=pending&limit=100
async fn bets_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<BetsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let status = match q.status.as_deref() {
        None | Some("") | Some("all") => None,
        Some(s) => Some(
            BetStatus::parse(s).ok_or_else(|| AppError::BadRequest(format!("unknown status '{}'", s)))?,
        ),
    };
    let limit = q.limit.unwrap_or(DEFAULT_BET_LIMIT).clamp(1, MAX_BET_LIMIT);
    Ok(Json(state.db.list_bets(status, limit)?))
}

/// GET /api/odds/:event_id
async fn odds_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state.db.odds_for_event(&event_id)?;
    if rows.is_empty() {
        return Err(AppError::NotFound(format!("no odds for event {}", event_id)));
    }
    Ok(Json(rows))
}

/// GET /api/odds/:event_id/opening
async fn opening_odds_handler(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state.db.opening_odds_for_event(&event_id)?;
    if rows.is_empty() {
        return Err(AppError::NotFound(format!("no opening odds for event {}", event_id)));
    }
    Ok(Json(rows))
}

/// POST /api/bets
async fn create_bet_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewBet>,
) -> Result<impl IntoResponse, AppError> {
    let bet = req.into_bet()?;
    let id = state.db.insert_bet(&bet)?;
    info!(
        "Bet {} placed: {} {} @ {} for {:.2}",
        id, bet.selection.bet_type, bet.selection.side, bet.american_odds, bet.stake
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "id": id, "potentialPayout": bet.potential_payout })),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSelection {
    game_id: Option<String>,
    sport: Option<String>,
    market_reference: Option<String>,
    #[serde(default)]
    bet_type: String,
    #[serde(default)]
    side: String,
    line_value: Option<f64>,
    team: Option<String>,
    description: Option<String>,
}

impl From<NewSelection> for Selection {
    fn from(s: NewSelection) -> Self {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Selection {
            game_id: blank_to_none(s.game_id),
            sport: blank_to_none(s.sport),
            market_reference: blank_to_none(s.market_reference),
            bet_type: s.bet_type.trim().to_lowercase(),
            side: s.side.trim().to_lowercase(),
            line_value: s.line_value,
            team: blank_to_none(s.team),
            description: blank_to_none(s.description),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewLeg {
    #[serde(flatten)]
    selection: NewSelection,
    american_odds: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewBet {
    #[serde(flatten)]
    selection: NewSelection,
    stake: f64,
    /// Required for singles; derived from the legs for parlays when absent
    american_odds: Option<i32>,
    #[serde(default)]
    legs: Vec<NewLeg>,
}

fn check_odds(odds: i32) -> Result<i32, AppError> {
    if odds.abs() < 100 {
        return Err(AppError::BadRequest(format!(
            "invalid American odds {} (must be <= -100 or >= +100)",
            odds
        )));
    }
    Ok(odds)
}

fn check_selection(s: &Selection) -> Result<(), AppError> {
    if s.bet_type.is_empty() || s.side.is_empty() {
        return Err(AppError::BadRequest("betType and side are required".into()));
    }
    Ok(())
}

/// Combined American price of independent legs.
fn parlay_american_odds(legs: &[i32]) -> i32 {
    let m = legs
        .iter()
        .map(|o| 1.0 + profit_multiplier(*o))
        .product::<f64>()
        - 1.0;
    if m >= 1.0 {
        (m * 100.0).round() as i32
    } else {
        (-100.0 / m).round() as i32
    }
}

impl NewBet {
    fn into_bet(self) -> Result<Bet, AppError> {
        if !self.stake.is_finite() || self.stake <= 0.0 {
            return Err(AppError::BadRequest("stake must be positive".into()));
        }

        let mut legs = Vec::with_capacity(self.legs.len());
        for (i, leg) in self.legs.into_iter().enumerate() {
            let selection: Selection = leg.selection.into();
            check_selection(&selection)?;
            legs.push(BetLeg {
                id: None,
                bet_id: None,
                position: i as i32,
                selection,
                american_odds: check_odds(leg.american_odds)?,
                status: BetStatus::Pending,
                result: None,
            });
        }
        if legs.len() == 1 {
            return Err(AppError::BadRequest("a parlay needs at least two legs".into()));
        }

        let mut selection: Selection = self.selection.into();
        let american_odds = if legs.is_empty() {
            check_selection(&selection)?;
            check_odds(
                self.american_odds
                    .ok_or_else(|| AppError::BadRequest("americanOdds is required".into()))?,
            )?
        } else {
            if selection.bet_type.is_empty() {
                selection.bet_type = "parlay".into();
                selection.side = "parlay".into();
            }
            let derived =
                parlay_american_odds(&legs.iter().map(|l| l.american_odds).collect::<Vec<_>>());
            check_odds(self.american_odds.unwrap_or(derived))?
        };

        Ok(Bet {
            id: None,
            selection,
            stake: self.stake,
            american_odds,
            status: BetStatus::Pending,
            result: None,
            profit: None,
            potential_payout: potential_payout(self.stake, american_odds),
            actual_payout: None,
            placed_at: Utc::now(),
            settled_at: None,
            legs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn parse(v: serde_json::Value) -> NewBet {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_single_bet_intake() {
        let bet = parse(json!({
            "gameId": "ev1", "marketReference": "points-home-game-sp-home",
            "betType": "Spread", "side": "HOME", "lineValue": -6.5,
            "stake": 110.0, "americanOdds": -110
        }))
        .into_bet()
        .unwrap();
        assert_eq!(bet.selection.bet_type, "spread");
        assert_eq!(bet.selection.side, "home");
        assert_eq!(bet.selection.game_id.as_deref(), Some("ev1"));
        assert_relative_eq!(bet.potential_payout, 210.0, epsilon = 1e-9);
        assert!(!bet.is_parlay());
    }

    #[test]
    fn test_intake_rejects_bad_input() {
        let bad = [
            json!({ "betType": "ml", "side": "home", "stake": 0.0, "americanOdds": -110 }),
            json!({ "betType": "ml", "side": "home", "stake": 10.0, "americanOdds": 50 }),
            json!({ "betType": "ml", "side": "home", "stake": 10.0 }),
            json!({ "side": "home", "stake": 10.0, "americanOdds": 120 }),
            json!({ "stake": 10.0, "legs": [{ "betType": "ml", "side": "home", "americanOdds": 120 }] }),
        ];
        for v in bad {
            assert!(matches!(parse(v).into_bet(), Err(AppError::BadRequest(_))));
        }
    }

    #[test]
    fn test_parlay_intake_derives_price() {
        let bet = parse(json!({
            "stake": 10.0,
            "legs": [
                { "gameId": "g1", "betType": "moneyline", "side": "home", "americanOdds": 100 },
                { "gameId": "g2", "betType": "moneyline", "side": "away", "americanOdds": 100 }
            ]
        }))
        .into_bet()
        .unwrap();
        assert!(bet.is_parlay());
        assert_eq!(bet.selection.bet_type, "parlay");
        assert_eq!(bet.american_odds, 300);
        assert_eq!(bet.legs[1].position, 1);
        assert_relative_eq!(bet.potential_payout, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parlay_american_odds_short_price() {
        // two -500 legs: 1.2 * 1.2 - 1 = 0.44 => -227
        assert_eq!(parlay_american_odds(&[-500, -500]), -227);
    }
}
