use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::db::models::Game;
use crate::db::Database;
use crate::odds::MarketFamily;

/// Legacy score text for a row of the given market family.
///
/// Totals carry the combined score; moneyline and spread rows carry
/// "home,away"; anything else defaults to the combined score.
pub fn score_text(family: &MarketFamily, home: i32, away: i32) -> String {
    match family {
        MarketFamily::Spread | MarketFamily::Moneyline => format!("{},{}", home, away),
        _ => (home + away).to_string(),
    }
}

/// Write final scores onto every unscored current odds row of a finished game.
///
/// Rows that already carry a score are never touched, so running this twice
/// is a no-op. Returns the number of rows updated.
pub fn annotate_scores(db: &Database, game: &Game) -> Result<usize> {
    let Some((home, away)) = game.final_scores() else {
        debug!("Game {} has no final score yet", game.event_id);
        return Ok(0);
    };

    let rows = db
        .unscored_odds_for_event(&game.event_id)
        .with_context(|| format!("loading unscored odds for game {}", game.event_id))?;

    if rows.is_empty() {
        // Diagnostic only: explain why nothing was annotated.
        let all = db.odds_for_event(&game.event_id)?;
        let scored = all.iter().filter(|r| r.is_scored()).count();
        debug!(
            "Game {}: no unscored odds rows ({} rows on event, {} already scored)",
            game.event_id,
            all.len(),
            scored
        );
        return Ok(0);
    }

    let mut updated = 0;
    for row in &rows {
        let family = MarketFamily::from_bet_type(&row.bet_type_id);
        let text = score_text(&family, home, away);
        match db.set_odds_score(row, &text, home, away) {
            Ok(true) => updated += 1,
            Ok(false) => {}
            Err(e) => warn!(
                "Failed to score odds row {}/{} ({}): {:#}",
                row.event_id,
                row.odd_id,
                row.line_key(),
                e
            ),
        }
    }

    info!(
        "Game {} ({}) final {}-{}: scored {} odds rows",
        game.event_id, game.display_name, home, away, updated
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::GameStatus;
    use crate::odds::{consolidate, normalize_odds_map, OddsWriter};
    use chrono::Utc;
    use serde_json::json;

    fn game(status: GameStatus) -> Game {
        Game {
            event_id: "ev1".into(),
            sport: "NBA".into(),
            home_team: "Los Angeles Lakers".into(),
            away_team: "Boston Celtics".into(),
            display_name: "Boston Celtics @ Los Angeles Lakers".into(),
            status,
            home_score: Some(110),
            away_score: Some(100),
            starts_at: None,
        }
    }

    fn seed(db: &Database) {
        let odds = json!({
            "a": { "oddID": "points-home-game-ml-home", "marketName": "Moneyline",
                   "betTypeID": "ml", "sideID": "home", "bookOdds": "-200", "byBookmaker": {} },
            "b": { "oddID": "points-all-game-ou-over", "marketName": "Over/Under",
                   "betTypeID": "ou", "sideID": "over", "bookOverUnder": "215.5", "byBookmaker": {} },
            "c": { "oddID": "points-home-game-sp-home", "marketName": "Point Spread",
                   "betTypeID": "sp", "sideID": "home", "bookSpread": "-6.5", "byBookmaker": {} },
            "d": { "oddID": "rebounds-home-game-yn-yes", "marketName": "Prop",
                   "betTypeID": "yn", "sideID": "yes", "byBookmaker": {} }
        });
        let rows = consolidate("ev1", &normalize_odds_map(&odds), Utc::now()).rows;
        OddsWriter::new(db.clone(), 100).write(&rows);
    }

    #[test]
    fn test_score_text_by_family() {
        assert_eq!(score_text(&MarketFamily::Total, 110, 100), "210");
        assert_eq!(score_text(&MarketFamily::Spread, 110, 100), "110,100");
        assert_eq!(score_text(&MarketFamily::Moneyline, 110, 100), "110,100");
        assert_eq!(score_text(&MarketFamily::Other("yn".into()), 110, 100), "210");
    }

    #[test]
    fn test_annotate_scores_each_row_once() {
        let db = Database::open(":memory:").unwrap();
        seed(&db);
        let g = game(GameStatus::Finished);
        assert_eq!(annotate_scores(&db, &g).unwrap(), 4);
        assert_eq!(annotate_scores(&db, &g).unwrap(), 0);

        let rows = db.odds_for_event("ev1").unwrap();
        let by_odd = |id: &str| rows.iter().find(|r| r.odd_id == id).unwrap();
        assert_eq!(by_odd("points-home-game-ml-home").score.as_deref(), Some("110,100"));
        assert_eq!(by_odd("points-all-game-ou-over").score.as_deref(), Some("210"));
        assert_eq!(by_odd("rebounds-home-game-yn-yes").score.as_deref(), Some("210"));
        assert!(rows.iter().all(|r| r.home_score == Some(110) && r.away_score == Some(100)));
    }

    #[test]
    fn test_unfinished_game_is_not_annotated() {
        let db = Database::open(":memory:").unwrap();
        seed(&db);
        assert_eq!(annotate_scores(&db, &game(GameStatus::InProgress)).unwrap(), 0);
        assert!(db.odds_for_event("ev1").unwrap().iter().all(|r| !r.is_scored()));
    }
}
