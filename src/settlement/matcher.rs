//! Locate the canonical odds row that prices a selection.
//!
//! Matching is an ordered list of strategies. Each one is a plain function
//! over the selection and a preloaded [`MatchContext`]; the first hit wins.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::db::models::{Game, OddsRow, Selection};
use crate::db::Database;
use crate::odds::{MarketFamily, Side};

/// Shortest team name we try to match by substring.
const MIN_TEAM_NAME_LEN: usize = 3;

/// How long before placement a game may have started and still be the one
/// a bet was placed on (live betting).
const LIVE_BET_WINDOW_HOURS: i64 = 12;

/// Store data a selection is matched against.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub event_id: Option<String>,
    /// Current rows of `event_id`
    pub event_rows: Vec<OddsRow>,
    /// Games searched by team name, finished games first. Games that
    /// started well before the bet was placed are left out.
    pub candidates: Vec<(Game, Vec<OddsRow>)>,
}

impl MatchContext {
    /// Load what the strategies need. The candidate set for the team-name
    /// search is only built for selections without a market reference.
    pub fn load(
        db: &Database,
        selection: &Selection,
        event_id: Option<&str>,
        placed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let event_id = event_id
            .or(selection.game_id.as_deref())
            .map(str::to_string);

        let event_rows = match &event_id {
            Some(id) => db.odds_for_event(id)?,
            None => Vec::new(),
        };

        let mut candidates = Vec::new();
        if selection.market_reference.is_none() {
            let event_game = match &event_id {
                Some(id) => db.get_game(id)?,
                None => None,
            };
            let sport = selection
                .sport
                .clone()
                .or_else(|| event_game.as_ref().map(|g| g.sport.clone()));
            if let Some(sport) = sport {
                for game in db.games_for_sport(&sport)? {
                    if !could_follow_placement(&game, placed_at) {
                        continue;
                    }
                    let rows = db.odds_for_event(&game.event_id)?;
                    candidates.push((game, rows));
                }
            }
        }

        Ok(MatchContext {
            event_id,
            event_rows,
            candidates,
        })
    }
}

/// A game that started more than the live window before placement cannot
/// be the game the bet was placed on. Games without a start time stay in.
fn could_follow_placement(game: &Game, placed_at: DateTime<Utc>) -> bool {
    let earliest = placed_at - Duration::hours(LIVE_BET_WINDOW_HOURS);
    game.starts_at.map_or(true, |start| start >= earliest)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchHit {
    pub row: OddsRow,
    pub strategy: &'static str,
    /// Set when the row was found on an event the selection did not name
    pub discovered_event: Option<String>,
}

pub type Strategy = fn(&Selection, &MatchContext) -> Option<MatchHit>;

/// Strategies in the order they are tried.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("exact", exact_key),
    ("market_type", market_type),
    ("team_name", team_name),
];

pub fn find_match(selection: &Selection, ctx: &MatchContext) -> Option<MatchHit> {
    STRATEGIES.iter().find_map(|(name, strategy)| {
        let hit = strategy(selection, ctx);
        if hit.is_some() {
            debug!("Selection matched by {} strategy", name);
        }
        hit
    })
}

/// Load the context and run the strategies.
pub fn match_selection(
    db: &Database,
    selection: &Selection,
    event_id: Option<&str>,
    placed_at: DateTime<Utc>,
) -> Result<Option<MatchHit>> {
    let ctx = MatchContext::load(db, selection, event_id, placed_at)?;
    let hit = find_match(selection, &ctx);
    if hit.is_none() {
        debug!(
            "No odds row for {} {} on event {:?} ({} rows, {} candidate games)",
            selection.bet_type,
            selection.side,
            ctx.event_id,
            ctx.event_rows.len(),
            ctx.candidates.len()
        );
    }
    Ok(hit)
}

/// Row with the selection's market reference on its own event.
pub fn exact_key(selection: &Selection, ctx: &MatchContext) -> Option<MatchHit> {
    let reference = selection.market_reference.as_deref()?;
    let rows: Vec<&OddsRow> = ctx
        .event_rows
        .iter()
        .filter(|r| r.odd_id == reference)
        .collect();
    let row = pick_line(&rows, selection.line_value)?;
    Some(MatchHit {
        row: row.clone(),
        strategy: "exact",
        discovered_event: None,
    })
}

/// First row of the event on the selection's side whose market name
/// mentions the bet type. Rows of the other side are never borrowed.
pub fn market_type(selection: &Selection, ctx: &MatchContext) -> Option<MatchHit> {
    let hints = MarketFamily::from_bet_type(&selection.bet_type).market_name_hints();
    if hints.is_empty() {
        return None;
    }
    let side = Side::parse(&selection.side);
    let rows: Vec<&OddsRow> = ctx
        .event_rows
        .iter()
        .filter(|r| Side::parse(&r.side_id) == side)
        .filter(|r| {
            let name = r.market_name.to_lowercase();
            hints.iter().any(|h| name.contains(h))
        })
        .collect();
    let row = pick_line(&rows, selection.line_value)?;
    Some(MatchHit {
        row: row.clone(),
        strategy: "market_type",
        discovered_event: None,
    })
}

/// Same-sport search by the team the bettor recorded. Only used when the
/// selection has no market reference at all.
pub fn team_name(selection: &Selection, ctx: &MatchContext) -> Option<MatchHit> {
    if selection.market_reference.is_some() {
        return None;
    }
    let haystacks: Vec<String> = [selection.team.as_deref(), selection.description.as_deref()]
        .into_iter()
        .flatten()
        .map(normalize_text)
        .filter(|t| t.len() >= MIN_TEAM_NAME_LEN)
        .collect();
    if haystacks.is_empty() {
        return None;
    }

    let family = MarketFamily::from_bet_type(&selection.bet_type);
    for (game, rows) in &ctx.candidates {
        let Some(matched_side) = team_side(game, &haystacks) else {
            continue;
        };
        let side = match Side::parse(&selection.side) {
            Side::Other(_) => matched_side,
            explicit => explicit,
        };
        let same_market: Vec<&OddsRow> = rows
            .iter()
            .filter(|r| MarketFamily::from_bet_type(&r.bet_type_id) == family)
            .filter(|r| Side::parse(&r.side_id) == side)
            .collect();
        if let Some(row) = pick_line(&same_market, selection.line_value) {
            return Some(MatchHit {
                row: row.clone(),
                strategy: "team_name",
                discovered_event: Some(game.event_id.clone()),
            });
        }
    }
    None
}

/// Which side of `game` the recorded text names. Either string may contain
/// the other, so "Lakers" and "Los Angeles Lakers ML" both hit.
fn team_side(game: &Game, haystacks: &[String]) -> Option<Side> {
    let named = |name: &str| {
        let name = normalize_text(name);
        name.len() >= MIN_TEAM_NAME_LEN
            && haystacks
                .iter()
                .any(|h| h.contains(&name) || name.contains(h.as_str()))
    };
    if named(&game.home_team) {
        Some(Side::Home)
    } else if named(&game.away_team) {
        Some(Side::Away)
    } else if named(&game.display_name) {
        Some(Side::Other(String::new()))
    } else {
        None
    }
}

/// Prefer the row on the selection's line, then the reference row.
fn pick_line<'a>(rows: &[&'a OddsRow], line: Option<f64>) -> Option<&'a OddsRow> {
    if let Some(line) = line {
        if let Some(row) = rows.iter().find(|r| r.line == Some(line)) {
            return Some(*row);
        }
    }
    rows.iter()
        .find(|r| !r.is_alternate)
        .or_else(|| rows.first())
        .copied()
}

fn normalize_text(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::GameStatus;
    use std::collections::BTreeMap;

    fn row(
        event: &str,
        odd_id: &str,
        market: &str,
        bet_type: &str,
        side: &str,
        line: Option<f64>,
    ) -> OddsRow {
        let now = Utc::now();
        OddsRow {
            event_id: event.into(),
            odd_id: odd_id.into(),
            line,
            is_alternate: false,
            sportsbook_tag: "consensus".into(),
            market_name: market.into(),
            bet_type_id: bet_type.into(),
            side_id: side.into(),
            reference_price: Some(-110),
            books: BTreeMap::new(),
            score: None,
            home_score: None,
            away_score: None,
            fetched_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn game(event: &str, home: &str, away: &str) -> Game {
        Game {
            event_id: event.into(),
            sport: "NBA".into(),
            home_team: home.into(),
            away_team: away.into(),
            display_name: format!("{} @ {}", away, home),
            status: GameStatus::Finished,
            home_score: Some(110),
            away_score: Some(100),
            starts_at: None,
        }
    }

    fn event_rows() -> Vec<OddsRow> {
        vec![
            row("ev1", "points-home-game-ml-home", "Moneyline", "ml", "home", None),
            row("ev1", "points-home-game-sp-home", "Point Spread", "sp", "home", Some(-6.5)),
            row("ev1", "points-all-game-ou-over", "Over/Under", "ou", "over", Some(215.5)),
        ]
    }

    fn ctx() -> MatchContext {
        MatchContext {
            event_id: Some("ev1".into()),
            event_rows: event_rows(),
            candidates: vec![],
        }
    }

    #[test]
    fn test_exact_key_wins_over_market_type() {
        let sel = Selection {
            game_id: Some("ev1".into()),
            market_reference: Some("points-home-game-sp-home".into()),
            bet_type: "total".into(),
            side: "home".into(),
            ..Default::default()
        };
        let hit = find_match(&sel, &ctx()).unwrap();
        assert_eq!(hit.strategy, "exact");
        assert_eq!(hit.row.odd_id, "points-home-game-sp-home");
    }

    #[test]
    fn test_exact_key_prefers_selection_line() {
        let mut c = ctx();
        let mut alt = row("ev1", "points-home-game-sp-home", "Point Spread", "sp", "home", Some(-8.5));
        alt.is_alternate = true;
        c.event_rows.push(alt);
        let sel = Selection {
            market_reference: Some("points-home-game-sp-home".into()),
            bet_type: "spread".into(),
            side: "home".into(),
            line_value: Some(-8.5),
            ..Default::default()
        };
        assert_eq!(exact_key(&sel, &c).unwrap().row.line, Some(-8.5));
        let sel = Selection {
            line_value: Some(-3.5),
            ..sel
        };
        assert_eq!(exact_key(&sel, &c).unwrap().row.line, Some(-6.5));
    }

    #[test]
    fn test_stale_reference_falls_back_to_market_name() {
        let sel = Selection {
            market_reference: Some("gone".into()),
            bet_type: "total".into(),
            side: "over".into(),
            ..Default::default()
        };
        let hit = find_match(&sel, &ctx()).unwrap();
        assert_eq!(hit.strategy, "market_type");
        assert_eq!(hit.row.odd_id, "points-all-game-ou-over");
    }

    #[test]
    fn test_team_name_search_discovers_event() {
        let c = MatchContext {
            event_id: None,
            event_rows: vec![],
            candidates: vec![
                (game("ev9", "Miami Heat", "Chicago Bulls"), vec![]),
                (
                    game("ev1", "Los Angeles Lakers", "Boston Celtics"),
                    vec![
                        row("ev1", "points-away-game-ml-away", "Moneyline", "ml", "away", None),
                        row("ev1", "points-home-game-ml-home", "Moneyline", "ml", "home", None),
                    ],
                ),
            ],
        };
        let sel = Selection {
            sport: Some("NBA".into()),
            bet_type: "moneyline".into(),
            side: "away".into(),
            team: Some("Celtics".into()),
            ..Default::default()
        };
        let hit = find_match(&sel, &c).unwrap();
        assert_eq!(hit.strategy, "team_name");
        assert_eq!(hit.discovered_event.as_deref(), Some("ev1"));
        assert_eq!(hit.row.odd_id, "points-away-game-ml-away");
    }

    #[test]
    fn test_team_name_infers_side_when_missing() {
        let c = MatchContext {
            candidates: vec![(
                game("ev1", "Los Angeles Lakers", "Boston Celtics"),
                vec![
                    row("ev1", "points-away-game-ml-away", "Moneyline", "ml", "away", None),
                    row("ev1", "points-home-game-ml-home", "Moneyline", "ml", "home", None),
                ],
            )],
            ..Default::default()
        };
        let sel = Selection {
            bet_type: "ml".into(),
            description: Some("Los Angeles Lakers moneyline".into()),
            ..Default::default()
        };
        assert_eq!(team_name(&sel, &c).unwrap().row.odd_id, "points-home-game-ml-home");
    }

    #[test]
    fn test_team_name_skipped_when_reference_present() {
        let c = MatchContext {
            candidates: vec![(
                game("ev1", "Los Angeles Lakers", "Boston Celtics"),
                event_rows(),
            )],
            ..Default::default()
        };
        let sel = Selection {
            market_reference: Some("gone".into()),
            bet_type: "player_points".into(),
            side: "home".into(),
            team: Some("Lakers".into()),
            ..Default::default()
        };
        assert!(find_match(&sel, &c).is_none());
    }

    #[test]
    fn test_short_team_text_is_ignored() {
        let c = MatchContext {
            candidates: vec![(game("ev1", "Los Angeles Lakers", "Boston Celtics"), event_rows())],
            ..Default::default()
        };
        let sel = Selection {
            bet_type: "moneyline".into(),
            side: "home".into(),
            team: Some("LA".into()),
            ..Default::default()
        };
        assert!(team_name(&sel, &c).is_none());
    }

    #[test]
    fn test_match_selection_loads_from_store() {
        let db = Database::open(":memory:").unwrap();
        db.upsert_game(&game("ev1", "Los Angeles Lakers", "Boston Celtics"))
            .unwrap();
        db.write_odds_chunk(crate::db::OddsTable::Current, &event_rows())
            .unwrap();

        let sel = Selection {
            game_id: Some("ev1".into()),
            market_reference: Some("points-home-game-ml-home".into()),
            bet_type: "moneyline".into(),
            side: "home".into(),
            ..Default::default()
        };
        let hit = match_selection(&db, &sel, None, Utc::now()).unwrap().unwrap();
        assert_eq!(hit.strategy, "exact");

        let sel = Selection {
            sport: Some("NBA".into()),
            bet_type: "spread".into(),
            side: "home".into(),
            team: Some("Lakers".into()),
            ..Default::default()
        };
        let hit = match_selection(&db, &sel, None, Utc::now()).unwrap().unwrap();
        assert_eq!(hit.strategy, "team_name");
        assert_eq!(hit.row.odd_id, "points-home-game-sp-home");
    }

    #[test]
    fn test_stale_reference_keeps_selection_side() {
        let c = MatchContext {
            event_id: Some("ev1".into()),
            event_rows: vec![
                row("ev1", "points-away-game-sp-away", "Point Spread", "sp", "away", Some(6.5)),
                row("ev1", "points-home-game-sp-home", "Point Spread", "sp", "home", Some(-6.5)),
            ],
            candidates: vec![],
        };
        let sel = Selection {
            market_reference: Some("gone".into()),
            bet_type: "spread".into(),
            side: "home".into(),
            ..Default::default()
        };
        let hit = market_type(&sel, &c).unwrap();
        assert_eq!(hit.row.odd_id, "points-home-game-sp-home");
        assert_eq!(hit.row.line, Some(-6.5));

        let sel = Selection {
            side: "under".into(),
            ..sel
        };
        assert!(market_type(&sel, &c).is_none());
    }

    #[test]
    fn test_team_search_skips_games_before_placement() {
        let db = Database::open(":memory:").unwrap();
        let now = Utc::now();
        let mut stale = game("ev_old", "Los Angeles Lakers", "Golden State Warriors");
        stale.starts_at = Some(now - Duration::days(3));
        stale.home_score = Some(90);
        stale.away_score = Some(120);
        let mut upcoming = game("ev1", "Los Angeles Lakers", "Boston Celtics");
        upcoming.status = GameStatus::NotStarted;
        upcoming.starts_at = Some(now + Duration::hours(3));
        upcoming.home_score = None;
        upcoming.away_score = None;
        db.upsert_game(&stale).unwrap();
        db.upsert_game(&upcoming).unwrap();

        let mut rows = Vec::new();
        for event in ["ev_old", "ev1"] {
            rows.push(row(event, "points-home-game-ml-home", "Moneyline", "ml", "home", None));
        }
        db.write_odds_chunk(crate::db::OddsTable::Current, &rows)
            .unwrap();

        let sel = Selection {
            sport: Some("NBA".into()),
            bet_type: "moneyline".into(),
            side: "home".into(),
            team: Some("Lakers".into()),
            ..Default::default()
        };
        let ctx = MatchContext::load(&db, &sel, None, now).unwrap();
        assert_eq!(ctx.candidates.len(), 1);
        let hit = find_match(&sel, &ctx).unwrap();
        assert_eq!(hit.discovered_event.as_deref(), Some("ev1"));

        // A live bet placed shortly after tip-off still sees its game.
        let ctx = MatchContext::load(&db, &sel, None, now + Duration::hours(4)).unwrap();
        assert_eq!(ctx.candidates.len(), 1);
    }

    #[test]
    fn test_team_search_with_no_matching_team() {
        let c = MatchContext {
            candidates: vec![(game("ev1", "Los Angeles Lakers", "Boston Celtics"), event_rows())],
            ..Default::default()
        };
        let sel = Selection {
            sport: Some("NBA".into()),
            bet_type: "moneyline".into(),
            side: "home".into(),
            team: Some("Toronto Raptors".into()),
            ..Default::default()
        };
        assert!(find_match(&sel, &c).is_none());
    }
}
