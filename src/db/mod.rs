use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

use crate::error::StoreError;
use crate::odds::bookmakers::{link_column, odds_column, KNOWN_BOOKMAKERS};

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// The two odds record sets: live-updating and first-seen ("opening").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OddsTable {
    Current,
    Opening,
}

impl OddsTable {
    pub fn name(self) -> &'static str {
        match self {
            OddsTable::Current => "odds_current",
            OddsTable::Opening => "odds_opening",
        }
    }
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(&schema_sql())?;
        Ok(())
    }

    fn conn(&self) -> std::result::Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Games ─────────────────────────────────────────────────────────────────

    pub fn upsert_game(&self, game: &Game) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO games (event_id, sport, home_team, away_team, display_name,
                                status, home_score, away_score, starts_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
             ON CONFLICT(event_id) DO UPDATE SET
                home_team=excluded.home_team,
                away_team=excluded.away_team,
                display_name=excluded.display_name,
                status=excluded.status,
                home_score=COALESCE(excluded.home_score, games.home_score),
                away_score=COALESCE(excluded.away_score, games.away_score),
                starts_at=COALESCE(excluded.starts_at, games.starts_at),
                updated_at=excluded.updated_at",
            params![
                game.event_id,
                game.sport,
                game.home_team,
                game.away_team,
                game.display_name,
                game.status,
                game.home_score,
                game.away_score,
                game.starts_at,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn get_game(&self, event_id: &str) -> Result<Option<Game>> {
        let conn = self.conn()?;
        let game = conn
            .query_row(
                &format!("SELECT {} FROM games WHERE event_id=?1", GAME_COLUMNS),
                params![event_id],
                map_game,
            )
            .optional()?;
        Ok(game)
    }

    pub fn game_status(&self, event_id: &str) -> Result<Option<GameStatus>> {
        let conn = self.conn()?;
        let status = conn
            .query_row(
                "SELECT status FROM games WHERE event_id=?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Games of one sport, finished games first, most recent first.
    pub fn games_for_sport(&self, sport: &str) -> Result<Vec<Game>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM games WHERE sport=?1
             ORDER BY (status='finished') DESC, starts_at DESC, event_id",
            GAME_COLUMNS
        ))?;
        let games = stmt
            .query_map(params![sport], map_game)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(games)
    }

    // ── Odds ──────────────────────────────────────────────────────────────────

    /// Upsert one chunk of canonical rows inside a single transaction.
    ///
    /// Returns one result per row: `Ok(true)` when the row is new,
    /// `Ok(false)` when the store already had it (a refresh of an existing
    /// current row counts as already present), or the row's error.
    /// A failing row does not roll back its siblings.
    pub fn write_odds_chunk(
        &self,
        table: OddsTable,
        rows: &[OddsRow],
    ) -> std::result::Result<Vec<std::result::Result<bool, StoreError>>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let sql = odds_upsert_sql(table);
        let mut results = Vec::with_capacity(rows.len());
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            let mut existing = tx.prepare_cached(&format!(
                "SELECT 1 FROM {} WHERE event_id=?1 AND odd_id=?2 AND line_key=?3",
                table.name()
            ))?;
            for row in rows {
                let res = existing
                    .exists(params![row.event_id, row.odd_id, row.line_key()])
                    .and_then(|present| {
                        let values = odds_row_values(row);
                        stmt.execute(params_from_iter(values.iter()))
                            .map(|n| n > 0 && !present)
                    })
                    .map_err(StoreError::from);
                results.push(res);
            }
        }
        tx.commit()?;
        Ok(results)
    }

    /// All current rows for an event, reference rows before alternates.
    pub fn odds_for_event(&self, event_id: &str) -> Result<Vec<OddsRow>> {
        self.query_odds(
            "SELECT * FROM odds_current WHERE event_id=?1
             ORDER BY odd_id, is_alternate, line_key",
            event_id,
        )
    }

    pub fn unscored_odds_for_event(&self, event_id: &str) -> Result<Vec<OddsRow>> {
        self.query_odds(
            "SELECT * FROM odds_current
             WHERE event_id=?1 AND score IS NULL AND home_score IS NULL
             ORDER BY odd_id, is_alternate, line_key",
            event_id,
        )
    }

    pub fn opening_odds_for_event(&self, event_id: &str) -> Result<Vec<OddsRow>> {
        self.query_odds(
            "SELECT * FROM odds_opening WHERE event_id=?1
             ORDER BY odd_id, is_alternate, line_key",
            event_id,
        )
    }

    fn query_odds(&self, sql: &str, event_id: &str) -> Result<Vec<OddsRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![event_id], map_odds_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Write final-score data onto one row that has none yet.
    /// Returns false when the row was already scored (or is gone).
    pub fn set_odds_score(
        &self,
        row: &OddsRow,
        score: &str,
        home_score: i32,
        away_score: i32,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE odds_current
             SET score=?1, home_score=?2, away_score=?3, updated_at=?4
             WHERE event_id=?5 AND odd_id=?6 AND line_key=?7 AND score IS NULL",
            params![
                score,
                home_score,
                away_score,
                Utc::now(),
                row.event_id,
                row.odd_id,
                row.line_key(),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn count_odds(&self, table: OddsTable) -> Result<i64> {
        let conn = self.conn()?;
        let n = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.name()),
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }

    // ── Bets ──────────────────────────────────────────────────────────────────

    /// Insert a bet (and its parlay legs, if any). Returns the new bet ID.
    pub fn insert_bet(&self, bet: &Bet) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let s = &bet.selection;
        tx.execute(
            "INSERT INTO bets (
                game_id, sport, market_reference, bet_type, side, line_value,
                team, description, stake, american_odds, status, result,
                profit, potential_payout, actual_payout, placed_at, settled_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                s.game_id,
                s.sport,
                s.market_reference,
                s.bet_type,
                s.side,
                s.line_value,
                s.team,
                s.description,
                bet.stake,
                bet.american_odds,
                bet.status,
                bet.result,
                bet.profit,
                bet.potential_payout,
                bet.actual_payout,
                bet.placed_at,
                bet.settled_at,
            ],
        )?;
        let bet_id = tx.last_insert_rowid();
        for leg in &bet.legs {
            let s = &leg.selection;
            tx.execute(
                "INSERT INTO bet_legs (
                    bet_id, position, game_id, sport, market_reference, bet_type,
                    side, line_value, team, description, american_odds, status, result
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
                params![
                    bet_id,
                    leg.position,
                    s.game_id,
                    s.sport,
                    s.market_reference,
                    s.bet_type,
                    s.side,
                    s.line_value,
                    s.team,
                    s.description,
                    leg.american_odds,
                    leg.status,
                    leg.result,
                ],
            )?;
        }
        tx.commit()?;
        Ok(bet_id)
    }

    pub fn get_bet(&self, id: i64) -> Result<Option<Bet>> {
        let bets = self.query_bets(
            &format!("SELECT {} FROM bets WHERE id=?1", BET_COLUMNS),
            params![id],
        )?;
        Ok(bets.into_iter().next())
    }

    /// List bets, newest first, optionally filtered by status.
    pub fn list_bets(&self, status: Option<BetStatus>, limit: i64) -> Result<Vec<Bet>> {
        match status {
            Some(status) => self.query_bets(
                &format!(
                    "SELECT {} FROM bets WHERE status=?1 ORDER BY placed_at DESC, id DESC LIMIT ?2",
                    BET_COLUMNS
                ),
                params![status, limit],
            ),
            None => self.query_bets(
                &format!(
                    "SELECT {} FROM bets ORDER BY placed_at DESC, id DESC LIMIT ?1",
                    BET_COLUMNS
                ),
                params![limit],
            ),
        }
    }

    pub fn pending_bets(&self) -> Result<Vec<Bet>> {
        self.query_bets(
            &format!(
                "SELECT {} FROM bets WHERE status='pending' ORDER BY placed_at, id",
                BET_COLUMNS
            ),
            [],
        )
    }

    /// Pending bets placed on a game, either directly or through a parlay leg.
    pub fn pending_bets_for_game(&self, event_id: &str) -> Result<Vec<Bet>> {
        self.query_bets(
            &format!(
                "SELECT {} FROM bets
                 WHERE status='pending'
                   AND (game_id=?1 OR id IN (SELECT bet_id FROM bet_legs WHERE game_id=?1))
                 ORDER BY placed_at, id",
                BET_COLUMNS
            ),
            params![event_id],
        )
    }

    fn query_bets<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Bet>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let mut bets = stmt
            .query_map(params, map_bet)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for bet in &mut bets {
            if let Some(id) = bet.id {
                bet.legs = load_legs(&conn, id)?;
            }
        }
        Ok(bets)
    }

    /// Move a pending bet into a terminal state.
    ///
    /// The `status='pending'` guard makes this a one-shot transition: it
    /// returns false (and changes nothing) for bets that are already settled.
    pub fn settle_bet(
        &self,
        id: i64,
        status: BetStatus,
        result: &str,
        profit: f64,
        actual_payout: f64,
        settled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE bets SET status=?1, result=?2, profit=?3, actual_payout=?4, settled_at=?5
             WHERE id=?6 AND status='pending'",
            params![status, result, profit, actual_payout, settled_at, id],
        )?;
        Ok(n > 0)
    }

    pub fn settle_leg(
        &self,
        leg_id: i64,
        status: BetStatus,
        result: &str,
        settled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE bet_legs SET status=?1, result=?2, settled_at=?3
             WHERE id=?4 AND status='pending'",
            params![status, result, settled_at, leg_id],
        )?;
        Ok(n > 0)
    }

    /// Record the game and market a fallback search resolved for a bet or leg.
    pub fn backfill_selection(
        &self,
        bet_id: i64,
        leg_id: Option<i64>,
        game_id: &str,
        market_reference: &str,
    ) -> Result<()> {
        let conn = self.conn()?;
        match leg_id {
            Some(leg_id) => conn.execute(
                "UPDATE bet_legs SET game_id=?1, market_reference=?2
                 WHERE id=?3 AND bet_id=?4 AND status='pending'",
                params![game_id, market_reference, leg_id, bet_id],
            )?,
            None => conn.execute(
                "UPDATE bets SET game_id=?1, market_reference=?2
                 WHERE id=?3 AND status='pending'",
                params![game_id, market_reference, bet_id],
            )?,
        };
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn()?;
        let mut stats = Stats::default();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM bets GROUP BY status")?;
        let counts = stmt
            .query_map([], |r| Ok((r.get::<_, BetStatus>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (status, n) in counts {
            match status {
                BetStatus::Pending => stats.pending = n,
                BetStatus::Won => stats.won = n,
                BetStatus::Lost => stats.lost = n,
                BetStatus::Void => stats.void = n,
                BetStatus::Cancelled => stats.cancelled = n,
            }
        }
        stats.total_staked = conn.query_row("SELECT COALESCE(SUM(stake),0) FROM bets", [], |r| {
            r.get(0)
        })?;
        stats.realized_profit = conn.query_row(
            "SELECT COALESCE(SUM(profit),0) FROM bets WHERE status IN ('won','lost','void')",
            [],
            |r| r.get(0),
        )?;
        stats.odds_rows = conn.query_row("SELECT COUNT(*) FROM odds_current", [], |r| r.get(0))?;
        stats.games = conn.query_row("SELECT COUNT(*) FROM games", [], |r| r.get(0))?;
        Ok(stats)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

impl ToSql for BetStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for BetStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        BetStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown bet status '{}'", s).into()))
    }
}

impl ToSql for GameStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for GameStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(GameStatus::parse)
    }
}

const GAME_COLUMNS: &str = "event_id, sport, home_team, away_team, display_name,
                            status, home_score, away_score, starts_at";

const BET_COLUMNS: &str = "id, game_id, sport, market_reference, bet_type, side, line_value,
                           team, description, stake, american_odds, status, result,
                           profit, potential_payout, actual_payout, placed_at, settled_at";

/// Leading identity/descriptive columns shared by both odds tables.
const ODDS_BASE_COLUMNS: &[&str] = &[
    "event_id",
    "odd_id",
    "line_key",
    "line",
    "is_alternate",
    "sportsbook_tag",
    "market_name",
    "bet_type_id",
    "side_id",
    "reference_price",
];

fn map_game(row: &rusqlite::Row) -> rusqlite::Result<Game> {
    Ok(Game {
        event_id: row.get(0)?,
        sport: row.get(1)?,
        home_team: row.get(2)?,
        away_team: row.get(3)?,
        display_name: row.get(4)?,
        status: row.get(5)?,
        home_score: row.get(6)?,
        away_score: row.get(7)?,
        starts_at: row.get(8)?,
    })
}

fn map_selection(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Selection> {
    Ok(Selection {
        game_id: row.get(offset)?,
        sport: row.get(offset + 1)?,
        market_reference: row.get(offset + 2)?,
        bet_type: row.get(offset + 3)?,
        side: row.get(offset + 4)?,
        line_value: row.get(offset + 5)?,
        team: row.get(offset + 6)?,
        description: row.get(offset + 7)?,
    })
}

fn map_bet(row: &rusqlite::Row) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: row.get(0)?,
        selection: map_selection(row, 1)?,
        stake: row.get(9)?,
        american_odds: row.get(10)?,
        status: row.get(11)?,
        result: row.get(12)?,
        profit: row.get(13)?,
        potential_payout: row.get(14)?,
        actual_payout: row.get(15)?,
        placed_at: row.get(16)?,
        settled_at: row.get(17)?,
        legs: Vec::new(),
    })
}

fn load_legs(conn: &Connection, bet_id: i64) -> rusqlite::Result<Vec<BetLeg>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, bet_id, position, game_id, sport, market_reference, bet_type, side,
                line_value, team, description, american_odds, status, result
         FROM bet_legs WHERE bet_id=?1 ORDER BY position",
    )?;
    let legs = stmt
        .query_map(params![bet_id], |row| {
            Ok(BetLeg {
                id: row.get(0)?,
                bet_id: row.get(1)?,
                position: row.get(2)?,
                selection: map_selection(row, 3)?,
                american_odds: row.get(11)?,
                status: row.get(12)?,
                result: row.get(13)?,
            })
        })?
        .collect();
    legs
}

fn map_odds_row(row: &rusqlite::Row) -> rusqlite::Result<OddsRow> {
    let mut books = BTreeMap::new();
    for book in KNOWN_BOOKMAKERS {
        let odds: Option<i32> = row.get(odds_column(book).as_str())?;
        let link: Option<String> = row.get(link_column(book).as_str())?;
        if odds.is_some() || link.is_some() {
            books.insert(book.to_string(), BookQuote { odds, link });
        }
    }
    Ok(OddsRow {
        event_id: row.get("event_id")?,
        odd_id: row.get("odd_id")?,
        line: row.get("line")?,
        is_alternate: row.get("is_alternate")?,
        sportsbook_tag: row.get("sportsbook_tag")?,
        market_name: row.get("market_name")?,
        bet_type_id: row.get("bet_type_id")?,
        side_id: row.get("side_id")?,
        reference_price: row.get("reference_price")?,
        books,
        score: row.get("score")?,
        home_score: row.get("home_score")?,
        away_score: row.get("away_score")?,
        fetched_at: row.get("fetched_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn odds_columns() -> Vec<String> {
    let mut columns: Vec<String> = ODDS_BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
    for book in KNOWN_BOOKMAKERS {
        columns.push(odds_column(book));
        columns.push(link_column(book));
    }
    columns.extend(["fetched_at", "created_at", "updated_at"].map(String::from));
    columns
}

/// Bound values in the same order as `odds_columns()`.
fn odds_row_values(row: &OddsRow) -> Vec<Box<dyn ToSql + '_>> {
    let mut values: Vec<Box<dyn ToSql + '_>> = vec![
        Box::new(&row.event_id),
        Box::new(&row.odd_id),
        Box::new(row.line_key()),
        Box::new(row.line),
        Box::new(row.is_alternate),
        Box::new(&row.sportsbook_tag),
        Box::new(&row.market_name),
        Box::new(&row.bet_type_id),
        Box::new(&row.side_id),
        Box::new(row.reference_price),
    ];
    for book in KNOWN_BOOKMAKERS {
        let quote = row.books.get(*book);
        values.push(Box::new(quote.and_then(|q| q.odds)));
        values.push(Box::new(quote.and_then(|q| q.link.as_deref())));
    }
    values.push(Box::new(row.fetched_at));
    values.push(Box::new(row.created_at));
    values.push(Box::new(row.updated_at));
    values
}

/// Current rows take the freshest prices but never touch a scored row;
/// opening rows are first-write-wins.
fn odds_upsert_sql(table: OddsTable) -> String {
    let columns = odds_columns();
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT(event_id, odd_id, line_key)",
        table.name(),
        columns.join(", "),
        placeholders
    );
    match table {
        OddsTable::Opening => format!("{} DO NOTHING", insert),
        OddsTable::Current => {
            let t = table.name();
            let mut sets = vec![
                "market_name=excluded.market_name".to_string(),
                format!(
                    "reference_price=COALESCE(excluded.reference_price, {}.reference_price)",
                    t
                ),
            ];
            for book in KNOWN_BOOKMAKERS {
                for col in [odds_column(book), link_column(book)] {
                    sets.push(format!("{c}=COALESCE(excluded.{c}, {t}.{c})", c = col, t = t));
                }
            }
            sets.push("fetched_at=excluded.fetched_at".to_string());
            sets.push("updated_at=excluded.updated_at".to_string());
            format!(
                "{} DO UPDATE SET {} WHERE {t}.score IS NULL AND {t}.home_score IS NULL",
                insert,
                sets.join(", "),
                t = t
            )
        }
    }
}

fn odds_table_sql(table: OddsTable) -> String {
    let mut book_columns = String::new();
    for book in KNOWN_BOOKMAKERS {
        book_columns.push_str(&format!(
            "    {} INTEGER,\n    {} TEXT,\n",
            odds_column(book),
            link_column(book)
        ));
    }
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {t} (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id        TEXT    NOT NULL CHECK (length(event_id) > 0),
    odd_id          TEXT    NOT NULL CHECK (length(odd_id) > 0),
    line_key        TEXT    NOT NULL DEFAULT '',
    line            REAL,
    is_alternate    INTEGER NOT NULL DEFAULT 0,
    sportsbook_tag  TEXT    NOT NULL,
    market_name     TEXT    NOT NULL,
    bet_type_id     TEXT    NOT NULL,
    side_id         TEXT    NOT NULL,
    reference_price INTEGER,
{books}    score           TEXT,
    home_score      INTEGER,
    away_score      INTEGER,
    fetched_at      TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL,
    UNIQUE (event_id, odd_id, line_key)
);

CREATE INDEX IF NOT EXISTS idx_{t}_event ON {t}(event_id);
"#,
        t = table.name(),
        books = book_columns
    )
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub fn schema_sql() -> String {
    let mut sql = String::from(BASE_SCHEMA_SQL);
    sql.push_str(&odds_table_sql(OddsTable::Current));
    sql.push_str(&odds_table_sql(OddsTable::Opening));
    sql
}

const BASE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    event_id     TEXT    PRIMARY KEY,
    sport        TEXT    NOT NULL,
    home_team    TEXT    NOT NULL,
    away_team    TEXT    NOT NULL,
    display_name TEXT    NOT NULL,
    status       TEXT    NOT NULL DEFAULT 'not_started',
    home_score   INTEGER,
    away_score   INTEGER,
    starts_at    TEXT,
    updated_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS bets (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id          TEXT,
    sport            TEXT,
    market_reference TEXT,
    bet_type         TEXT    NOT NULL,
    side             TEXT    NOT NULL,
    line_value       REAL,
    team             TEXT,
    description      TEXT,
    stake            REAL    NOT NULL CHECK (stake > 0),
    american_odds    INTEGER NOT NULL,
    status           TEXT    NOT NULL DEFAULT 'pending',
    result           TEXT,
    profit           REAL,
    potential_payout REAL    NOT NULL,
    actual_payout    REAL,
    placed_at        TEXT    NOT NULL,
    settled_at       TEXT
);

CREATE TABLE IF NOT EXISTS bet_legs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    bet_id           INTEGER NOT NULL,
    position         INTEGER NOT NULL,
    game_id          TEXT,
    sport            TEXT,
    market_reference TEXT,
    bet_type         TEXT    NOT NULL,
    side             TEXT    NOT NULL,
    line_value       REAL,
    team             TEXT,
    description      TEXT,
    american_odds    INTEGER NOT NULL,
    status           TEXT    NOT NULL DEFAULT 'pending',
    result           TEXT,
    settled_at       TEXT,
    UNIQUE (bet_id, position),
    FOREIGN KEY (bet_id) REFERENCES bets(id)
);

CREATE INDEX IF NOT EXISTS idx_games_sport ON games(sport);
CREATE INDEX IF NOT EXISTS idx_bets_status ON bets(status);
CREATE INDEX IF NOT EXISTS idx_bets_game ON bets(game_id);
CREATE INDEX IF NOT EXISTS idx_bet_legs_game ON bet_legs(game_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open(":memory:").unwrap()
    }

    fn row(odd_id: &str, line: Option<f64>) -> OddsRow {
        let now = Utc::now();
        let mut books = BTreeMap::new();
        books.insert(
            "fanduel".to_string(),
            BookQuote {
                odds: Some(-110),
                link: Some("https://fd.example/bet".into()),
            },
        );
        OddsRow {
            event_id: "ev1".into(),
            odd_id: odd_id.into(),
            line,
            is_alternate: false,
            sportsbook_tag: "consensus".into(),
            market_name: "Point Spread".into(),
            bet_type_id: "sp".into(),
            side_id: "home".into(),
            reference_price: Some(-110),
            books,
            score: None,
            home_score: None,
            away_score: None,
            fetched_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = db();
        db.run_migrations().unwrap();
        db.run_migrations().unwrap();
    }

    #[test]
    fn test_odds_roundtrip_preserves_books() {
        let db = db();
        let r = row("points-home-game-sp-home", Some(-6.5));
        let res = db.write_odds_chunk(OddsTable::Current, &[r.clone()]).unwrap();
        assert!(matches!(res[0], Ok(true)));

        let stored = db.odds_for_event("ev1").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].line, Some(-6.5));
        assert_eq!(stored[0].books.get("fanduel"), r.books.get("fanduel"));
        assert!(stored[0].books.get("draftkings").is_none());
    }

    #[test]
    fn test_refreshing_current_row_is_not_an_insert() {
        let db = db();
        let first = row("points-home-game-sp-home", Some(-6.5));
        let mut moved = first.clone();
        moved.reference_price = Some(-115);

        let res = db.write_odds_chunk(OddsTable::Current, &[first]).unwrap();
        assert!(matches!(res[0], Ok(true)));
        let res = db.write_odds_chunk(OddsTable::Current, &[moved]).unwrap();
        assert!(matches!(res[0], Ok(false)));

        let stored = db.odds_for_event("ev1").unwrap();
        assert_eq!(stored[0].reference_price, Some(-115));
    }

    #[test]
    fn test_null_line_participates_in_identity() {
        let db = db();
        let r = row("points-home-game-ml-home", None);
        db.write_odds_chunk(OddsTable::Current, &[r.clone()]).unwrap();
        db.write_odds_chunk(OddsTable::Current, &[r]).unwrap();
        assert_eq!(db.count_odds(OddsTable::Current).unwrap(), 1);
    }

    #[test]
    fn test_opening_table_is_first_write_wins() {
        let db = db();
        let first = row("points-home-game-sp-home", Some(-6.5));
        let mut moved = first.clone();
        moved.reference_price = Some(-120);

        let res = db.write_odds_chunk(OddsTable::Opening, &[first]).unwrap();
        assert!(matches!(res[0], Ok(true)));
        let res = db.write_odds_chunk(OddsTable::Opening, &[moved]).unwrap();
        assert!(matches!(res[0], Ok(false)));

        let opening = db.opening_odds_for_event("ev1").unwrap();
        assert_eq!(opening[0].reference_price, Some(-110));
    }

    #[test]
    fn test_constraint_failure_does_not_poison_chunk() {
        let db = db();
        let bad = row("", Some(1.5));
        let good = row("points-home-game-sp-home", Some(-6.5));
        let res = db.write_odds_chunk(OddsTable::Current, &[bad, good]).unwrap();
        assert!(res[0].as_ref().unwrap_err().is_conflict());
        assert!(matches!(res[1], Ok(true)));
        assert_eq!(db.count_odds(OddsTable::Current).unwrap(), 1);
    }

    #[test]
    fn test_scored_rows_are_frozen() {
        let db = db();
        let r = row("points-home-game-sp-home", Some(-6.5));
        db.write_odds_chunk(OddsTable::Current, &[r.clone()]).unwrap();
        assert!(db.set_odds_score(&r, "110,100", 110, 100).unwrap());
        assert!(!db.set_odds_score(&r, "1,1", 1, 1).unwrap());

        let mut moved = r.clone();
        moved.reference_price = Some(-150);
        let res = db.write_odds_chunk(OddsTable::Current, &[moved]).unwrap();
        assert!(matches!(res[0], Ok(false)));
        let stored = &db.odds_for_event("ev1").unwrap()[0];
        assert_eq!(stored.reference_price, Some(-110));
        assert_eq!(stored.score.as_deref(), Some("110,100"));
    }

    #[test]
    fn test_bet_with_legs_roundtrip_and_guarded_settle() {
        let db = db();
        let leg = |pos: i32, game: &str| BetLeg {
            id: None,
            bet_id: None,
            position: pos,
            selection: Selection {
                game_id: Some(game.into()),
                bet_type: "moneyline".into(),
                side: "home".into(),
                ..Default::default()
            },
            american_odds: -110,
            status: BetStatus::Pending,
            result: None,
        };
        let bet = Bet {
            id: None,
            selection: Selection {
                bet_type: "parlay".into(),
                side: "parlay".into(),
                ..Default::default()
            },
            stake: 10.0,
            american_odds: 264,
            status: BetStatus::Pending,
            result: None,
            profit: None,
            potential_payout: 36.4,
            actual_payout: None,
            placed_at: Utc::now(),
            settled_at: None,
            legs: vec![leg(0, "g1"), leg(1, "g2")],
        };
        let id = db.insert_bet(&bet).unwrap();

        let pending = db.pending_bets_for_game("g2").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].legs.len(), 2);
        assert_eq!(pending[0].legs[1].selection.game_id.as_deref(), Some("g2"));

        assert!(db
            .settle_bet(id, BetStatus::Lost, "leg lost", -10.0, 0.0, Utc::now())
            .unwrap());
        assert!(!db
            .settle_bet(id, BetStatus::Won, "again", 26.4, 36.4, Utc::now())
            .unwrap());
        let stored = db.get_bet(id).unwrap().unwrap();
        assert_eq!(stored.status, BetStatus::Lost);
        assert_eq!(stored.profit, Some(-10.0));
        assert!(db.pending_bets().unwrap().is_empty());
    }

    #[test]
    fn test_game_upsert_keeps_known_scores() {
        let db = db();
        let mut game = Game {
            event_id: "g1".into(),
            sport: "NBA".into(),
            home_team: "Lakers".into(),
            away_team: "Celtics".into(),
            display_name: "Celtics @ Lakers".into(),
            status: GameStatus::Finished,
            home_score: Some(110),
            away_score: Some(100),
            starts_at: None,
        };
        db.upsert_game(&game).unwrap();
        game.home_score = None;
        game.away_score = None;
        db.upsert_game(&game).unwrap();
        let stored = db.get_game("g1").unwrap().unwrap();
        assert_eq!(stored.final_scores(), Some((110, 100)));
        assert_eq!(db.game_status("g1").unwrap(), Some(GameStatus::Finished));
        assert_eq!(db.games_for_sport("NBA").unwrap().len(), 1);
    }
}
