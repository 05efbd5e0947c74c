//! The settlement job: fetch every (sport, date) unit, push each game through
//! odds consolidation and scoring, settle its bets, then sweep whatever is
//! still pending.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::models::{Bet, BetStatus, Selection};
use crate::db::Database;
use crate::odds::{consolidate, normalize_odds_map, OddsWriter};
use crate::provider::{OddsProvider, ProviderEvent};

use super::applier;
use super::evaluator::{aggregate_parlay, evaluate, Outcome};
use super::matcher::match_selection;
use super::scores::annotate_scores;

/// Lifecycle of one (sport, date) work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Fetching,
    Processing,
    Settling,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitReport {
    pub sport: String,
    pub date: NaiveDate,
    pub state: UnitState,
    pub games: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one run, returned to whoever invoked the job.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    pub total_games_fetched: usize,
    pub total_completed_games: usize,
    /// Odds rows that received a final score
    pub total_odds_updated: usize,
    /// New odds rows in the current table
    pub total_odds_written: usize,
    pub total_bets_settled: usize,
    pub fetch_requests: usize,
    pub successful_requests: usize,
    pub date_range: String,
    pub message: String,
    pub units: Vec<UnitReport>,
}

#[derive(Debug, Default)]
struct GameReport {
    completed: bool,
    odds_written: usize,
    odds_scored: usize,
    bets_settled: usize,
}

pub struct SettlementJob {
    db: Database,
    provider: Arc<dyn OddsProvider>,
    sports: Vec<String>,
    lookback_days: u32,
    writer: OddsWriter,
}

impl SettlementJob {
    pub fn new(
        db: Database,
        provider: Arc<dyn OddsProvider>,
        sports: Vec<String>,
        lookback_days: u32,
        write_chunk_size: usize,
    ) -> Self {
        let writer = OddsWriter::new(db.clone(), write_chunk_size);
        SettlementJob {
            db,
            provider,
            sports,
            lookback_days,
            writer,
        }
    }

    /// Today plus `lookback_days` previous days, newest first.
    pub fn dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        (0..=i64::from(self.lookback_days))
            .map(|back| today - Duration::days(back))
            .collect()
    }

    pub async fn run(&self) -> Result<RunSummary> {
        self.run_for(Utc::now().date_naive()).await
    }

    /// Run the whole pipeline with `today` as the newest date.
    pub async fn run_for(&self, today: NaiveDate) -> Result<RunSummary> {
        let dates = self.dates(today);
        let mut summary = RunSummary {
            date_range: match (dates.last(), dates.first()) {
                (Some(from), Some(to)) => format!("{} to {}", from, to),
                _ => String::new(),
            },
            ..Default::default()
        };

        let units: Vec<(String, NaiveDate)> = self
            .sports
            .iter()
            .flat_map(|s| dates.iter().map(move |d| (s.clone(), *d)))
            .collect();
        summary.fetch_requests = units.len();
        info!(
            "Settlement run: {} fetches from {} ({})",
            units.len(),
            self.provider.name(),
            summary.date_range
        );

        let fetches = units
            .iter()
            .map(|(sport, date)| self.provider.fetch_events(sport, *date));
        let results = join_all(fetches).await;

        for ((sport, date), result) in units.into_iter().zip(results) {
            let mut unit = UnitReport {
                sport,
                date,
                state: UnitState::Fetching,
                games: 0,
                error: None,
            };
            match result {
                Ok(events) => {
                    summary.successful_requests += 1;
                    self.process_unit(&mut unit, &events, &mut summary);
                }
                Err(e) => {
                    warn!("[{} {}] fetch failed: {:#}", unit.sport, unit.date, e);
                    unit.state = UnitState::Failed;
                    unit.error = Some(format!("{:#}", e));
                }
            }
            summary.units.push(unit);
        }

        // Second pass: anything still pending, whichever date it belongs to.
        let pending = self
            .db
            .pending_bets()
            .context("loading pending bets for sweep")?;
        debug!("Sweeping {} pending bets", pending.len());
        for bet in &pending {
            if self.settle_logged(bet) {
                summary.total_bets_settled += 1;
            }
        }

        summary.success = true;
        summary.message = format!(
            "Processed {} games ({} completed) from {}/{} fetches; scored {} odds rows; settled {} bets",
            summary.total_games_fetched,
            summary.total_completed_games,
            summary.successful_requests,
            summary.fetch_requests,
            summary.total_odds_updated,
            summary.total_bets_settled
        );
        info!("{}", summary.message);
        Ok(summary)
    }

    fn process_unit(&self, unit: &mut UnitReport, events: &[ProviderEvent], summary: &mut RunSummary) {
        unit.state = UnitState::Processing;
        unit.games = events.len();
        summary.total_games_fetched += events.len();
        debug!("[{} {}] processing {} games", unit.sport, unit.date, events.len());

        let mut failed = 0;
        for event in events {
            match self.process_game(event) {
                Ok(report) => {
                    if report.completed {
                        unit.state = UnitState::Settling;
                        summary.total_completed_games += 1;
                    }
                    summary.total_odds_written += report.odds_written;
                    summary.total_odds_updated += report.odds_scored;
                    summary.total_bets_settled += report.bets_settled;
                }
                Err(e) => {
                    failed += 1;
                    error!(
                        "[{} {}] game {} skipped: {:#}",
                        unit.sport, unit.date, event.game.event_id, e
                    );
                }
            }
        }

        if failed > 0 {
            unit.error = Some(format!("{} of {} games failed", failed, events.len()));
        }
        unit.state = UnitState::Done;
    }

    fn process_game(&self, event: &ProviderEvent) -> Result<GameReport> {
        let game = &event.game;
        self.db.upsert_game(game)?;

        let quotes = normalize_odds_map(&event.odds);
        let consolidation = consolidate(&game.event_id, &quotes, Utc::now());
        let stats = &consolidation.stats;
        debug!(
            "Game {}: {} quotes, {} contributions -> {} rows ({} alternate, {:.1}% reduction, {} skipped)",
            game.event_id,
            stats.input_quotes,
            stats.contributions,
            stats.output_rows,
            stats.alternate_rows,
            stats.reduction_pct(),
            stats.skipped_entries
        );
        let written = self.writer.write(&consolidation.rows);

        let mut report = GameReport {
            odds_written: written.inserted_current,
            ..Default::default()
        };
        if game.final_scores().is_none() {
            return Ok(report);
        }

        report.completed = true;
        report.odds_scored = annotate_scores(&self.db, game)?;
        for bet in self.db.pending_bets_for_game(&game.event_id)? {
            if self.settle_logged(&bet) {
                report.bets_settled += 1;
            }
        }
        Ok(report)
    }

    /// Settle one bet, logging instead of propagating failures.
    fn settle_logged(&self, bet: &Bet) -> bool {
        match self.settle(bet) {
            Ok(settled) => settled,
            Err(e) => {
                error!("Bet {:?} could not be settled: {:#}", bet.id, e);
                false
            }
        }
    }

    /// Match, grade and apply. Returns true when the bet reached a terminal
    /// state in this call.
    pub fn settle(&self, bet: &Bet) -> Result<bool> {
        let Some(bet_id) = bet.id else {
            anyhow::bail!("bet has no id");
        };
        if bet.status.is_terminal() {
            return Ok(false);
        }

        if !bet.is_parlay() {
            let outcome = self.grade(bet_id, None, &bet.selection, bet.placed_at)?;
            return Ok(applier::apply(&self.db, bet, &outcome)?.is_some());
        }

        let mut graded = bet.clone();
        let now = Utc::now();
        for leg in graded.legs.iter_mut() {
            if leg.status.is_terminal() {
                continue;
            }
            let outcome = self.grade(bet_id, leg.id, &leg.selection, bet.placed_at)?;
            if !outcome.status.is_terminal() {
                continue;
            }
            if let Some(leg_id) = leg.id {
                self.db
                    .settle_leg(leg_id, outcome.status, &outcome.reason, now)
                    .with_context(|| format!("settling leg {} of bet {}", leg_id, bet_id))?;
            }
            leg.status = outcome.status;
            leg.result = Some(outcome.reason);
        }

        let statuses: Vec<BetStatus> = graded.legs.iter().map(|l| l.status).collect();
        let status = aggregate_parlay(&statuses);
        if !status.is_terminal() {
            return Ok(false);
        }
        let won = statuses.iter().filter(|s| **s == BetStatus::Won).count();
        let outcome = Outcome {
            status,
            reason: format!("parlay: {} of {} legs won", won, statuses.len()),
        };
        Ok(applier::apply(&self.db, &graded, &outcome)?.is_some())
    }

    /// Find the odds row for a selection and evaluate it. A row found on a
    /// different event is written back onto the bet (or leg).
    fn grade(
        &self,
        bet_id: i64,
        leg_id: Option<i64>,
        selection: &Selection,
        placed_at: DateTime<Utc>,
    ) -> Result<Outcome> {
        let Some(hit) = match_selection(
            &self.db,
            selection,
            selection.game_id.as_deref(),
            placed_at,
        )?
        else {
            return Ok(Outcome {
                status: BetStatus::Pending,
                reason: "no matching odds row".into(),
            });
        };
        if let Some(event_id) = &hit.discovered_event {
            info!(
                "Bet {} matched by team name to game {} ({})",
                bet_id, event_id, hit.row.odd_id
            );
            self.db
                .backfill_selection(bet_id, leg_id, event_id, &hit.row.odd_id)?;
        }
        Ok(evaluate(selection, &hit.row))
    }
}
