use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::db::models::OddsRow;
use crate::db::{Database, OddsTable};

/// Outcome of one `OddsWriter::write` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub inserted_current: usize,
    pub inserted_historical: usize,
    /// Rows rejected by a store constraint (treated as already present)
    pub conflicts: usize,
    /// Rows lost to unexpected store errors
    pub failed: usize,
    /// Events skipped because their game had already started
    pub guarded_events: usize,
}

impl WriteReport {
    fn merge(&mut self, other: WriteReport) {
        self.inserted_current += other.inserted_current;
        self.inserted_historical += other.inserted_historical;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.guarded_events += other.guarded_events;
    }
}

/// Persists canonical rows into the current and opening odds tables.
#[derive(Clone)]
pub struct OddsWriter {
    db: Database,
    chunk_size: usize,
}

impl OddsWriter {
    pub fn new(db: Database, chunk_size: usize) -> Self {
        OddsWriter {
            db,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Upsert rows, grouped by event. Never fails: problems are logged and
    /// show up as lower insertion counts.
    pub fn write(&self, rows: &[OddsRow]) -> WriteReport {
        let mut by_event: BTreeMap<&str, Vec<OddsRow>> = BTreeMap::new();
        for row in rows {
            by_event
                .entry(row.event_id.as_str())
                .or_default()
                .push(row.clone());
        }

        let mut report = WriteReport::default();
        for (event_id, event_rows) in by_event {
            report.merge(self.write_event(event_id, &event_rows));
        }
        report
    }

    fn write_event(&self, event_id: &str, rows: &[OddsRow]) -> WriteReport {
        let mut report = WriteReport::default();

        // Closing-line guard: odds for a started game are frozen.
        match self.db.game_status(event_id) {
            Ok(Some(status)) if status.has_started() => {
                info!(
                    "Game {} is {}; skipping {} odds rows",
                    event_id,
                    status.as_str(),
                    rows.len()
                );
                report.guarded_events = 1;
                return report;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Could not read status of game {}: {:#}", event_id, e);
                report.failed = rows.len();
                return report;
            }
        }

        for table in [OddsTable::Current, OddsTable::Opening] {
            for chunk in rows.chunks(self.chunk_size) {
                let inserted = self.write_chunk(table, chunk, &mut report);
                match table {
                    OddsTable::Current => report.inserted_current += inserted,
                    OddsTable::Opening => report.inserted_historical += inserted,
                }
            }
        }

        debug!(
            "Game {}: {} current, {} opening rows written ({} conflicts, {} failed)",
            event_id,
            report.inserted_current,
            report.inserted_historical,
            report.conflicts,
            report.failed
        );
        report
    }

    fn write_chunk(&self, table: OddsTable, chunk: &[OddsRow], report: &mut WriteReport) -> usize {
        let results = match self.db.write_odds_chunk(table, chunk) {
            Ok(results) => results,
            Err(e) if e.is_conflict() => {
                report.conflicts += chunk.len();
                return 0;
            }
            Err(e) => {
                error!(
                    "Writing {} rows to {} failed: {}",
                    chunk.len(),
                    table.name(),
                    e
                );
                report.failed += chunk.len();
                return 0;
            }
        };

        let mut inserted = 0;
        for (row, res) in chunk.iter().zip(results) {
            match res {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) if e.is_conflict() => {
                    debug!("{} {}/{} already present: {}", table.name(), row.event_id, row.odd_id, e);
                    report.conflicts += 1;
                }
                Err(e) => {
                    warn!(
                        "Unexpected error writing {} {}/{}: {}",
                        table.name(),
                        row.event_id,
                        row.odd_id,
                        e
                    );
                    report.failed += 1;
                }
            }
        }
        inserted
    }
}
