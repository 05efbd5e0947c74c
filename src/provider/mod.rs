pub mod sportsgameodds;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::db::models::Game;

pub use sportsgameodds::SportsGameOdds;

/// One event as returned by an odds provider: the game itself plus its raw
/// per-market `odds` map, left for the normalizer.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub game: Game,
    pub odds: Value,
}

/// Trait that every upstream odds provider must implement.
#[async_trait]
pub trait OddsProvider: Send + Sync {
    /// All events of `sport` starting on `date` (UTC), with their odds.
    async fn fetch_events(&self, sport: &str, date: NaiveDate) -> Result<Vec<ProviderEvent>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
