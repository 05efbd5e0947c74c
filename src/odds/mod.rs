pub mod bookmakers;
pub mod consolidator;
pub mod normalizer;
pub mod writer;

pub use consolidator::consolidate;
pub use normalizer::{normalize_odds_map, MarketFamily, Side};
pub use writer::OddsWriter;
