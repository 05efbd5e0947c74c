use clap::Parser;

/// Sportsbook odds consolidation and bet settlement service
#[derive(Parser, Debug, Clone)]
#[command(name = "odds-settler", version, about)]
pub struct Config {
    /// Run the settlement job once, print the JSON summary and exit
    #[arg(long, env = "RUN_ONCE", default_value = "false")]
    pub once: bool,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "odds.db")]
    pub database_path: String,

    /// Odds provider API base URL
    #[arg(
        long,
        env = "ODDS_API_URL",
        default_value = "https://api.sportsgameodds.com/v2"
    )]
    pub odds_api_url: String,

    /// Odds provider API key
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// Leagues to fetch, comma separated
    #[arg(
        long,
        env = "SPORTS",
        value_delimiter = ',',
        default_value = "NBA,NFL,MLB,NHL,NCAAB,NCAAF"
    )]
    pub sports: Vec<String>,

    /// Days before today to fetch as well (1 = today and yesterday)
    #[arg(long, env = "LOOKBACK_DAYS", default_value = "1")]
    pub lookback_days: u32,

    /// HTTP API listen address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8080")]
    pub api_addr: String,

    /// Seconds between scheduled settlement runs
    #[arg(long, env = "SETTLE_INTERVAL_SECS", default_value = "900")]
    pub settle_interval_secs: u64,

    /// Odds rows per store transaction
    #[arg(long, env = "WRITE_CHUNK_SIZE", default_value = "100")]
    pub write_chunk_size: usize,

    /// Retries per provider request on rate limits and server errors
    #[arg(long, env = "FETCH_MAX_RETRIES", default_value = "3")]
    pub fetch_max_retries: u32,

    /// Provider request timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "30")]
    pub fetch_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.odds_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => anyhow::bail!("ODDS_API_KEY is required"),
        }
        if self.sports.iter().all(|s| s.trim().is_empty()) {
            anyhow::bail!("at least one sport must be configured");
        }
        if self.lookback_days > 30 {
            anyhow::bail!("lookback_days must be at most 30");
        }
        if self.write_chunk_size == 0 {
            anyhow::bail!("write_chunk_size must be positive");
        }
        if self.settle_interval_secs == 0 {
            anyhow::bail!("settle_interval_secs must be positive");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        if self.fetch_max_retries > 10 {
            anyhow::bail!("fetch_max_retries must be at most 10");
        }
        Ok(())
    }

    /// Configured leagues, trimmed and upper-cased, without blanks.
    pub fn sport_list(&self) -> Vec<String> {
        self.sports
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
