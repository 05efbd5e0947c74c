use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod api;
mod config;
mod db;
mod error;
mod odds;
mod provider;
mod settlement;

use api::AppState;
use config::Config;
use db::Database;
use provider::{OddsProvider, SportsGameOdds};
use settlement::SettlementJob;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let provider: Arc<dyn OddsProvider> = Arc::new(SportsGameOdds::new(
        config.odds_api_key.as_deref().unwrap_or_default(),
        Some(&config.odds_api_url),
        Duration::from_secs(config.fetch_timeout_secs),
        config.fetch_max_retries,
    )?);
    let sports = config.sport_list();
    info!(
        "Odds provider {}; sports {}; lookback {} day(s)",
        provider.name(),
        sports.join(","),
        config.lookback_days
    );

    let job = SettlementJob::new(
        db.clone(),
        provider,
        sports,
        config.lookback_days,
        config.write_chunk_size,
    );
    let state = Arc::new(AppState::new(db, job));

    if config.once {
        return match state.run_settlement().await {
            Ok(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                Ok(())
            }
            Err(e) => {
                let body = serde_json::json!({ "success": false, "error": format!("{:#}", e) });
                println!("{}", body);
                Err(e)
            }
        };
    }

    // Scheduled settlement runs
    let scheduler_state = state.clone();
    let interval = Duration::from_secs(config.settle_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = scheduler_state.run_settlement().await {
                error!("Scheduled settlement run failed: {:#}", e);
            }
        }
    });

    let app = api::router(state);
    let addr: SocketAddr = config.api_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run API server (blocks until shutdown)
    axum::serve(listener, app).await?;

    Ok(())
}
