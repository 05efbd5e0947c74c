use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::{OddsProvider, ProviderEvent};
use crate::db::models::{Game, GameStatus};

const DEFAULT_BASE_URL: &str = "https://api.sportsgameodds.com/v2";
const PAGE_LIMIT: usize = 50;
/// Upper bound on cursor pages per (sport, date) request.
const MAX_PAGES: usize = 20;
const BASE_BACKOFF_MS: u64 = 500;

/// Odds provider backed by the SportsGameOdds events API.
pub struct SportsGameOdds {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
    max_retries: u32,
}

impl SportsGameOdds {
    pub fn new(
        api_key: &str,
        base_url: Option<&str>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(SportsGameOdds {
            http,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            max_retries,
        })
    }

    /// Events endpoint for one league and one UTC day.
    fn events_url(&self, sport: &str, date: NaiveDate, cursor: Option<&str>) -> Result<Url> {
        let start = date
            .and_hms_opt(0, 0, 0)
            .context("invalid date")?
            .and_utc();
        let end = start + ChronoDuration::days(1);

        let mut url = Url::parse(&format!("{}/events", self.base_url))
            .with_context(|| format!("invalid provider base URL {}", self.base_url))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("leagueID", sport);
            q.append_pair("startsAfter", &start.to_rfc3339());
            q.append_pair("startsBefore", &end.to_rfc3339());
            q.append_pair("limit", &PAGE_LIMIT.to_string());
            if let Some(cursor) = cursor {
                q.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }

    /// GET one page, retrying rate limits, server errors and transport
    /// failures with jittered exponential backoff.
    async fn get_page(&self, url: &Url) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .http
                .get(url.clone())
                .header("x-api-key", &self.api_key)
                .send()
                .await;

            let retry_reason = match outcome {
                Ok(resp) if resp.status().is_success() => {
                    return resp
                        .json::<Value>()
                        .await
                        .context("Failed to parse SportsGameOdds response");
                }
                Ok(resp) if is_retryable(resp.status()) => format!("status {}", resp.status()),
                Ok(resp) => anyhow::bail!("SportsGameOdds error: {}", resp.status()),
                Err(e) => format!("transport error: {}", e),
            };

            if attempt >= self.max_retries {
                anyhow::bail!(
                    "SportsGameOdds request failed after {} attempts: {}",
                    attempt + 1,
                    retry_reason
                );
            }
            let delay = backoff_delay(attempt);
            warn!(
                "SportsGameOdds {} ({}); retrying in {}ms",
                url.path(),
                retry_reason,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[async_trait]
impl OddsProvider for SportsGameOdds {
    fn name(&self) -> &str {
        "SportsGameOdds"
    }

    async fn fetch_events(&self, sport: &str, date: NaiveDate) -> Result<Vec<ProviderEvent>> {
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 0..MAX_PAGES {
            let url = self.events_url(sport, date, cursor.as_deref())?;
            debug!("Fetching {} events for {} (page {})", sport, date, page + 1);
            let raw = self.get_page(&url).await?;

            if raw["success"].as_bool() == Some(false) {
                anyhow::bail!(
                    "SportsGameOdds rejected request: {}",
                    raw["error"].as_str().unwrap_or("unknown error")
                );
            }
            events.extend(parse_events(&raw, sport));

            match raw["nextCursor"].as_str().filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next.to_string()),
                None => return Ok(events),
            }
        }

        warn!(
            "{} events for {}: stopped after {} pages",
            sport, date, MAX_PAGES
        );
        Ok(events)
    }
}

fn status_from_flags(status: &Value) -> GameStatus {
    let flag = |key: &str| status[key].as_bool().unwrap_or(false);
    if flag("cancelled") || flag("delayed") {
        return GameStatus::Postponed;
    }
    if flag("completed") || flag("ended") || flag("finalized") {
        return GameStatus::Finished;
    }
    let display = status["displayShort"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase();
    if matches!(display.as_str(), "ht" | "half" | "halftime") {
        return GameStatus::HalfTime;
    }
    if flag("live") || flag("started") {
        return GameStatus::InProgress;
    }
    GameStatus::NotStarted
}

fn team_name(team: &Value) -> Option<String> {
    ["long", "medium", "short"]
        .iter()
        .find_map(|k| team["names"][*k].as_str())
        .or_else(|| team["teamID"].as_str())
        .map(str::to_string)
}

fn parse_score(v: &Value) -> Option<i32> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f.round() as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|n| i32::try_from(n).ok())
}

/// Final or running score of one side: the team object first, then the
/// full-game results block.
fn side_score(ev: &Value, side: &str) -> Option<i32> {
    parse_score(&ev["teams"][side]["score"])
        .or_else(|| parse_score(&ev["results"]["game"][side]["points"]))
}

fn parse_events(raw: &Value, sport: &str) -> Vec<ProviderEvent> {
    let events = match raw["data"].as_array() {
        Some(a) => a,
        None => return vec![],
    };

    events
        .iter()
        .filter_map(|ev| {
            let event_id = ev["eventID"].as_str()?.to_string();
            let home_team = team_name(&ev["teams"]["home"])?;
            let away_team = team_name(&ev["teams"]["away"])?;
            let starts_at = ev["status"]["startsAt"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            let league = ev["leagueID"].as_str().unwrap_or(sport).to_string();

            let odds = match &ev["odds"] {
                Value::Object(_) => ev["odds"].clone(),
                _ => Value::Object(Default::default()),
            };

            Some(ProviderEvent {
                game: Game {
                    display_name: format!("{} @ {}", away_team, home_team),
                    event_id,
                    sport: league,
                    home_team,
                    away_team,
                    status: status_from_flags(&ev["status"]),
                    home_score: side_score(ev, "home"),
                    away_score: side_score(ev, "away"),
                    starts_at,
                },
                odds,
            })
        })
        .collect()
}
