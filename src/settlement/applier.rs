use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info};

use crate::db::models::{Bet, BetLeg, BetStatus};
use crate::db::Database;

use super::evaluator::Outcome;

/// Profit per unit staked for an American price.
///
/// +150 → 1.5, −110 → 0.909…. A zero price (never valid) pays nothing.
pub fn profit_multiplier(american_odds: i32) -> f64 {
    match american_odds {
        0 => 0.0,
        o if o > 0 => f64::from(o) / 100.0,
        o => 100.0 / f64::from(o).abs(),
    }
}

/// Profit multiplier of a parlay counting only its winning legs.
/// Pushed or cancelled legs drop out of the product.
pub fn parlay_multiplier(legs: &[BetLeg]) -> f64 {
    legs.iter()
        .filter(|l| l.status == BetStatus::Won)
        .map(|l| 1.0 + profit_multiplier(l.american_odds))
        .product::<f64>()
        - 1.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Payout {
    /// Signed profit: positive when won, −stake when lost, 0 when void
    pub profit: f64,
    /// Amount returned to the bettor, stake included
    pub payout: f64,
}

/// Money movement for a terminal status; `None` while pending.
pub fn compute_payout(stake: f64, multiplier: f64, status: BetStatus) -> Option<Payout> {
    let payout = match status {
        BetStatus::Won => {
            let profit = round_cents(stake * multiplier);
            Payout {
                profit,
                payout: round_cents(stake + profit),
            }
        }
        BetStatus::Lost => Payout {
            profit: -stake,
            payout: 0.0,
        },
        BetStatus::Void | BetStatus::Cancelled => Payout {
            profit: 0.0,
            payout: stake,
        },
        BetStatus::Pending => return None,
    };
    Some(payout)
}

/// Potential payout at placement time.
pub fn potential_payout(stake: f64, american_odds: i32) -> f64 {
    round_cents(stake * (1.0 + profit_multiplier(american_odds)))
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Win multiplier for a bet: its own price, or for a parlay with pushed
/// legs, the product over the legs that actually won.
fn won_multiplier(bet: &Bet) -> f64 {
    let has_void_leg = bet
        .legs
        .iter()
        .any(|l| matches!(l.status, BetStatus::Void | BetStatus::Cancelled));
    if bet.is_parlay() && has_void_leg {
        parlay_multiplier(&bet.legs)
    } else {
        profit_multiplier(bet.american_odds)
    }
}

/// Write a terminal outcome onto a pending bet, exactly once.
///
/// Returns the updated bet, or `None` when the outcome is still pending or
/// the bet was already settled (here or by a concurrent run).
pub fn apply(db: &Database, bet: &Bet, outcome: &Outcome) -> Result<Option<Bet>> {
    let Some(id) = bet.id else {
        anyhow::bail!("cannot settle a bet without an id");
    };
    if bet.status.is_terminal() || !outcome.status.is_terminal() {
        return Ok(None);
    }
    let Some(payout) = compute_payout(bet.stake, won_multiplier(bet), outcome.status) else {
        return Ok(None);
    };

    let settled_at = Utc::now();
    let written = db
        .settle_bet(
            id,
            outcome.status,
            &outcome.reason,
            payout.profit,
            payout.payout,
            settled_at,
        )
        .with_context(|| format!("settling bet {}", id))?;
    if !written {
        debug!("Bet {} was already settled; leaving it untouched", id);
        return Ok(None);
    }

    info!(
        "Bet {} settled {} (profit {:+.2}, payout {:.2}): {}",
        id, outcome.status, payout.profit, payout.payout, outcome.reason
    );
    Ok(Some(Bet {
        status: outcome.status,
        result: Some(outcome.reason.clone()),
        profit: Some(payout.profit),
        actual_payout: Some(payout.payout),
        settled_at: Some(settled_at),
        ..bet.clone()
    }))
}
