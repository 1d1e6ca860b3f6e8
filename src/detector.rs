//! Arbitrage detection over matched market pairs.
//!
//! Each pair is evaluated in both directions: buy YES on Kalshi with NO
//! on Polymarket, and the reverse. A direction is priced at its ask when
//! the book gave one, at the venue mid otherwise, and charged the
//! worst-case settlement fee.

use chrono::Utc;
use tracing::debug;

use crate::domain::{round_dp, Direction, MatchedPair, Opportunity, Outcome};

/// Per-venue fee rates, charged on the winning leg's profit.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub kalshi: f64,
    pub polymarket: f64,
}

/// Total cost of both legs including the worst-case fee.
///
/// At settlement exactly one leg pays $1.00 and the venue charges its fee
/// on that leg's profit (payout minus entry). Which side wins is unknown
/// when the trade is placed, so the larger of the two fee scenarios is
/// priced in.
fn effective_cost(yes_price: f64, no_price: f64, yes_fee_rate: f64, no_fee_rate: f64) -> f64 {
    let fee_if_yes_wins = (1.0 - yes_price).max(0.0) * yes_fee_rate;
    let fee_if_no_wins = (1.0 - no_price).max(0.0) * no_fee_rate;
    yes_price + no_price + fee_if_yes_wins.max(fee_if_no_wins)
}

/// Scan matched pairs for arbitrage in both directions.
///
/// Returns opportunities with `profit >= min_profit_cents / 100`, sorted
/// by descending ROI. Both directions of one pair may appear.
pub fn detect_opportunities(
    matched_pairs: &[MatchedPair],
    min_profit_cents: f64,
    fees: &FeeSchedule,
) -> Vec<Opportunity> {
    let min_profit = min_profit_cents / 100.0;
    let mut opportunities = Vec::new();

    for pair in matched_pairs {
        let (Some(ko), Some(po)) = (&pair.kalshi_outcome, &pair.polymarket_outcome) else {
            continue;
        };

        if let Some(opp) = check_direction(
            pair,
            Direction::KalshiYesPolymarketNo,
            ko,
            po,
            fees.kalshi,
            fees.polymarket,
            min_profit,
        ) {
            opportunities.push(opp);
        }

        if let Some(opp) = check_direction(
            pair,
            Direction::PolymarketYesKalshiNo,
            po,
            ko,
            fees.polymarket,
            fees.kalshi,
            min_profit,
        ) {
            opportunities.push(opp);
        }
    }

    opportunities.sort_by(|a, b| b.roi.partial_cmp(&a.roi).unwrap_or(std::cmp::Ordering::Equal));
    debug!(count = opportunities.len(), "Detection pass complete");
    opportunities
}

fn check_direction(
    pair: &MatchedPair,
    direction: Direction,
    yes_outcome: &Outcome,
    no_outcome: &Outcome,
    yes_fee_rate: f64,
    no_fee_rate: f64,
    min_profit: f64,
) -> Option<Opportunity> {
    // Asks are what a taker actually pays; mids are the fallback.
    let yes_price = if yes_outcome.yes_ask > 0.0 {
        yes_outcome.yes_ask
    } else {
        yes_outcome.yes_price
    };
    let no_price = if no_outcome.no_ask > 0.0 {
        no_outcome.no_ask
    } else {
        no_outcome.no_price
    };

    if yes_price <= 0.0 || no_price <= 0.0 {
        return None;
    }

    let cost = effective_cost(yes_price, no_price, yes_fee_rate, no_fee_rate);
    let profit = 1.0 - cost;
    if profit < min_profit {
        return None;
    }

    let roi = if cost > 0.0 { profit / cost * 100.0 } else { 0.0 };

    // Executable size is capped by the thinner leg; unknown depth on one
    // side defers to the other, unknown on both means unknown size.
    let yes_depth = if yes_outcome.yes_depth > 0.0 {
        yes_outcome.yes_depth
    } else {
        f64::INFINITY
    };
    let no_depth = if no_outcome.no_depth > 0.0 {
        no_outcome.no_depth
    } else {
        f64::INFINITY
    };
    let mut max_size = yes_depth.min(no_depth);
    if max_size.is_infinite() {
        max_size = 0.0;
    }

    let (kalshi_price, polymarket_price) = match direction {
        Direction::KalshiYesPolymarketNo => (yes_price, no_price),
        Direction::PolymarketYesKalshiNo => (no_price, yes_price),
    };

    Some(Opportunity {
        pair: pair.clone(),
        direction,
        cost: round_dp(cost, 4),
        profit: round_dp(profit, 4),
        roi: round_dp(roi, 2),
        max_size: round_dp(max_size, 2),
        kalshi_price,
        polymarket_price,
        timestamp: Utc::now(),
    })
}
