//! Cross-venue market pairings.

use chrono::{DateTime, Utc};

use super::market::{Market, Outcome};

/// An asserted semantic equivalence between a Kalshi market and a
/// Polymarket market, scored 0-100.
///
/// The primary outcomes are snapshots of each market's first outcome and
/// must be re-linked after order book enrichment mutates the markets.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub kalshi_market: Market,
    pub polymarket_market: Market,
    pub similarity: f64,
    pub kalshi_outcome: Option<Outcome>,
    pub polymarket_outcome: Option<Outcome>,
}

impl MatchedPair {
    pub fn new(kalshi_market: Market, polymarket_market: Market, similarity: f64) -> Self {
        let kalshi_outcome = kalshi_market.primary_outcome().cloned();
        let polymarket_outcome = polymarket_market.primary_outcome().cloned();
        Self {
            kalshi_market,
            polymarket_market,
            similarity,
            kalshi_outcome,
            polymarket_outcome,
        }
    }

    /// Refresh the primary-outcome snapshots from the owned markets.
    pub fn relink_outcomes(&mut self) {
        if let Some(outcome) = self.kalshi_market.primary_outcome() {
            self.kalshi_outcome = Some(outcome.clone());
        }
        if let Some(outcome) = self.polymarket_market.primary_outcome() {
            self.polymarket_outcome = Some(outcome.clone());
        }
    }

    /// Earliest known expiry, preferring the Kalshi side.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.kalshi_market
            .expiration
            .or(self.polymarket_market.expiration)
    }
}
