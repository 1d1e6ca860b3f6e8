//! Control-plane read models and settings mutation.
//!
//! The HTTP layer reads these snapshots statelessly and posts
//! [`SettingsUpdate`] bodies; nothing here holds scanner state.

use serde::{Deserialize, Serialize};

use crate::domain::{round_dp, MatchedPair};

/// Row in the matched-markets listing.
#[derive(Debug, Clone, Serialize)]
pub struct MatchedMarketSummary {
    pub kalshi_title: String,
    pub kalshi_ticker: String,
    pub kalshi_url: String,
    pub polymarket_title: String,
    pub polymarket_url: String,
    pub similarity: f64,
    pub expiry: Option<String>,
    pub kalshi_yes: f64,
    pub kalshi_no: f64,
    pub poly_yes: f64,
    pub poly_no: f64,
}

impl From<&MatchedPair> for MatchedMarketSummary {
    fn from(pair: &MatchedPair) -> Self {
        let ko = pair.kalshi_outcome.as_ref();
        let po = pair.polymarket_outcome.as_ref();
        Self {
            kalshi_title: pair.kalshi_market.title.clone(),
            kalshi_ticker: pair.kalshi_market.ticker.clone(),
            kalshi_url: pair.kalshi_market.url.clone(),
            polymarket_title: pair.polymarket_market.title.clone(),
            polymarket_url: pair.polymarket_market.url.clone(),
            similarity: round_dp(pair.similarity, 1),
            expiry: pair.expiry().map(|e| e.to_rfc3339()),
            kalshi_yes: ko.map_or(0.0, |o| round_dp(o.yes_price, 4)),
            kalshi_no: ko.map_or(0.0, |o| round_dp(o.no_price, 4)),
            poly_yes: po.map_or(0.0, |o| round_dp(o.yes_price, 4)),
            poly_no: po.map_or(0.0, |o| round_dp(o.no_price, 4)),
        }
    }
}

/// Full stats block exposed to the REST layer.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub kalshi_markets: usize,
    pub polymarket_markets: usize,
    pub matched_pairs: usize,
    pub active_opportunities: usize,
    pub total_scans: u64,
    pub last_scan: Option<String>,
    pub is_running: bool,
    pub scan_interval: u64,
    pub auto_execute: bool,
    /// Most recent errors, oldest first, capped at five.
    pub errors: Vec<String>,
}

/// Partial settings mutation; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub scan_interval: Option<u64>,
    pub min_profit_cents: Option<f64>,
    pub match_threshold: Option<u32>,
    pub auto_execute: Option<bool>,
    pub max_position_usd: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Market, Outcome, Venue};

    #[test]
    fn settings_update_accepts_partial_bodies() {
        let update: SettingsUpdate =
            serde_json::from_str(r#"{"min_profit_cents": 3.5, "auto_execute": true}"#).unwrap();
        assert_eq!(update.min_profit_cents, Some(3.5));
        assert_eq!(update.auto_execute, Some(true));
        assert!(update.scan_interval.is_none());
        assert!(update.match_threshold.is_none());
    }

    #[test]
    fn summary_rounds_prices_and_similarity() {
        let kalshi = Market {
            venue: Venue::Kalshi,
            id: "K1".into(),
            title: "Will X happen?".into(),
            event_title: String::new(),
            outcomes: vec![Outcome {
                yes_price: 0.52349,
                no_price: 0.47651,
                ..Outcome::default()
            }],
            expiration: None,
            volume: 0.0,
            url: "https://kalshi.com/markets/kx/kx-1".into(),
            ticker: "K1".into(),
        };
        let polymarket = Market {
            venue: Venue::Polymarket,
            id: "P1".into(),
            title: "Will X happen?".into(),
            event_title: String::new(),
            outcomes: vec![Outcome {
                yes_price: 0.51,
                no_price: 0.49,
                ..Outcome::default()
            }],
            expiration: None,
            volume: 0.0,
            url: "https://polymarket.com/event/x".into(),
            ticker: "0xa".into(),
        };
        let pair = MatchedPair::new(kalshi, polymarket, 87.654);

        let summary = MatchedMarketSummary::from(&pair);
        assert_eq!(summary.similarity, 87.7);
        assert_eq!(summary.kalshi_yes, 0.5235);
        assert_eq!(summary.poly_no, 0.49);
        assert!(summary.expiry.is_none());
    }
}
