//! Detected arbitrage opportunities and their wire representation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::matched::MatchedPair;
use super::round_dp;

/// Which venue takes the YES leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    KalshiYesPolymarketNo,
    PolymarketYesKalshiNo,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::KalshiYesPolymarketNo => "YES on Kalshi + NO on Polymarket",
            Direction::PolymarketYesKalshiNo => "YES on Polymarket + NO on Kalshi",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "YES on Kalshi + NO on Polymarket" => Ok(Direction::KalshiYesPolymarketNo),
            "YES on Polymarket + NO on Kalshi" => Ok(Direction::PolymarketYesKalshiNo),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// A detected arbitrage on one matched pair in one direction.
///
/// `cost` already includes the worst-case settlement fee, so
/// `cost + profit == 1.0` holds exactly (up to rounding).
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub pair: MatchedPair,
    pub direction: Direction,
    pub cost: f64,
    pub profit: f64,
    /// Profit as a percentage of committed cost.
    pub roi: f64,
    /// Executable contracts, limited by the thinner leg. 0.0 when unknown.
    pub max_size: f64,
    /// The Kalshi leg price actually used (ask or mid).
    pub kalshi_price: f64,
    /// The Polymarket leg price actually used (ask or mid).
    pub polymarket_price: f64,
    pub timestamp: DateTime<Utc>,
}

impl Opportunity {
    /// Wire form consumed by the REST/WebSocket layer. Field names are a
    /// published contract; do not rename.
    pub fn snapshot(&self) -> OpportunitySnapshot {
        let km = &self.pair.kalshi_market;
        let pm = &self.pair.polymarket_market;
        OpportunitySnapshot {
            kalshi_title: km.title.clone(),
            polymarket_title: pm.title.clone(),
            kalshi_ticker: km.ticker.clone(),
            similarity: round_dp(self.pair.similarity, 1),
            direction: self.direction.to_string(),
            kalshi_price: round_dp(self.kalshi_price, 4),
            polymarket_price: round_dp(self.polymarket_price, 4),
            cost: round_dp(self.cost, 4),
            profit: round_dp(self.profit, 4),
            roi: round_dp(self.roi, 2),
            max_size: round_dp(self.max_size, 2),
            timestamp: self.timestamp.to_rfc3339(),
            expiry: self.pair.expiry().map(|e| e.to_rfc3339()),
            kalshi_url: km.url.clone(),
            polymarket_url: pm.url.clone(),
        }
    }
}

/// Serialized opportunity, shaped for API compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunitySnapshot {
    pub kalshi_title: String,
    pub polymarket_title: String,
    pub kalshi_ticker: String,
    pub similarity: f64,
    pub direction: String,
    pub kalshi_price: f64,
    pub polymarket_price: f64,
    pub cost: f64,
    pub profit: f64,
    pub roi: f64,
    pub max_size: f64,
    pub timestamp: String,
    pub expiry: Option<String>,
    pub kalshi_url: String,
    pub polymarket_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Market, Outcome, Venue};

    fn sample_pair() -> MatchedPair {
        let km = Market {
            venue: Venue::Kalshi,
            id: "KXBTC-25DEC31".into(),
            title: "Bitcoin above $100k on Dec 31?".into(),
            event_title: "KXBTC".into(),
            outcomes: vec![Outcome {
                name: "Bitcoin above $100k on Dec 31?".into(),
                token_id: "KXBTC-25DEC31".into(),
                yes_price: 0.45,
                no_price: 0.55,
                ..Outcome::default()
            }],
            expiration: None,
            volume: 1000.0,
            url: "https://kalshi.com/markets/kxbtc/kxbtc-25dec31".into(),
            ticker: "KXBTC-25DEC31".into(),
        };
        let pm = Market {
            venue: Venue::Polymarket,
            id: "931".into(),
            title: "Will Bitcoin be above $100k on Dec 31?".into(),
            event_title: "Bitcoin".into(),
            outcomes: vec![Outcome {
                name: "Yes".into(),
                token_id: "7131".into(),
                yes_price: 0.47,
                no_price: 0.53,
                ..Outcome::default()
            }],
            expiration: None,
            volume: 5000.0,
            url: "https://polymarket.com/event/bitcoin-100k".into(),
            ticker: "0xabc".into(),
        };
        MatchedPair::new(km, pm, 91.3)
    }

    #[test]
    fn direction_round_trips_through_string_form() {
        for direction in [
            Direction::KalshiYesPolymarketNo,
            Direction::PolymarketYesKalshiNo,
        ] {
            let parsed: Direction = direction.as_str().parse().unwrap();
            assert_eq!(parsed, direction);
        }
        assert!("YES on both".parse::<Direction>().is_err());
    }

    #[test]
    fn snapshot_carries_all_contracted_fields() {
        let opp = Opportunity {
            pair: sample_pair(),
            direction: Direction::KalshiYesPolymarketNo,
            cost: 0.9885,
            profit: 0.0115,
            roi: 1.16,
            max_size: 60.0,
            kalshi_price: 0.45,
            polymarket_price: 0.5385,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(opp.snapshot()).unwrap();
        for field in [
            "kalshi_title",
            "polymarket_title",
            "kalshi_ticker",
            "similarity",
            "direction",
            "kalshi_price",
            "polymarket_price",
            "cost",
            "profit",
            "roi",
            "max_size",
            "timestamp",
            "expiry",
            "kalshi_url",
            "polymarket_url",
        ] {
            assert!(value.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(value["similarity"], 91.3);
        assert_eq!(value["direction"], "YES on Kalshi + NO on Polymarket");
    }
}
