//! Markets and outcomes as normalized from the venue APIs.
//!
//! All prices are stored as fractions of the $1.00 payout (0.0 to 1.0).
//! Venue clients are responsible for dividing cent-denominated inputs by
//! 100 before constructing these types. Fields that the venue did not
//! report are left at 0.0, never negative.

use std::fmt;

use chrono::{DateTime, Utc};

/// The trading venue a market belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    Kalshi,
    Polymarket,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Kalshi => write!(f, "kalshi"),
            Venue::Polymarket => write!(f, "polymarket"),
        }
    }
}

/// One side of a binary market.
///
/// `yes_price` / `no_price` are venue-reported mids. The ask/bid/depth
/// fields are populated later from order book enrichment; until then
/// they stay at 0.0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub name: String,
    /// Venue-local handle for this outcome (Kalshi ticker, Polymarket CLOB token id).
    pub token_id: String,
    pub yes_price: f64,
    pub no_price: f64,
    pub yes_ask: f64,
    pub no_ask: f64,
    pub yes_bid: f64,
    pub no_bid: f64,
    /// Contracts available at the best YES level.
    pub yes_depth: f64,
    /// Contracts available at the best NO level.
    pub no_depth: f64,
}

/// A tradable question on one venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Market {
    pub venue: Venue,
    /// Venue-unique identifier (Kalshi market ticker, Polymarket Gamma id).
    pub id: String,
    pub title: String,
    pub event_title: String,
    pub outcomes: Vec<Outcome>,
    pub expiration: Option<DateTime<Utc>>,
    /// 24h traded volume in USD.
    pub volume: f64,
    /// Canonical human-facing URL.
    pub url: String,
    pub ticker: String,
}

impl Market {
    /// The outcome used for cross-venue comparison (the first one).
    pub fn primary_outcome(&self) -> Option<&Outcome> {
        self.outcomes.first()
    }
}
