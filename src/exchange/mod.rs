//! Venue clients for market discovery and order book enrichment.

pub mod http;
pub mod kalshi;
pub mod polymarket;

use async_trait::async_trait;

use crate::domain::{Market, Venue};
use crate::error::Result;

pub use kalshi::KalshiClient;
pub use polymarket::PolymarketClient;

/// Discovery and enrichment operations common to both venues.
///
/// Implementations absorb per-page failures during discovery and return
/// whatever was collected; a hard error is reserved for conditions that
/// invalidate the whole fetch.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Fetch up to `max_markets` currently-tradable markets.
    async fn fetch_active_markets(&self, max_markets: usize) -> Result<Vec<Market>>;

    /// Populate ask/bid/depth on the market's outcomes from live books.
    ///
    /// Book fetch failures are logged and leave the affected fields at 0.
    async fn enrich_outcomes_with_orderbook(&self, market: &mut Market) -> Result<()>;

    /// Release the underlying HTTP client.
    async fn close(&self);
}
