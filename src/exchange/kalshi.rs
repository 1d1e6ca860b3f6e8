//! Kalshi market discovery and order book enrichment.
//!
//! Discovery combines a targeted sweep over known series tickers with a
//! broad pass over the events API, deduplicating by market ticker. The
//! series sweep finds the long tail the volume-sorted events pages miss.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use super::http::Http;
use super::VenueClient;
use crate::config::KalshiConfig;
use crate::domain::{round_dp, Market, Outcome, Venue};
use crate::error::Result;

/// All major Kalshi series worth scanning for cross-venue arbitrage:
/// crypto, indices, sports, economics, weather, politics, entertainment.
pub const DEFAULT_SERIES_TICKERS: &[&str] = &[
    // Crypto
    "KXBTC", "KXBTCD", "KXETH", "KXETHD", "KXXRP", "KXXRPD",
    "KXDOGE", "KXDOGED", "KXSOLD", "KXSOLE",
    // Stock indices
    "KXINX",
    // Sports - NBA
    "KXNBA", "KXNBASPREAD", "KXNBATOTAL", "KXNBAPTS",
    "KXNBAREB", "KXNBAAST", "KXNBAWINS",
    "KXMVENBASINGLEGAME",
    // Sports - NCAA basketball
    "KXNCAAMBGAME", "KXNCAAMBTOTAL", "KXNCAAMBSPREAD",
    "KXNCAAMB1HSPREAD", "KXNCAAMB1HTOTAL", "KXNCAAMB1HWINNER",
    "KXNCAAWBGAME",
    // Sports - NFL / NCAA football
    "KXNEXTTEAMNFL", "KXNCAAF", "KXNFLDRAFTPICK",
    // Sports - NHL, MLB, golf, other
    "KXNHL", "KXNHLTOTAL", "KXMLB", "KXPGATOUR", "KXPGATOP5",
    "KXPGATOP10", "KXPGATOP20", "KXPGAMAKECUT",
    "KXWCGAME", "KXWCROUND", "KXMARMADROUND", "KXMAKEMARMAD",
    "KXDPWORLDTOUR", "KXDPWORLDTOURR1LEAD",
    // Economics
    "KXFEDDECISION", "KXFED", "KXCPI", "KXGDP", "KXGDPNOM",
    "KXPAYROLLS", "KXECONSTATCPIYOY", "KXECONSTATCORECPIYOY",
    "KXECONSTATU3",
    // Weather
    "KXHIGHNY", "KXHIGHCHI", "KXHIGHMIA",
    // Politics
    "KXHOUSERACE", "KXTXPRIMARY",
    // Entertainment
    "KXALBUMSALES", "KXALBUMRELEASE", "KX10SONG",
];

const MAX_PER_SERIES: usize = 500;
const SERIES_PAGE_LIMIT: u32 = 200;
const SERIES_BATCH_SIZE: usize = 8;
const SERIES_BATCH_PAUSE: Duration = Duration::from_millis(300);
const SERIES_PAGE_PAUSE: Duration = Duration::from_millis(100);
const MAX_EVENTS: usize = 500;
const MAX_EVENT_PAGES: usize = 30;
const EVENTS_PAGE_LIMIT: u32 = 100;
const EVENTS_PAGE_PAUSE: Duration = Duration::from_millis(150);

#[derive(Debug, Deserialize)]
struct MarketsPage {
    #[serde(default)]
    markets: Vec<RawMarket>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    events: Vec<RawEvent>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    markets: Vec<RawMarket>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMarket {
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    subtitle: String,
    #[serde(default)]
    yes_price: Option<f64>,
    #[serde(default)]
    no_price: Option<f64>,
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    expiration_time: Option<String>,
    #[serde(default)]
    close_time: Option<String>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    event_ticker: Option<String>,
    #[serde(default)]
    series_ticker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderbookResponse {
    #[serde(default)]
    orderbook: RawOrderbook,
}

/// Book levels are `[price, size]` pairs, best level first, with the
/// price quoted in cents. Both sides are resting bids.
#[derive(Debug, Default, Deserialize)]
struct RawOrderbook {
    #[serde(default)]
    yes: Vec<Vec<f64>>,
    #[serde(default)]
    no: Vec<Vec<f64>>,
}

/// Client for Kalshi's REST API v2.
pub struct KalshiClient {
    base_url: String,
    series: Vec<String>,
    http: Http,
}

impl KalshiClient {
    pub fn new(config: &KalshiConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            series: config.series_tickers.clone(),
            http: Http::new("kalshi", config.max_rps),
        }
    }

    /// Fetch open markets for one series, absorbing page failures.
    async fn fetch_series(&self, series_ticker: &str) -> Vec<Market> {
        let url = format!("{}/markets", self.base_url);
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        while markets.len() < MAX_PER_SERIES {
            let mut query = vec![
                ("series_ticker", series_ticker.to_string()),
                ("status", "open".to_string()),
                ("limit", SERIES_PAGE_LIMIT.to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }

            let page: MarketsPage = match self.http.get_json(&url, &query).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(series = series_ticker, error = %e, "Kalshi series fetch failed");
                    break;
                }
            };

            let empty_page = page.markets.is_empty();
            for raw in page.markets {
                if let Some(market) = parse_market(raw, series_ticker) {
                    markets.push(market);
                }
            }

            cursor = page.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || empty_page {
                break;
            }
            sleep(SERIES_PAGE_PAUSE).await;
        }

        markets
    }

    /// Fetch open events with nested markets for broad coverage.
    async fn fetch_events(&self) -> Vec<RawEvent> {
        let url = format!("{}/events", self.base_url);
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        while events.len() < MAX_EVENTS && pages < MAX_EVENT_PAGES {
            let mut query = vec![
                ("status", "open".to_string()),
                ("limit", EVENTS_PAGE_LIMIT.to_string()),
                ("with_nested_markets", "true".to_string()),
            ];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }

            let page: EventsPage = match self.http.get_json(&url, &query).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "Kalshi events fetch failed");
                    break;
                }
            };

            let empty_page = page.events.is_empty();
            for event in page.events {
                events.push(event);
                if events.len() >= MAX_EVENTS {
                    break;
                }
            }

            cursor = page.cursor.filter(|c| !c.is_empty());
            if cursor.is_none() || empty_page {
                break;
            }
            pages += 1;
            sleep(EVENTS_PAGE_PAUSE).await;
        }

        events
    }
}

#[async_trait]
impl VenueClient for KalshiClient {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn fetch_active_markets(&self, max_markets: usize) -> Result<Vec<Market>> {
        // Series sweep, batched to avoid rate-limit storms.
        let mut series_markets = Vec::new();
        let batches: Vec<&[String]> = self.series.chunks(SERIES_BATCH_SIZE).collect();
        for (i, batch) in batches.iter().enumerate() {
            let results = join_all(batch.iter().map(|s| self.fetch_series(s))).await;
            for batch_markets in results {
                series_markets.extend(batch_markets);
            }
            if i + 1 < batches.len() {
                sleep(SERIES_BATCH_PAUSE).await;
            }
        }

        let events = self.fetch_events().await;

        // Merge: series results first, events fill in unseen markets.
        let mut seen: HashSet<String> = HashSet::new();
        let mut markets = Vec::new();
        for market in series_markets {
            if markets.len() >= max_markets {
                break;
            }
            if seen.insert(market.id.clone()) {
                markets.push(market);
            }
        }

        let mut events_added = 0usize;
        'events: for event in events {
            for raw in event.markets {
                if markets.len() >= max_markets {
                    break 'events;
                }
                if let Some(market) = parse_market(raw, &event.title) {
                    if seen.insert(market.id.clone()) {
                        markets.push(market);
                        events_added += 1;
                    }
                }
            }
        }

        info!(
            total = markets.len(),
            from_events = events_added,
            series_swept = self.series.len(),
            "Kalshi markets fetched"
        );
        Ok(markets)
    }

    async fn enrich_outcomes_with_orderbook(&self, market: &mut Market) -> Result<()> {
        let url = format!("{}/markets/{}/orderbook", self.base_url, market.ticker);
        let response: OrderbookResponse = match self.http.get_json(&url, &[]).await {
            Ok(response) => response,
            Err(e) => {
                warn!(ticker = %market.ticker, error = %e, "Kalshi orderbook fetch failed");
                return Ok(());
            }
        };
        apply_orderbook(market, &response.orderbook);
        Ok(())
    }

    async fn close(&self) {
        self.http.close();
    }
}

fn parse_market(raw: RawMarket, event_title: &str) -> Option<Market> {
    if raw.ticker.is_empty() || raw.title.is_empty() {
        return None;
    }

    let mut yes_price = raw.yes_price.unwrap_or(0.0);
    let mut no_price = raw.no_price.unwrap_or(0.0);
    if yes_price == 0.0 && no_price == 0.0 {
        let last_price = raw.last_price.unwrap_or(0.0);
        if last_price > 0.0 {
            yes_price = if last_price > 1.0 {
                last_price / 100.0
            } else {
                last_price
            };
            no_price = round_dp(1.0 - yes_price, 4);
        }
    }
    if yes_price > 1.0 {
        yes_price /= 100.0;
    }
    if no_price > 1.0 {
        no_price /= 100.0;
    }

    let outcome = Outcome {
        name: raw.title.clone(),
        token_id: raw.ticker.clone(),
        yes_price,
        no_price,
        ..Outcome::default()
    };

    let expiration = raw
        .expiration_time
        .as_deref()
        .or(raw.close_time.as_deref())
        .and_then(parse_timestamp);

    let event_ticker = raw.event_ticker.unwrap_or_default();
    // Kalshi URLs link to the event page: /markets/{series}/{event_ticker}.
    let mut series = raw.series_ticker.unwrap_or_default();
    if series.is_empty() && !event_ticker.is_empty() {
        series = event_ticker.split('-').next().unwrap_or_default().to_string();
    }
    if series.is_empty() {
        series = raw.ticker.split('-').next().unwrap_or_default().to_string();
    }
    let event_slug = if event_ticker.is_empty() {
        raw.ticker.to_lowercase()
    } else {
        event_ticker.to_lowercase()
    };
    let url = format!(
        "https://kalshi.com/markets/{}/{}",
        series.to_lowercase(),
        event_slug
    );

    let event_title = if !event_title.is_empty() {
        event_title.to_string()
    } else if !raw.subtitle.is_empty() {
        raw.subtitle.clone()
    } else {
        event_ticker.clone()
    };

    Some(Market {
        venue: Venue::Kalshi,
        id: raw.ticker.clone(),
        title: raw.title,
        event_title,
        outcomes: vec![outcome],
        expiration,
        volume: raw.volume.unwrap_or(0.0),
        url,
        ticker: raw.ticker,
    })
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn apply_orderbook(market: &mut Market, book: &RawOrderbook) {
    let yes_best = best_level(&book.yes);
    let no_best = best_level(&book.no);

    for outcome in market.outcomes.iter_mut() {
        if let Some((price, size)) = yes_best {
            outcome.yes_bid = price;
            outcome.yes_depth = size;
        }
        if let Some((price, size)) = no_best {
            outcome.no_bid = price;
            outcome.no_depth = size;
        }
        // Asks derive from the opposite side's bid: selling NO at p fills
        // a YES buy at 1 - p.
        if outcome.no_bid > 0.0 {
            outcome.yes_ask = round_dp(1.0 - outcome.no_bid, 4);
        }
        if outcome.yes_bid > 0.0 {
            outcome.no_ask = round_dp(1.0 - outcome.yes_bid, 4);
        }
    }
}

fn best_level(levels: &[Vec<f64>]) -> Option<(f64, f64)> {
    let level = levels.first()?;
    let mut price = *level.first()?;
    if price > 1.0 {
        price /= 100.0;
    }
    let size = level.get(1).copied().unwrap_or(0.0);
    Some((price, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawMarket {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_cent_prices_to_fractions() {
        let market = parse_market(
            raw(json!({
                "ticker": "KXBTC-25DEC31-T100",
                "title": "Bitcoin above $100k?",
                "yes_price": 52,
                "no_price": 49,
                "volume": 1200,
                "event_ticker": "KXBTC-25DEC31",
                "series_ticker": "KXBTC"
            })),
            "KXBTC",
        )
        .unwrap();

        let outcome = market.primary_outcome().unwrap();
        assert_eq!(outcome.yes_price, 0.52);
        assert_eq!(outcome.no_price, 0.49);
        assert_eq!(market.volume, 1200.0);
    }

    #[test]
    fn falls_back_to_last_price_when_mids_missing() {
        let market = parse_market(
            raw(json!({
                "ticker": "KXCPI-26JAN",
                "title": "CPI above 3%?",
                "yes_price": 0,
                "no_price": 0,
                "last_price": 37
            })),
            "",
        )
        .unwrap();

        let outcome = market.primary_outcome().unwrap();
        assert_eq!(outcome.yes_price, 0.37);
        assert_eq!(outcome.no_price, 0.63);
    }

    #[test]
    fn drops_markets_missing_ticker_or_title() {
        assert!(parse_market(raw(json!({"title": "No ticker"})), "").is_none());
        assert!(parse_market(raw(json!({"ticker": "KXGDP-26Q1"})), "").is_none());
    }

    #[test]
    fn derives_series_and_url_from_event_ticker() {
        let market = parse_market(
            raw(json!({
                "ticker": "KXNBA-25FEB01-LAL",
                "title": "Lakers to win?",
                "yes_price": 60,
                "no_price": 40,
                "event_ticker": "KXNBA-25FEB01"
            })),
            "",
        )
        .unwrap();

        assert_eq!(market.url, "https://kalshi.com/markets/kxnba/kxnba-25feb01");
        assert_eq!(market.event_title, "KXNBA-25FEB01");
    }

    #[test]
    fn parses_expiration_timestamps() {
        let market = parse_market(
            raw(json!({
                "ticker": "KXHIGHNY-25AUG02",
                "title": "NYC high above 90F?",
                "yes_price": 55,
                "no_price": 45,
                "expiration_time": "2025-08-02T22:00:00Z"
            })),
            "",
        )
        .unwrap();
        assert!(market.expiration.is_some());
    }

    #[test]
    fn orderbook_sets_bids_depths_and_derived_asks() {
        let mut market = parse_market(
            raw(json!({
                "ticker": "KXBTC-25DEC31-T100",
                "title": "Bitcoin above $100k?",
                "yes_price": 52,
                "no_price": 49
            })),
            "KXBTC",
        )
        .unwrap();

        let book: RawOrderbook = serde_json::from_value(json!({
            "yes": [[51, 120], [50, 300]],
            "no": [[48, 80]]
        }))
        .unwrap();
        apply_orderbook(&mut market, &book);

        let outcome = market.primary_outcome().unwrap();
        assert_eq!(outcome.yes_bid, 0.51);
        assert_eq!(outcome.yes_depth, 120.0);
        assert_eq!(outcome.no_bid, 0.48);
        assert_eq!(outcome.no_depth, 80.0);
        assert_eq!(outcome.yes_ask, 0.52);
        assert_eq!(outcome.no_ask, 0.49);
    }

    #[test]
    fn empty_orderbook_leaves_fields_at_zero() {
        let mut market = parse_market(
            raw(json!({
                "ticker": "KXFED-25SEP",
                "title": "Fed cuts in September?",
                "yes_price": 30,
                "no_price": 70
            })),
            "",
        )
        .unwrap();

        apply_orderbook(&mut market, &RawOrderbook::default());

        let outcome = market.primary_outcome().unwrap();
        assert_eq!(outcome.yes_bid, 0.0);
        assert_eq!(outcome.yes_ask, 0.0);
        assert_eq!(outcome.yes_depth, 0.0);
    }
}
