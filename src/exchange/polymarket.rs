//! Polymarket market discovery (Gamma API) and order books (CLOB API).
//!
//! Gamma embeds several array fields as JSON-encoded strings; parsing is
//! defensive throughout, and a field that fails to decode is treated as
//! empty rather than failing the market.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use super::http::Http;
use super::VenueClient;
use crate::config::PolymarketConfig;
use crate::domain::{round_dp, Market, Outcome, Venue};
use crate::error::Result;

const EVENTS_PAGE_LIMIT: usize = 100;
const EVENTS_PAGE_PAUSE: Duration = Duration::from_millis(100);
const BOOK_PAUSE: Duration = Duration::from_millis(50);

/// A Gamma array field that may arrive as a real array or as a
/// JSON-encoded string. Undecodable content collapses to empty.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MaybeEncoded {
    List(Vec<Value>),
    Encoded(String),
    Other(Value),
}

impl Default for MaybeEncoded {
    fn default() -> Self {
        MaybeEncoded::List(Vec::new())
    }
}

impl MaybeEncoded {
    fn into_values(self) -> Vec<Value> {
        match self {
            MaybeEncoded::List(values) => values,
            MaybeEncoded::Encoded(text) => serde_json::from_str(&text).unwrap_or_default(),
            MaybeEncoded::Other(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GammaEvent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

#[derive(Debug, Default, Deserialize)]
struct GammaMarket {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    outcomes: MaybeEncoded,
    #[serde(default, rename = "outcomePrices")]
    outcome_prices: MaybeEncoded,
    #[serde(default, rename = "clobTokenIds")]
    clob_token_ids: MaybeEncoded,
    #[serde(default)]
    volume: Value,
    #[serde(default, rename = "conditionId")]
    condition_id: Option<String>,
    #[serde(default, rename = "end_date_iso")]
    end_date_iso: Option<String>,
    #[serde(default, rename = "endDate")]
    end_date: Option<String>,
    #[serde(default, rename = "endDateIso")]
    end_date_iso_alt: Option<String>,
    #[serde(default, rename = "close_time")]
    close_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClobBook {
    #[serde(default)]
    bids: Vec<ClobLevel>,
    #[serde(default)]
    asks: Vec<ClobLevel>,
}

#[derive(Debug, Default, Deserialize)]
struct ClobLevel {
    #[serde(default)]
    price: Value,
    #[serde(default)]
    size: Value,
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    price: Value,
}

/// Client for Polymarket's Gamma (discovery) and CLOB (book) APIs.
pub struct PolymarketClient {
    gamma_url: String,
    clob_url: String,
    http: Http,
}

impl PolymarketClient {
    pub fn new(config: &PolymarketConfig) -> Self {
        Self {
            gamma_url: config.gamma_url.trim_end_matches('/').to_string(),
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
            http: Http::new("polymarket", config.max_rps),
        }
    }

    /// Fetch the CLOB book for one token. 404 means no book yet.
    async fn fetch_orderbook(&self, token_id: &str) -> Result<Option<ClobBook>> {
        let url = format!("{}/book", self.clob_url);
        self.http
            .get_json_opt(&url, &[("token_id", token_id.to_string())])
            .await
    }

    /// Fetch the current buy-side price for one token.
    async fn fetch_price(&self, token_id: &str) -> Result<Option<f64>> {
        let url = format!("{}/price", self.clob_url);
        let response: Option<PriceResponse> = self
            .http
            .get_json_opt(
                &url,
                &[
                    ("token_id", token_id.to_string()),
                    ("side", "buy".to_string()),
                ],
            )
            .await?;
        Ok(response.map(|r| value_to_f64(&r.price)).filter(|p| *p > 0.0))
    }

    fn enrich_outcome(outcome: &mut Outcome, book: &ClobBook) {
        if let Some(best_ask) = book
            .asks
            .iter()
            .map(|level| (value_to_f64(&level.price), value_to_f64(&level.size)))
            .filter(|(price, _)| *price > 0.0)
            .min_by(|a, b| a.0.total_cmp(&b.0))
        {
            outcome.yes_ask = best_ask.0;
            outcome.yes_depth = best_ask.1;
        }
        if let Some(best_bid) = book
            .bids
            .iter()
            .map(|level| (value_to_f64(&level.price), value_to_f64(&level.size)))
            .filter(|(price, _)| *price > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
        {
            outcome.yes_bid = best_bid.0;
        }

        // The NO side is the complement of this token's book.
        if outcome.yes_bid > 0.0 {
            outcome.no_ask = round_dp(1.0 - outcome.yes_bid, 4);
        }
        if outcome.yes_ask > 0.0 {
            outcome.no_bid = round_dp(1.0 - outcome.yes_ask, 4);
        }
        outcome.no_depth = outcome.yes_depth;
    }
}

#[async_trait]
impl VenueClient for PolymarketClient {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn fetch_active_markets(&self, max_markets: usize) -> Result<Vec<Market>> {
        let url = format!("{}/events", self.gamma_url);
        let mut markets = Vec::new();
        let mut offset = 0usize;

        while markets.len() < max_markets {
            let query = [
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("archived", "false".to_string()),
                ("limit", EVENTS_PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
                ("order", "volume24hr".to_string()),
                ("ascending", "false".to_string()),
            ];

            let events: Vec<GammaEvent> = match self.http.get_json(&url, &query).await {
                Ok(events) => events,
                Err(e) => {
                    warn!(offset, error = %e, "Polymarket events fetch failed");
                    break;
                }
            };

            if events.is_empty() {
                break;
            }
            let page_len = events.len();

            'events: for event in events {
                for raw in event.markets {
                    if let Some(market) = parse_market(raw, &event.title, &event.slug) {
                        markets.push(market);
                        if markets.len() >= max_markets {
                            break 'events;
                        }
                    }
                }
            }

            if page_len < EVENTS_PAGE_LIMIT {
                break;
            }
            offset += EVENTS_PAGE_LIMIT;
            sleep(EVENTS_PAGE_PAUSE).await;
        }

        info!(total = markets.len(), cap = max_markets, "Polymarket markets fetched");
        Ok(markets)
    }

    async fn enrich_outcomes_with_orderbook(&self, market: &mut Market) -> Result<()> {
        for outcome in market.outcomes.iter_mut() {
            if outcome.token_id.is_empty() {
                continue;
            }

            let book = match self.fetch_orderbook(&outcome.token_id).await {
                Ok(book) => book,
                Err(e) => {
                    warn!(token = %truncate(&outcome.token_id), error = %e, "Polymarket book fetch failed");
                    continue;
                }
            };

            match book {
                Some(book) if !book.asks.is_empty() || !book.bids.is_empty() => {
                    Self::enrich_outcome(outcome, &book);
                }
                _ => {
                    // No live book; refresh the mid from the price endpoint
                    // so the detector can still evaluate this leg.
                    debug!(token = %truncate(&outcome.token_id), "No Polymarket book, falling back to price");
                    if let Ok(Some(price)) = self.fetch_price(&outcome.token_id).await {
                        outcome.yes_price = price;
                        outcome.no_price = round_dp(1.0 - price, 4);
                    }
                }
            }

            sleep(BOOK_PAUSE).await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.http.close();
    }
}

fn parse_market(raw: GammaMarket, event_title: &str, event_slug: &str) -> Option<Market> {
    let id = value_to_string(&raw.id);
    let title = raw
        .question
        .or(raw.title)
        .unwrap_or_default();
    if id.is_empty() || title.is_empty() {
        return None;
    }

    let outcomes = parse_outcomes(
        raw.outcomes.into_values(),
        raw.outcome_prices.into_values(),
        raw.clob_token_ids.into_values(),
    );
    if outcomes.is_empty() {
        return None;
    }

    let expiration = [
        raw.end_date_iso.as_deref(),
        raw.end_date.as_deref(),
        raw.end_date_iso_alt.as_deref(),
        raw.close_time.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find_map(parse_timestamp);

    Some(Market {
        venue: Venue::Polymarket,
        id,
        title,
        event_title: event_title.to_string(),
        outcomes,
        expiration,
        volume: value_to_f64(&raw.volume),
        url: format!("https://polymarket.com/event/{event_slug}"),
        ticker: raw.condition_id.unwrap_or_default(),
    })
}

fn parse_outcomes(names: Vec<Value>, prices: Vec<Value>, token_ids: Vec<Value>) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let mut price = prices.get(i).map(value_to_f64).unwrap_or(0.0);
        if price > 1.0 {
            price /= 100.0;
        }
        let token_id = token_ids.get(i).map(value_to_string).unwrap_or_default();
        outcomes.push(Outcome {
            name: value_to_string(name),
            token_id,
            yes_price: price,
            no_price: if price > 0.0 {
                round_dp(1.0 - price, 4)
            } else {
                0.0
            },
            ..Outcome::default()
        });
    }
    outcomes
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Coerce a JSON value that may be a number or a numeric string.
fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn truncate(token_id: &str) -> &str {
    &token_id[..token_id.len().min(20)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> GammaMarket {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_string_encoded_arrays() {
        let market = parse_market(
            raw(json!({
                "id": "514527",
                "question": "Will Bitcoin hit $100k in 2025?",
                "outcomes": "[\"Yes\", \"No\"]",
                "outcomePrices": "[\"0.62\", \"0.38\"]",
                "clobTokenIds": "[\"111\", \"222\"]",
                "volume": "84211.5",
                "conditionId": "0xdeadbeef"
            })),
            "Bitcoin 2025",
            "bitcoin-100k-2025",
        )
        .unwrap();

        assert_eq!(market.outcomes.len(), 2);
        assert_eq!(market.outcomes[0].name, "Yes");
        assert_eq!(market.outcomes[0].yes_price, 0.62);
        assert_eq!(market.outcomes[0].no_price, 0.38);
        assert_eq!(market.outcomes[1].token_id, "222");
        assert_eq!(market.volume, 84211.5);
        assert_eq!(market.url, "https://polymarket.com/event/bitcoin-100k-2025");
    }

    #[test]
    fn undecodable_embedded_arrays_drop_the_market() {
        let market = parse_market(
            raw(json!({
                "id": "99",
                "question": "Broken market",
                "outcomes": "not json",
                "outcomePrices": "[0.5, 0.5]"
            })),
            "",
            "",
        );
        assert!(market.is_none());
    }

    #[test]
    fn plain_arrays_also_parse() {
        let market = parse_market(
            raw(json!({
                "id": 7131,
                "question": "Will it rain tomorrow?",
                "outcomes": ["Yes", "No"],
                "outcomePrices": [0.3, 0.7],
                "clobTokenIds": ["a", "b"]
            })),
            "Weather",
            "rain",
        )
        .unwrap();
        assert_eq!(market.id, "7131");
        assert_eq!(market.outcomes[0].yes_price, 0.3);
    }

    #[test]
    fn expiration_prefers_end_date_iso() {
        let market = parse_market(
            raw(json!({
                "id": "1",
                "question": "Q?",
                "outcomes": ["Yes", "No"],
                "outcomePrices": ["0.5", "0.5"],
                "endDate": "2026-01-01T00:00:00Z"
            })),
            "",
            "",
        )
        .unwrap();
        assert!(market.expiration.is_some());
    }

    #[test]
    fn book_selects_best_levels_and_derives_no_side() {
        let mut outcome = Outcome {
            name: "Yes".into(),
            token_id: "111".into(),
            yes_price: 0.5,
            no_price: 0.5,
            ..Outcome::default()
        };
        let book: ClobBook = serde_json::from_value(json!({
            "asks": [
                {"price": "0.55", "size": "200"},
                {"price": "0.48", "size": "60"}
            ],
            "bids": [
                {"price": "0.40", "size": "90"},
                {"price": "0.46", "size": "30"}
            ]
        }))
        .unwrap();

        PolymarketClient::enrich_outcome(&mut outcome, &book);

        assert_eq!(outcome.yes_ask, 0.48);
        assert_eq!(outcome.yes_depth, 60.0);
        assert_eq!(outcome.yes_bid, 0.46);
        assert_eq!(outcome.no_ask, 0.54);
        assert_eq!(outcome.no_bid, 0.52);
        assert_eq!(outcome.no_depth, 60.0);
    }

    #[test]
    fn coercions_handle_numbers_and_strings() {
        assert_eq!(value_to_f64(&json!("0.25")), 0.25);
        assert_eq!(value_to_f64(&json!(0.25)), 0.25);
        assert_eq!(value_to_f64(&json!(null)), 0.0);
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!("abc")), "abc");
    }
}
