//! Shared HTTP plumbing for the venue clients.
//!
//! Every venue call goes through a per-venue token bucket (the configured
//! requests-per-second cap) and a retry loop that backs off on HTTP 429.
//! The underlying `reqwest::Client` is created lazily and dropped by
//! `close()`, so a closed client transparently reopens on next use.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::error::{Error, Result};

const HTTP_TIMEOUT_SECS: u64 = 20;
const RETRY_ATTEMPTS: u32 = 5;

/// Backoff before retrying a 429 response. `attempt` is 1-based.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(1500 * attempt as u64)
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket capping in-flight request rate for one venue.
///
/// Burst capacity is one second's worth of tokens.
pub struct RateLimiter {
    state: Mutex<BucketState>,
    rate: f64,
}

impl RateLimiter {
    pub fn new(max_rps: u32) -> Self {
        let rate = f64::from(max_rps.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            rate,
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.rate);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };
            match wait {
                None => return,
                Some(delay) => sleep(delay).await,
            }
        }
    }
}

/// Rate-limited, retrying HTTP transport for one venue.
pub struct Http {
    venue: &'static str,
    limiter: RateLimiter,
    client: RwLock<Option<Client>>,
}

impl Http {
    pub fn new(venue: &'static str, max_rps: u32) -> Self {
        Self {
            venue,
            limiter: RateLimiter::new(max_rps),
            client: RwLock::new(None),
        }
    }

    fn client(&self) -> Result<Client> {
        if let Some(client) = self.client.read().as_ref() {
            return Ok(client.clone());
        }
        let mut slot = self.client.write();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the underlying client. The next request recreates it.
    pub fn close(&self) {
        *self.client.write() = None;
    }

    /// GET a JSON document, retrying 429s and failing on other non-2xx.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        match self.get_json_opt(url, query).await? {
            Some(value) => Ok(value),
            None => Err(Error::Status {
                venue: self.venue,
                status: 404,
                url: url.to_string(),
            }),
        }
    }

    /// Like [`Http::get_json`], but a 404 maps to `None` instead of an error.
    pub async fn get_json_opt<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let client = self.client()?;
        for attempt in 1..=RETRY_ATTEMPTS {
            self.limiter.acquire().await;
            let response = client.get(url).query(query).send().await?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_delay(attempt);
                warn!(
                    venue = self.venue,
                    url,
                    wait_secs = wait.as_secs_f64(),
                    "Rate limited, backing off"
                );
                sleep(wait).await;
                continue;
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(Error::Status {
                    venue: self.venue,
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            return Ok(Some(response.json::<T>().await?));
        }
        Err(Error::RateLimited {
            venue: self.venue,
            attempts: RETRY_ATTEMPTS,
        })
    }
}
