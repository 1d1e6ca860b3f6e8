//! Guardrailed execution of detected opportunities.
//!
//! Guardrails run before any order goes out; once they pass, the two legs
//! are placed in parallel. A failed leg does not roll back the other:
//! the first error is surfaced on the execution record and the partial
//! fill is visible in the log.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ExecutionConfig;
use crate::domain::{Direction, Opportunity, OpportunitySnapshot};
use crate::error::{Error, Result};

/// Venue credentials, read from the environment so secrets stay out of
/// the config file. Empty credentials put the matching leg in dry-run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub kalshi_api_key_id: String,
    pub kalshi_private_key_path: String,
    pub polymarket_private_key: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            kalshi_api_key_id: std::env::var("KALSHI_API_KEY_ID").unwrap_or_default(),
            kalshi_private_key_path: std::env::var("KALSHI_PRIVATE_KEY_PATH").unwrap_or_default(),
            polymarket_private_key: std::env::var("POLYMARKET_PRIVATE_KEY").unwrap_or_default(),
        }
    }
}

/// One execution attempt, blocked or tried.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub opportunity: OpportunitySnapshot,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    /// Estimated PnL in USD (profit per contract times position size).
    pub pnl: f64,
}

impl ExecutionRecord {
    fn blocked(opportunity: &Opportunity, reason: String) -> Self {
        Self {
            opportunity: opportunity.snapshot(),
            executed_at: Utc::now(),
            success: false,
            error: Some(reason),
            pnl: 0.0,
        }
    }
}

#[derive(Debug)]
struct ExecutorState {
    enabled: bool,
    min_profit_cents: f64,
    max_position_usd: f64,
    max_daily_loss_usd: f64,
    cooldown_seconds: f64,
    daily_pnl: f64,
    daily_reset_date: Option<NaiveDate>,
    last_execution: Option<DateTime<Utc>>,
    log: Vec<ExecutionRecord>,
}

impl ExecutorState {
    /// Roll the daily PnL at the UTC date boundary.
    fn reset_daily_if_needed(&mut self, today: NaiveDate) {
        if self.daily_reset_date != Some(today) {
            self.daily_pnl = 0.0;
            self.daily_reset_date = Some(today);
        }
    }

    fn position_size(&self, opportunity: &Opportunity) -> f64 {
        if opportunity.max_size > 0.0 {
            opportunity.max_size.min(self.max_position_usd)
        } else {
            self.max_position_usd
        }
    }

    /// Reason execution is blocked, or None when all guardrails pass.
    fn check_guardrails(&mut self, opportunity: &Opportunity, now: DateTime<Utc>) -> Option<String> {
        if !self.enabled {
            return Some("Auto-execution is disabled".into());
        }

        self.reset_daily_if_needed(now.date_naive());

        if self.daily_pnl < -self.max_daily_loss_usd {
            return Some(format!(
                "Daily loss limit reached (${:.2})",
                self.daily_pnl
            ));
        }

        // Settings may have moved since detection; re-check the floor.
        if opportunity.profit * 100.0 < self.min_profit_cents {
            return Some(format!(
                "Profit {:.1}c below minimum {}c",
                opportunity.profit * 100.0,
                self.min_profit_cents
            ));
        }

        if let Some(last) = self.last_execution {
            let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
            if elapsed < self.cooldown_seconds {
                return Some(format!(
                    "Cooldown active ({:.1}s / {}s)",
                    elapsed, self.cooldown_seconds
                ));
            }
        }

        if self.position_size(opportunity) <= 0.0 {
            return Some("No executable size available".into());
        }

        None
    }
}

/// Places both legs of an opportunity, subject to guardrails.
pub struct TradeExecutor {
    credentials: Credentials,
    state: Mutex<ExecutorState>,
}

impl TradeExecutor {
    pub fn new(
        config: &ExecutionConfig,
        credentials: Credentials,
        enabled: bool,
        min_profit_cents: f64,
    ) -> Self {
        Self {
            credentials,
            state: Mutex::new(ExecutorState {
                enabled,
                min_profit_cents,
                max_position_usd: config.max_position_usd,
                max_daily_loss_usd: config.max_daily_loss_usd,
                cooldown_seconds: config.cooldown_seconds,
                daily_pnl: 0.0,
                daily_reset_date: None,
                last_execution: None,
                log: Vec::new(),
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    pub fn set_min_profit_cents(&self, min_profit_cents: f64) {
        self.state.lock().min_profit_cents = min_profit_cents;
    }

    pub fn set_max_position_usd(&self, max_position_usd: f64) {
        self.state.lock().max_position_usd = max_position_usd;
    }

    pub fn execution_log(&self) -> Vec<ExecutionRecord> {
        self.state.lock().log.clone()
    }

    /// Attempt to execute an opportunity on both venues.
    ///
    /// Every attempt, blocked or tried, lands in the execution log.
    pub async fn execute(&self, opportunity: &Opportunity) -> ExecutionRecord {
        let position_size = {
            let mut state = self.state.lock();
            if let Some(reason) = state.check_guardrails(opportunity, Utc::now()) {
                info!(reason = %reason, "Execution blocked");
                let record = ExecutionRecord::blocked(opportunity, reason);
                state.log.push(record.clone());
                return record;
            }
            state.position_size(opportunity)
        };

        info!(
            direction = %opportunity.direction,
            cost = opportunity.cost,
            profit = opportunity.profit,
            size = position_size,
            "Executing arbitrage"
        );

        let legs = match opportunity.direction {
            Direction::KalshiYesPolymarketNo => {
                let (kalshi, polymarket) = tokio::join!(
                    self.buy_kalshi(opportunity, "yes", position_size),
                    self.buy_polymarket(opportunity, "no", position_size),
                );
                kalshi.and(polymarket)
            }
            Direction::PolymarketYesKalshiNo => {
                let (polymarket, kalshi) = tokio::join!(
                    self.buy_polymarket(opportunity, "yes", position_size),
                    self.buy_kalshi(opportunity, "no", position_size),
                );
                polymarket.and(kalshi)
            }
        };

        let record = match legs {
            Ok(()) => {
                let pnl = opportunity.profit * position_size;
                let mut state = self.state.lock();
                state.daily_pnl += pnl;
                state.last_execution = Some(Utc::now());
                info!(estimated_pnl = pnl, "Execution succeeded");
                ExecutionRecord {
                    opportunity: opportunity.snapshot(),
                    executed_at: Utc::now(),
                    success: true,
                    error: None,
                    pnl,
                }
            }
            Err(e) => {
                error!(error = %e, "Execution failed");
                ExecutionRecord {
                    opportunity: opportunity.snapshot(),
                    executed_at: Utc::now(),
                    success: false,
                    error: Some(e.to_string()),
                    pnl: 0.0,
                }
            }
        };

        self.state.lock().log.push(record.clone());
        record
    }

    async fn buy_kalshi(&self, opportunity: &Opportunity, side: &str, size: f64) -> Result<()> {
        let ticker = &opportunity.pair.kalshi_market.ticker;
        info!(
            ticker = %ticker,
            side,
            price = opportunity.kalshi_price,
            size,
            "Kalshi buy order"
        );

        if self.credentials.kalshi_api_key_id.is_empty() {
            warn!("No Kalshi API key configured, dry run only");
            return Ok(());
        }

        // TODO: submit through the authenticated Kalshi order endpoint once
        // the signing client lands.
        Ok(())
    }

    async fn buy_polymarket(&self, opportunity: &Opportunity, side: &str, size: f64) -> Result<()> {
        let market = &opportunity.pair.polymarket_market;
        let token_id = if side == "no" {
            // The NO token is the second outcome, but only binary markets
            // guarantee that layout.
            if market.outcomes.len() == 2 {
                market.outcomes[1].token_id.clone()
            } else {
                warn!(
                    outcomes = market.outcomes.len(),
                    "Non-binary Polymarket market, using primary token for NO leg"
                );
                opportunity
                    .pair
                    .polymarket_outcome
                    .as_ref()
                    .map(|o| o.token_id.clone())
                    .unwrap_or_default()
            }
        } else {
            opportunity
                .pair
                .polymarket_outcome
                .as_ref()
                .map(|o| o.token_id.clone())
                .unwrap_or_default()
        };

        if token_id.is_empty() {
            return Err(Error::Execution(format!(
                "No Polymarket token id for {side} leg"
            )));
        }

        info!(
            token = %&token_id[..token_id.len().min(16)],
            side,
            price = opportunity.polymarket_price,
            size,
            "Polymarket buy order"
        );

        if self.credentials.polymarket_private_key.is_empty() {
            warn!("No Polymarket private key configured, dry run only");
            return Ok(());
        }

        // TODO: sign and post through the CLOB order API once the wallet
        // integration lands.
        Ok(())
    }
}
