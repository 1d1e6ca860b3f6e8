//! The scan loop: fetch both venues, match, enrich, detect, publish.
//!
//! One tick runs at a time. Venue fetches fan out concurrently, the
//! matcher runs on a blocking worker so the I/O loop stays responsive,
//! and order book enrichment is batched under the venue rate caps. Tick
//! failures back off exponentially without stopping the loop.

mod broadcast;
mod stats;

pub use broadcast::{ScanUpdate, SubscriberHub, TickStats, SUBSCRIBER_QUEUE_DEPTH};
pub use stats::{ScannerStats, ERROR_RING_CAPACITY};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::control::{MatchedMarketSummary, SettingsUpdate, StatsSnapshot};
use crate::detector::{detect_opportunities, FeeSchedule};
use crate::domain::{MatchedPair, Opportunity, OpportunitySnapshot};
use crate::error::{Error, Result};
use crate::exchange::{KalshiClient, PolymarketClient, VenueClient};
use crate::executor::{Credentials, ExecutionRecord, TradeExecutor};
use crate::matcher::{MarketMatcher, MatchOverrides};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const ENRICH_BATCH_SIZE: usize = 8;
const ENRICH_BATCH_PAUSE: Duration = Duration::from_millis(200);

/// Settings the control plane can mutate while the loop runs.
#[derive(Debug, Clone)]
struct LiveSettings {
    scan_interval_seconds: u64,
    min_profit_cents: f64,
    match_threshold: u32,
    auto_execute: bool,
}

#[derive(Default)]
struct ScanState {
    opportunities: Vec<Opportunity>,
    matched_pairs: Vec<MatchedPair>,
}

struct ScannerInner {
    kalshi: Arc<dyn VenueClient>,
    polymarket: Arc<dyn VenueClient>,
    matcher: Mutex<MarketMatcher>,
    executor: TradeExecutor,
    fees: FeeSchedule,
    max_kalshi_markets: usize,
    max_polymarket_markets: usize,
    settings: RwLock<LiveSettings>,
    state: RwLock<ScanState>,
    stats: RwLock<ScannerStats>,
    hub: SubscriberHub,
    running: AtomicBool,
}

/// Orchestrates the periodic fetch -> match -> enrich -> detect ->
/// publish loop and owns every piece of scan-scoped state.
pub struct Scanner {
    inner: Arc<ScannerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_tx: watch::Sender<bool>,
}

impl Scanner {
    pub fn from_config(config: &Config) -> Self {
        let kalshi: Arc<dyn VenueClient> = Arc::new(KalshiClient::new(&config.kalshi));
        let polymarket: Arc<dyn VenueClient> = Arc::new(PolymarketClient::new(&config.polymarket));
        Self::with_clients(config, kalshi, polymarket)
    }

    /// Build a scanner over caller-supplied venue clients.
    pub fn with_clients(
        config: &Config,
        kalshi: Arc<dyn VenueClient>,
        polymarket: Arc<dyn VenueClient>,
    ) -> Self {
        let overrides = MatchOverrides::load(&config.scanner.overrides_path);
        let matcher = MarketMatcher::new(config.scanner.match_threshold, overrides);
        let executor = TradeExecutor::new(
            &config.execution,
            Credentials::from_env(),
            config.scanner.auto_execute,
            config.scanner.min_profit_cents,
        );
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(ScannerInner {
                kalshi,
                polymarket,
                matcher: Mutex::new(matcher),
                executor,
                fees: FeeSchedule {
                    kalshi: config.kalshi.fee_rate,
                    polymarket: config.polymarket.fee_rate,
                },
                max_kalshi_markets: config.kalshi.max_markets,
                max_polymarket_markets: config.polymarket.max_markets,
                settings: RwLock::new(LiveSettings {
                    scan_interval_seconds: config.scanner.interval_seconds,
                    min_profit_cents: config.scanner.min_profit_cents,
                    match_threshold: config.scanner.match_threshold,
                    auto_execute: config.scanner.auto_execute,
                }),
                state: RwLock::new(ScanState::default()),
                stats: RwLock::new(ScannerStats::default()),
                hub: SubscriberHub::new(),
                running: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
            stop_tx,
        }
    }

    /// Spawn the tick task. Idempotent while a task is live.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                warn!("Scanner already running");
                return;
            }
        }

        self.stop_tx.send_replace(false);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let stop_rx = self.stop_tx.subscribe();
        *task = Some(tokio::spawn(run_loop(inner, stop_rx)));

        info!(
            interval = self.inner.settings.read().scan_interval_seconds,
            "Scanner started"
        );
    }

    /// Signal the loop to stop, cancel the tick task, close clients.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.kalshi.close().await;
        self.inner.polymarket.close().await;
        info!("Scanner stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Latest detected opportunities in wire form, best ROI first.
    pub fn opportunities(&self) -> Vec<OpportunitySnapshot> {
        self.inner
            .state
            .read()
            .opportunities
            .iter()
            .map(Opportunity::snapshot)
            .collect()
    }

    /// Summaries of the latest matched pairs.
    pub fn matched_markets(&self) -> Vec<MatchedMarketSummary> {
        self.inner
            .state
            .read()
            .matched_pairs
            .iter()
            .map(MatchedMarketSummary::from)
            .collect()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let stats = self.inner.stats.read();
        let settings = self.inner.settings.read();
        StatsSnapshot {
            kalshi_markets: stats.kalshi_markets,
            polymarket_markets: stats.polymarket_markets,
            matched_pairs: stats.matched_pairs,
            active_opportunities: stats.active_opportunities,
            total_scans: stats.total_scans,
            last_scan: stats.last_scan.map(|t| t.to_rfc3339()),
            is_running: self.is_running(),
            scan_interval: settings.scan_interval_seconds,
            auto_execute: settings.auto_execute,
            errors: stats.recent_errors(5),
        }
    }

    pub fn execution_log(&self) -> Vec<ExecutionRecord> {
        self.inner.executor.execution_log()
    }

    /// Register a scan-update subscriber; the latest snapshot is queued
    /// immediately when one exists.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<ScanUpdate>) {
        self.inner.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.hub.unsubscribe(id);
    }

    pub fn latest_update(&self) -> Option<ScanUpdate> {
        self.inner.hub.latest()
    }

    /// Number of cached matcher pairings, for state inspection.
    pub fn matcher_cache_size(&self) -> usize {
        self.inner.matcher.lock().cached_pairs()
    }

    /// Apply any subset of the live settings atomically. A threshold
    /// change also clears the matcher cache. The tick in flight is not
    /// interrupted.
    pub fn update_settings(&self, update: SettingsUpdate) {
        let mut settings = self.inner.settings.write();
        if let Some(interval) = update.scan_interval {
            settings.scan_interval_seconds = interval.max(1);
        }
        if let Some(min_profit) = update.min_profit_cents {
            settings.min_profit_cents = min_profit;
            self.inner.executor.set_min_profit_cents(min_profit);
        }
        if let Some(threshold) = update.match_threshold {
            settings.match_threshold = threshold;
            self.inner.matcher.lock().set_threshold(threshold);
        }
        if let Some(auto_execute) = update.auto_execute {
            settings.auto_execute = auto_execute;
            self.inner.executor.set_enabled(auto_execute);
        }
        if let Some(max_position) = update.max_position_usd {
            self.inner.executor.set_max_position_usd(max_position);
        }
        info!(
            scan_interval = settings.scan_interval_seconds,
            min_profit_cents = settings.min_profit_cents,
            match_threshold = settings.match_threshold,
            auto_execute = settings.auto_execute,
            "Settings updated"
        );
    }
}

async fn run_loop(inner: Arc<ScannerInner>, mut stop_rx: watch::Receiver<bool>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match scan_once(&inner).await {
            Ok(()) => {
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                error!(error = %e, backoff_secs = backoff.as_secs(), "Scan failed");
                inner.stats.write().push_error(format!("Scan error: {e}"));
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        }

        // Bounded wait on the stop signal keeps stop() responsive.
        let interval = Duration::from_secs(inner.settings.read().scan_interval_seconds);
        if timeout(interval, stop_rx.changed()).await.is_ok() {
            break;
        }
    }

    inner.running.store(false, Ordering::SeqCst);
}

async fn scan_once(inner: &Arc<ScannerInner>) -> Result<()> {
    debug!(scan = inner.stats.read().total_scans + 1, "Starting scan");

    let (kalshi_result, polymarket_result) = tokio::join!(
        inner.kalshi.fetch_active_markets(inner.max_kalshi_markets),
        inner.polymarket.fetch_active_markets(inner.max_polymarket_markets),
    );
    let kalshi_markets = kalshi_result?;
    let polymarket_markets = polymarket_result?;

    {
        let mut stats = inner.stats.write();
        stats.kalshi_markets = kalshi_markets.len();
        stats.polymarket_markets = polymarket_markets.len();
    }

    // The fuzzy cross product is CPU-bound; keep it off the I/O loop so
    // control-plane reads and broadcasts stay responsive.
    let matcher_inner = Arc::clone(inner);
    let mut matched = tokio::task::spawn_blocking(move || {
        matcher_inner
            .matcher
            .lock()
            .match_markets(&kalshi_markets, &polymarket_markets)
    })
    .await
    .map_err(|e| Error::Scan(format!("matcher task failed: {e}")))?;

    inner.stats.write().matched_pairs = matched.len();

    enrich_orderbooks(inner, &mut matched).await;

    let (min_profit_cents, auto_execute) = {
        let settings = inner.settings.read();
        (settings.min_profit_cents, settings.auto_execute)
    };
    let opportunities = detect_opportunities(&matched, min_profit_cents, &inner.fees);

    let update = {
        let mut stats = inner.stats.write();
        stats.active_opportunities = opportunities.len();
        stats.total_scans += 1;
        stats.last_scan = Some(chrono::Utc::now());
        info!(
            scan = stats.total_scans,
            kalshi = stats.kalshi_markets,
            polymarket = stats.polymarket_markets,
            matched = stats.matched_pairs,
            opportunities = stats.active_opportunities,
            "Scan complete"
        );
        ScanUpdate::new(
            opportunities.iter().map(Opportunity::snapshot).collect(),
            TickStats {
                kalshi_markets: stats.kalshi_markets,
                polymarket_markets: stats.polymarket_markets,
                matched_pairs: stats.matched_pairs,
                active_opportunities: stats.active_opportunities,
                total_scans: stats.total_scans,
                last_scan: stats.last_scan.map(|t| t.to_rfc3339()),
            },
        )
    };

    let top = opportunities.first().cloned();
    {
        let mut state = inner.state.write();
        state.matched_pairs = matched;
        state.opportunities = opportunities;
    }

    inner.hub.publish(update);

    if auto_execute {
        if let Some(top) = top {
            inner.executor.execute(&top).await;
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum EnrichSide {
    Kalshi,
    Polymarket,
}

/// Enrich matched pairs' order books in rate-limited batches.
///
/// One Kalshi job per pair, plus one Polymarket job when the primary
/// outcome carries a token id. Failures inside a batch are absorbed.
async fn enrich_orderbooks(inner: &Arc<ScannerInner>, pairs: &mut [MatchedPair]) {
    let mut jobs: Vec<(usize, EnrichSide)> = Vec::new();
    for (idx, pair) in pairs.iter().enumerate() {
        jobs.push((idx, EnrichSide::Kalshi));
        let has_token = pair
            .polymarket_outcome
            .as_ref()
            .is_some_and(|o| !o.token_id.is_empty());
        if has_token {
            jobs.push((idx, EnrichSide::Polymarket));
        }
    }

    let batches: Vec<&[(usize, EnrichSide)]> = jobs.chunks(ENRICH_BATCH_SIZE).collect();
    for (batch_no, batch) in batches.iter().enumerate() {
        let mut futures = Vec::with_capacity(batch.len());
        for (idx, side) in batch.iter() {
            let idx = *idx;
            let side = *side;
            let client = match side {
                EnrichSide::Kalshi => Arc::clone(&inner.kalshi),
                EnrichSide::Polymarket => Arc::clone(&inner.polymarket),
            };
            let mut market = match side {
                EnrichSide::Kalshi => pairs[idx].kalshi_market.clone(),
                EnrichSide::Polymarket => pairs[idx].polymarket_market.clone(),
            };
            futures.push(async move {
                if let Err(e) = client.enrich_outcomes_with_orderbook(&mut market).await {
                    debug!(venue = %client.venue(), error = %e, "Orderbook enrichment failed");
                }
                (idx, side, market)
            });
        }

        for (idx, side, market) in join_all(futures).await {
            match side {
                EnrichSide::Kalshi => pairs[idx].kalshi_market = market,
                EnrichSide::Polymarket => pairs[idx].polymarket_market = market,
            }
        }

        if batch_no + 1 < batches.len() {
            sleep(ENRICH_BATCH_PAUSE).await;
        }
    }

    for pair in pairs.iter_mut() {
        pair.relink_outcomes();
    }
}
