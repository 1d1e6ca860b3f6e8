//! Snapshot fan-out to scan subscribers.
//!
//! Subscribers receive updates through bounded channels so a slow
//! consumer cannot stall the tick: a full queue drops that update for
//! that subscriber, a closed channel removes the subscriber.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::OpportunitySnapshot;

pub const SUBSCRIBER_QUEUE_DEPTH: usize = 16;

/// Stats block carried on every scan update.
#[derive(Debug, Clone, Serialize)]
pub struct TickStats {
    pub kalshi_markets: usize,
    pub polymarket_markets: usize,
    pub matched_pairs: usize,
    pub active_opportunities: usize,
    pub total_scans: u64,
    pub last_scan: Option<String>,
}

/// Message published to every subscriber after a successful tick.
#[derive(Debug, Clone, Serialize)]
pub struct ScanUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub opportunities: Vec<OpportunitySnapshot>,
    pub stats: TickStats,
}

impl ScanUpdate {
    pub fn new(opportunities: Vec<OpportunitySnapshot>, stats: TickStats) -> Self {
        Self {
            kind: "scan_update",
            opportunities,
            stats,
        }
    }
}

struct HubInner {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::Sender<ScanUpdate>)>,
    latest: Option<ScanUpdate>,
}

/// Registry of scan-update subscribers.
pub struct SubscriberHub {
    inner: Mutex<HubInner>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner {
                next_id: 0,
                subscribers: Vec::new(),
                latest: None,
            }),
        }
    }

    /// Register a subscriber. The latest snapshot, if any, is queued
    /// immediately so a new consumer does not wait a full tick.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<ScanUpdate>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if let Some(latest) = &inner.latest {
            let _ = tx.try_send(latest.clone());
        }
        inner.subscribers.push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn latest(&self) -> Option<ScanUpdate> {
        self.inner.lock().latest.clone()
    }

    /// Deliver an update to every live subscriber.
    pub fn publish(&self, update: ScanUpdate) {
        let mut inner = self.inner.lock();
        inner.latest = Some(update.clone());
        inner.subscribers.retain(|(id, tx)| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscriber = *id, "Subscriber queue full, dropping update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(subscriber = *id, "Removing closed subscriber");
                false
            }
        });
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}
