//! Scan counters and the bounded error ring.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

pub const ERROR_RING_CAPACITY: usize = 20;

/// Running totals for the scan loop. Mutated only by the tick task.
#[derive(Debug, Clone, Default)]
pub struct ScannerStats {
    pub kalshi_markets: usize,
    pub polymarket_markets: usize,
    pub matched_pairs: usize,
    pub active_opportunities: usize,
    pub total_scans: u64,
    pub last_scan: Option<DateTime<Utc>>,
    errors: VecDeque<String>,
}

impl ScannerStats {
    /// Append to the error ring, discarding the oldest entry when full.
    pub fn push_error(&mut self, message: String) {
        if self.errors.len() == ERROR_RING_CAPACITY {
            self.errors.pop_front();
        }
        self.errors.push_back(message);
    }

    /// The most recent `count` errors, oldest first.
    pub fn recent_errors(&self, count: usize) -> Vec<String> {
        self.errors
            .iter()
            .skip(self.errors.len().saturating_sub(count))
            .cloned()
            .collect()
    }
}
