//! Cross-venue market matching.
//!
//! Kalshi titles are matched against Polymarket titles with a token-sort
//! fuzzy ratio, after manual overrides and exclusions are applied. The
//! matcher keeps a per-Kalshi-id cache of the last pairing so markets
//! that stop quoting prices stay paired across scans without re-scoring
//! the full cross product.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{Market, MatchedPair};

/// Lowercase, replace non-alphanumerics with spaces, collapse runs.
/// Idempotent.
pub fn normalize(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_alphanumeric() {
            cleaned.extend(c.to_lowercase());
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Token-sort similarity: whitespace-tokenize, sort, compare the joined
/// strings as a normalized edit distance scaled to 0-100.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    fn sorted_tokens(text: &str) -> String {
        let mut tokens: Vec<&str> = text.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    }
    strsim::normalized_levenshtein(&sorted_tokens(a), &sorted_tokens(b)) * 100.0
}

/// Manual pairing table: Kalshi id to Polymarket id, plus Kalshi ids to
/// keep out of fuzzy matching entirely.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchOverrides {
    #[serde(default)]
    pub overrides: HashMap<String, String>,
    #[serde(default)]
    pub excluded: HashSet<String>,
}

impl MatchOverrides {
    /// Load from a JSON file. A missing file or a parse failure yields
    /// empty tables; the scanner keeps going either way.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        let loaded = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Self>(&text).map_err(|e| e.to_string()));
        match loaded {
            Ok(overrides) => {
                info!(
                    overrides = overrides.overrides.len(),
                    exclusions = overrides.excluded.len(),
                    "Loaded market overrides"
                );
                overrides
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load market overrides");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CachedMatch {
    polymarket_id: String,
    score: f64,
}

/// Fuzzy matcher with overrides and a cross-scan scoring cache.
pub struct MarketMatcher {
    threshold: u32,
    overrides: MatchOverrides,
    cache: HashMap<String, CachedMatch>,
}

impl MarketMatcher {
    pub fn new(threshold: u32, overrides: MatchOverrides) -> Self {
        Self {
            threshold,
            overrides,
            cache: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Changing the cutoff invalidates every cached pairing.
    pub fn set_threshold(&mut self, threshold: u32) {
        if threshold != self.threshold {
            self.threshold = threshold;
            self.clear_cache();
        }
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cached_pairs(&self) -> usize {
        self.cache.len()
    }

    /// Pair Kalshi markets with Polymarket markets.
    ///
    /// Overrides resolve first at similarity 100. Remaining Kalshi markets
    /// fuzzy-match against all non-overridden Polymarket titles; the result
    /// is reduced so each id on either side appears at most once.
    pub fn match_markets(
        &mut self,
        kalshi_markets: &[Market],
        polymarket_markets: &[Market],
    ) -> Vec<MatchedPair> {
        if kalshi_markets.is_empty() || polymarket_markets.is_empty() {
            return Vec::new();
        }

        let poly_by_id: HashMap<&str, &Market> = polymarket_markets
            .iter()
            .map(|m| (m.id.as_str(), m))
            .collect();
        let kalshi_by_id: HashMap<&str, &Market> = kalshi_markets
            .iter()
            .map(|m| (m.id.as_str(), m))
            .collect();

        // Manual overrides first; their markets are withheld from fuzzy
        // matching. An override pointing at an absent market is skipped.
        let mut matched = Vec::new();
        let mut overridden_kalshi: HashSet<&str> = HashSet::new();
        let mut overridden_poly: HashSet<&str> = HashSet::new();
        for km in kalshi_markets {
            if let Some(target) = self.overrides.overrides.get(&km.id) {
                if let Some(pm) = poly_by_id.get(target.as_str()) {
                    matched.push(MatchedPair::new(km.clone(), (*pm).clone(), 100.0));
                    self.cache.insert(
                        km.id.clone(),
                        CachedMatch {
                            polymarket_id: pm.id.clone(),
                            score: 100.0,
                        },
                    );
                    overridden_kalshi.insert(km.id.as_str());
                    overridden_poly.insert(pm.id.as_str());
                }
            }
        }

        let poly_list: Vec<&Market> = polymarket_markets
            .iter()
            .filter(|pm| !overridden_poly.contains(pm.id.as_str()))
            .collect();
        let poly_titles: Vec<String> = poly_list.iter().map(|pm| normalize(&pm.title)).collect();

        let cutoff = f64::from(self.threshold);
        let mut candidates: HashMap<(String, String), f64> = HashMap::new();

        for km in kalshi_markets {
            if overridden_kalshi.contains(km.id.as_str())
                || self.overrides.excluded.contains(&km.id)
            {
                continue;
            }

            // A cached pairing is a scoring hint, not a pass-through:
            // it only counts if its Polymarket id is still in this scan.
            if let Some(cached) = self.cache.get(&km.id) {
                if poly_by_id.contains_key(cached.polymarket_id.as_str())
                    && !overridden_poly.contains(cached.polymarket_id.as_str())
                {
                    let key = (km.id.clone(), cached.polymarket_id.clone());
                    let score = cached.score;
                    let entry = candidates.entry(key).or_insert(score);
                    if score > *entry {
                        *entry = score;
                    }
                    continue;
                }
                self.cache.remove(&km.id);
            }

            if poly_titles.is_empty() {
                continue;
            }
            let query = normalize(&km.title);
            if let Some((score, idx)) = extract_one(&query, &poly_titles, cutoff) {
                let pm = poly_list[idx];
                let entry = candidates
                    .entry((km.id.clone(), pm.id.clone()))
                    .or_insert(score);
                if score > *entry {
                    *entry = score;
                }
                self.cache.insert(
                    km.id.clone(),
                    CachedMatch {
                        polymarket_id: pm.id.clone(),
                        score,
                    },
                );
            }
        }

        // Uniqueness: best Polymarket match per Kalshi market, then the
        // best Kalshi claimant per Polymarket market.
        let mut kalshi_best: HashMap<&str, (&str, f64)> = HashMap::new();
        for ((kid, pid), score) in &candidates {
            match kalshi_best.get(kid.as_str()) {
                Some((_, best)) if *best >= *score => {}
                _ => {
                    kalshi_best.insert(kid.as_str(), (pid.as_str(), *score));
                }
            }
        }
        let mut poly_best: HashMap<&str, (&str, f64)> = HashMap::new();
        for (&kid, &(pid, score)) in &kalshi_best {
            match poly_best.get(pid) {
                Some((_, best)) if *best >= score => {}
                _ => {
                    poly_best.insert(pid, (kid, score));
                }
            }
        }

        for (pid, (kid, score)) in poly_best {
            if let (Some(km), Some(pm)) = (kalshi_by_id.get(kid), poly_by_id.get(pid)) {
                matched.push(MatchedPair::new((*km).clone(), (*pm).clone(), score));
            }
        }

        matched.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            pairs = matched.len(),
            threshold = self.threshold,
            "Matched market pairs"
        );
        matched
    }
}

/// Best-scoring choice at or above `cutoff`, if any.
fn extract_one(query: &str, choices: &[String], cutoff: f64) -> Option<(f64, usize)> {
    let mut best: Option<(f64, usize)> = None;
    for (idx, choice) in choices.iter().enumerate() {
        let score = token_sort_ratio(query, choice);
        if score < cutoff {
            continue;
        }
        if best.map_or(true, |(top, _)| score > top) {
            best = Some((score, idx));
        }
    }
    best
}
