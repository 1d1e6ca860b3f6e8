//! edgescan - cross-venue prediction market arbitrage scanner.
//!
//! Continuously discovers markets on Kalshi and Polymarket, pairs them by
//! fuzzy title similarity, prices both arbitrage directions against live
//! order books with worst-case fees, and optionally executes the two legs.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/      # Market, MatchedPair, Opportunity
//! ├── exchange/    # Venue clients + shared rate-limited HTTP
//! ├── matcher      # Fuzzy title matching, overrides, cache
//! ├── detector     # Per-direction cost model
//! ├── executor     # Guardrails + two-leg placement
//! ├── scanner/     # Tick loop, broadcast, stats
//! └── control      # Read models for the HTTP layer
//! ```

pub mod config;
pub mod control;
pub mod detector;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod matcher;
pub mod scanner;
