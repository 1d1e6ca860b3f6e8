//! Integration tests for cross-venue matching: uniqueness resolution,
//! override precedence, and cache semantics.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use edgescan::domain::{Market, Outcome, Venue};
use edgescan::matcher::{MarketMatcher, MatchOverrides};

fn market(venue: Venue, id: &str, title: &str) -> Market {
    Market {
        venue,
        id: id.into(),
        title: title.into(),
        event_title: String::new(),
        outcomes: vec![Outcome {
            name: title.into(),
            token_id: format!("{id}-token"),
            yes_price: 0.5,
            no_price: 0.5,
            ..Outcome::default()
        }],
        expiration: None,
        volume: 0.0,
        url: String::new(),
        ticker: id.into(),
    }
}

fn kalshi(id: &str, title: &str) -> Market {
    market(Venue::Kalshi, id, title)
}

fn poly(id: &str, title: &str) -> Market {
    market(Venue::Polymarket, id, title)
}

fn matcher(threshold: u32) -> MarketMatcher {
    MarketMatcher::new(threshold, MatchOverrides::default())
}

#[test]
fn best_scoring_kalshi_market_claims_a_contested_polymarket_market() {
    let kalshi_markets = vec![
        kalshi("K1", "Will the Lakers win the NBA finals this year?"),
        kalshi("K2", "Will the Lakers win the NBA finals?"),
        kalshi("K3", "Lakers win the finals?"),
    ];
    let poly_markets = vec![poly("P1", "Will the Lakers win the NBA finals this year?")];

    let matched = matcher(70).match_markets(&kalshi_markets, &poly_markets);

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].kalshi_market.id, "K1");
    assert_eq!(matched[0].similarity, 100.0);
}

#[test]
fn no_id_appears_twice_in_the_output() {
    let kalshi_markets = vec![
        kalshi("K1", "Will Bitcoin close above 100k on December 31?"),
        kalshi("K2", "Will Bitcoin close above 100k on December 31st?"),
        kalshi("K3", "Will Ethereum close above 5k on December 31?"),
    ];
    let poly_markets = vec![
        poly("P1", "Will Bitcoin close above 100k on December 31?"),
        poly("P2", "Will Ethereum close above 5k on December 31?"),
    ];

    let matched = matcher(80).match_markets(&kalshi_markets, &poly_markets);

    let mut kalshi_ids = HashSet::new();
    let mut poly_ids = HashSet::new();
    for pair in &matched {
        assert!(kalshi_ids.insert(pair.kalshi_market.id.clone()));
        assert!(poly_ids.insert(pair.polymarket_market.id.clone()));
    }
}

#[test]
fn output_is_sorted_by_descending_similarity() {
    let kalshi_markets = vec![
        kalshi("K1", "Will Bitcoin close above 100k on December 31?"),
        kalshi("K2", "Ethereum above 5k at the end of December?"),
    ];
    let poly_markets = vec![
        poly("P1", "Will Bitcoin close above 100k on December 31?"),
        poly("P2", "Will Ethereum be above 5k at the end of December?"),
    ];

    let matched = matcher(60).match_markets(&kalshi_markets, &poly_markets);

    assert!(matched.len() >= 2);
    for window in matched.windows(2) {
        assert!(window[0].similarity >= window[1].similarity);
    }
}

#[test]
fn override_beats_fuzzy_and_frees_the_fuzzy_target() {
    let overrides = MatchOverrides {
        overrides: HashMap::from([("K1".to_string(), "P9".to_string())]),
        excluded: HashSet::new(),
    };
    let mut matcher = MarketMatcher::new(80, overrides);

    let kalshi_markets = vec![
        kalshi("K1", "Will the Chiefs win the Super Bowl?"),
        kalshi("K2", "Will the Chiefs win the Super Bowl in 2026?"),
    ];
    let poly_markets = vec![
        poly("P5", "Will the Chiefs win the Super Bowl?"),
        poly("P9", "Chiefs to take the championship"),
    ];

    let matched = matcher.match_markets(&kalshi_markets, &poly_markets);

    let k1 = matched
        .iter()
        .find(|m| m.kalshi_market.id == "K1")
        .expect("K1 should be paired by override");
    assert_eq!(k1.polymarket_market.id, "P9");
    assert_eq!(k1.similarity, 100.0);

    // P5 stays available for the fuzzy pass.
    let k2 = matched
        .iter()
        .find(|m| m.kalshi_market.id == "K2")
        .expect("K2 should fuzzy-match P5");
    assert_eq!(k2.polymarket_market.id, "P5");
}

#[test]
fn override_pointing_at_absent_market_is_skipped() {
    let overrides = MatchOverrides {
        overrides: HashMap::from([("K1".to_string(), "P404".to_string())]),
        excluded: HashSet::new(),
    };
    let mut matcher = MarketMatcher::new(80, overrides);

    let kalshi_markets = vec![kalshi("K1", "An override-only market title")];
    let poly_markets = vec![poly("P1", "A completely unrelated question")];

    let matched = matcher.match_markets(&kalshi_markets, &poly_markets);
    assert!(matched.is_empty());
}

#[test]
fn excluded_markets_never_match() {
    let overrides = MatchOverrides {
        overrides: HashMap::new(),
        excluded: HashSet::from(["K1".to_string()]),
    };
    let mut matcher = MarketMatcher::new(80, overrides);

    let kalshi_markets = vec![kalshi("K1", "Will it rain in Seattle tomorrow?")];
    let poly_markets = vec![poly("P1", "Will it rain in Seattle tomorrow?")];

    let matched = matcher.match_markets(&kalshi_markets, &poly_markets);
    assert!(matched.is_empty());
}

#[test]
fn threshold_change_clears_the_cache() {
    let mut matcher = matcher(80);
    let kalshi_markets = vec![kalshi("K1", "Will Bitcoin hit 100k this year?")];
    let poly_markets = vec![poly("P1", "Will Bitcoin hit 100k this year?")];

    matcher.match_markets(&kalshi_markets, &poly_markets);
    assert_eq!(matcher.cached_pairs(), 1);

    // Same threshold: cache survives.
    matcher.set_threshold(80);
    assert_eq!(matcher.cached_pairs(), 1);

    matcher.set_threshold(90);
    assert_eq!(matcher.cached_pairs(), 0);
}

#[test]
fn cache_keeps_a_pair_alive_across_scans() {
    let mut matcher = matcher(80);
    let poly_markets = vec![poly("P1", "Will Bitcoin hit 100k this year?")];

    matcher.match_markets(
        &[kalshi("K1", "Will Bitcoin hit 100k this year?")],
        &poly_markets,
    );

    // Next scan the Kalshi title no longer fuzzes above threshold, but
    // the cached pairing still holds while P1 is present.
    let matched = matcher.match_markets(
        &[kalshi("K1", "Something entirely different now")],
        &poly_markets,
    );

    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].kalshi_market.id, "K1");
    assert_eq!(matched[0].polymarket_market.id, "P1");
    // The pair is rebuilt from this scan's market objects.
    assert_eq!(
        matched[0].kalshi_market.title,
        "Something entirely different now"
    );
}

#[test]
fn cache_entry_is_dropped_when_its_target_leaves_the_scan() {
    let mut matcher = matcher(80);

    matcher.match_markets(
        &[kalshi("K1", "Will Bitcoin hit 100k this year?")],
        &[poly("P1", "Will Bitcoin hit 100k this year?")],
    );
    assert_eq!(matcher.cached_pairs(), 1);

    // P1 disappears; the stale entry must not produce a pair.
    let matched = matcher.match_markets(
        &[kalshi("K1", "Will Bitcoin hit 100k this year?")],
        &[poly("P2", "Totally unrelated market")],
    );
    assert!(matched.is_empty());
}

#[test]
fn overrides_load_from_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"overrides": {{"K1": "P1"}}, "excluded": ["K2", "K3"]}}"#
    )
    .unwrap();

    let overrides = MatchOverrides::load(file.path());
    assert_eq!(overrides.overrides.get("K1").map(String::as_str), Some("P1"));
    assert_eq!(overrides.excluded.len(), 2);
}

#[test]
fn missing_or_invalid_overrides_file_yields_empty_tables() {
    let missing = MatchOverrides::load("/nonexistent/overrides.json");
    assert!(missing.overrides.is_empty());
    assert!(missing.excluded.is_empty());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "not json at all").unwrap();
    let invalid = MatchOverrides::load(file.path());
    assert!(invalid.overrides.is_empty());
    assert!(invalid.excluded.is_empty());
}
