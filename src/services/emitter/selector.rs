// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@oxidity.com>

//! Deterministic pattern selection. Scores the closed pattern set from
//! success history, recency and the emission-window curve, and refuses to
//! emit weak signals.

use crate::domain::phi::PHI;
use crate::infrastructure::data::schema::{PatternStats, SignalPattern};
use std::collections::HashMap;

/// Wall-clock anchors `(hour, minute)` of the emission window, with their
/// half-cycle subdivisions applied at scoring time.
const ANCHORS: [(u32, u32); 10] = [
    (0, 0),
    (1, 37),
    (3, 42),
    (6, 18),
    (8, 1),
    (10, 53),
    (13, 21),
    (16, 18),
    (18, 59),
    (21, 34),
];

/// Do-not-emit windows `(start_minute, end_minute)` of the day, inclusive.
const BLACKOUTS: [(u32, u32); 2] = [
    (4 * 60, 4 * 60 + 30),       // sequencer maintenance shadow
    (23 * 60 + 45, 23 * 60 + 59), // day-boundary rollover
];

const MINUTES_PER_DAY: u32 = 24 * 60;
const VETO_THRESHOLD: f64 = 0.7;
const SUCCESS_PRIOR: f64 = 0.618;
const REINFORCEMENT_BOOST: f64 = 1.15;
/// Market gas level above which scores are damped.
const ELEVATED_GAS_GWEI: f64 = 5.0;

/// Market inputs the selector can consult; absent data degrades gracefully.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketHint {
    pub gas_gwei: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    Pattern {
        pattern: SignalPattern,
        score: f64,
        window_multiplier: f64,
    },
    Veto,
}

pub fn minute_of_day(unix_secs: u64) -> u32 {
    ((unix_secs / 60) % (MINUTES_PER_DAY as u64)) as u32
}

fn modular_distance(a: u32, b: u32) -> u32 {
    let d = a.abs_diff(b);
    d.min(MINUTES_PER_DAY - d)
}

/// Minimum modular distance to any anchor or its half-cycle subdivision.
fn anchor_distance(minute: u32) -> u32 {
    ANCHORS
        .iter()
        .flat_map(|&(h, m)| {
            let anchor = h * 60 + m;
            [anchor, (anchor + MINUTES_PER_DAY / 2) % MINUTES_PER_DAY]
        })
        .map(|anchor| modular_distance(minute, anchor))
        .min()
        .unwrap_or(MINUTES_PER_DAY)
}

fn in_blackout(minute: u32) -> bool {
    BLACKOUTS
        .iter()
        .any(|&(start, end)| minute >= start && minute <= end)
}

/// Emission-window multiplier for a minute of the day; `None` means the
/// window forbids emission outright.
pub fn window_multiplier(minute: u32) -> Option<f64> {
    if in_blackout(minute) {
        return None;
    }
    let distance = anchor_distance(minute);
    Some(match distance {
        0..=2 => 2.618,
        3..=5 => 1.618,
        6..=10 => 1.382,
        _ => 1.0,
    })
}

/// Opaque per-pattern alignment factor derived from the weighting constant.
fn resonance_alignment(pattern: SignalPattern) -> f64 {
    let idx = SignalPattern::ALL
        .iter()
        .position(|p| *p == pattern)
        .unwrap_or(0) as f64;
    0.9 + 0.2 * ((idx + 1.0) * PHI).fract()
}

fn composite_score(
    pattern: SignalPattern,
    stats: Option<&PatternStats>,
    now_ms: u64,
    market: Option<MarketHint>,
) -> f64 {
    let (attempts, successes, last_used_at, reinforced) = stats
        .map(|s| (s.attempts, s.successes, s.last_used_at, s.reinforced))
        .unwrap_or((0, 0, None, false));

    let success_rate = (successes as f64 + SUCCESS_PRIOR) / (attempts as f64 + 1.0);
    let rate_factor = 0.5 + success_rate.min(1.0) / 2.0;

    // Favor patterns unused for several hours; saturates at six.
    let hours_idle = last_used_at
        .map(|t| now_ms.saturating_sub(t) as f64 / 3_600_000.0)
        .unwrap_or(f64::MAX);
    let freshness = 1.0 + 0.2 * (hours_idle / 6.0).min(1.0);

    let mut score = pattern.clarity_prior()
        * resonance_alignment(pattern)
        * rate_factor
        * freshness
        * pattern.incentive_prior();

    if reinforced {
        score *= REINFORCEMENT_BOOST;
    }
    if let Some(hint) = market {
        if hint.gas_gwei > ELEVATED_GAS_GWEI {
            score *= 0.9;
        }
    }
    score
}

/// Pick the best-scoring pattern for this tick, or veto.
pub fn select(
    stats: &HashMap<String, PatternStats>,
    now_ms: u64,
    market: Option<MarketHint>,
) -> Selection {
    let minute = minute_of_day(now_ms / 1000);
    let Some(multiplier) = window_multiplier(minute) else {
        tracing::info!(target: "selector", minute, "Emission window forbids emission");
        return Selection::Veto;
    };

    let mut best: Option<(SignalPattern, f64)> = None;
    for pattern in SignalPattern::ALL {
        let score = composite_score(
            pattern,
            stats.get(pattern.name()),
            now_ms,
            market,
        ) * multiplier;
        tracing::debug!(target: "selector", pattern = pattern.name(), score, "Pattern scored");
        if best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((pattern, score));
        }
    }

    match best {
        Some((pattern, score)) if score >= VETO_THRESHOLD => Selection::Pattern {
            pattern,
            score,
            window_multiplier: multiplier,
        },
        _ => {
            tracing::info!(target: "selector", "Best composite score below threshold, veto");
            Selection::Veto
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(minute: u32) -> u64 {
        minute as u64 * 60 * 1000
    }

    #[test]
    fn window_buckets_map_distances() {
        // 01:37 anchor = minute 97.
        assert_eq!(window_multiplier(97), Some(2.618));
        assert_eq!(window_multiplier(99), Some(2.618)); // distance 2
        assert_eq!(window_multiplier(100), Some(1.618)); // distance 3
        assert_eq!(window_multiplier(102), Some(1.618)); // distance 5
        assert_eq!(window_multiplier(103), Some(1.382)); // distance 6
        assert_eq!(window_multiplier(107), Some(1.382)); // distance 10
    }

    #[test]
    fn subdivisions_count_as_anchors() {
        // 01:37 + 12h = 13:37 = minute 817.
        assert_eq!(window_multiplier(817), Some(2.618));
    }

    #[test]
    fn blackout_minutes_veto() {
        assert_eq!(window_multiplier(4 * 60 + 15), None);
        let selection = select(&HashMap::new(), ms(4 * 60 + 15), None);
        assert_eq!(selection, Selection::Veto);
    }

    #[test]
    fn cold_start_selects_a_pattern() {
        // Minute 0 is an anchor: strong multiplier, empty history.
        let selection = select(&HashMap::new(), ms(0), None);
        match selection {
            Selection::Pattern { pattern, score, .. } => {
                assert_eq!(pattern, SignalPattern::ClassicArbitrage);
                assert!(score >= 0.7);
            }
            Selection::Veto => panic!("cold start should emit"),
        }
    }

    #[test]
    fn poisoned_history_vetoes_off_window() {
        let mut stats = HashMap::new();
        for pattern in SignalPattern::ALL {
            stats.insert(
                pattern.name().to_string(),
                PatternStats {
                    attempts: 20,
                    successes: 0,
                    // Used moments ago: no freshness help.
                    last_used_at: Some(ms(200)),
                    reinforced: false,
                },
            );
        }
        // Minute 30: distance > 10 from every anchor, multiplier 1.0.
        assert_eq!(window_multiplier(30), Some(1.0));
        assert_eq!(select(&stats, ms(200), None), Selection::Veto);
    }

    #[test]
    fn reinforcement_boosts_score() {
        let mut stats = HashMap::new();
        let base = composite_score(SignalPattern::StableRotation, None, ms(0), None);
        stats.insert(
            SignalPattern::StableRotation.name().to_string(),
            PatternStats {
                attempts: 0,
                successes: 0,
                last_used_at: None,
                reinforced: true,
            },
        );
        let boosted = composite_score(
            SignalPattern::StableRotation,
            stats.get(SignalPattern::StableRotation.name()),
            ms(0),
            None,
        );
        assert!(boosted > base);
    }

    #[test]
    fn elevated_gas_damps_scores() {
        let calm = composite_score(
            SignalPattern::ClassicArbitrage,
            None,
            ms(0),
            Some(MarketHint { gas_gwei: 0.1 }),
        );
        let busy = composite_score(
            SignalPattern::ClassicArbitrage,
            None,
            ms(0),
            Some(MarketHint { gas_gwei: 20.0 }),
        );
        assert!(busy < calm);
    }

    #[test]
    fn selection_is_deterministic() {
        let stats = HashMap::new();
        let a = select(&stats, ms(0), None);
        let b = select(&stats, ms(0), None);
        assert_eq!(a, b);
    }
}
