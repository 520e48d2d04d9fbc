// src/rl/state.rs
//
// State encoder: maps a latency reading onto a small discrete state.
//
// Each target is bucketed into LOW / MEDIUM / HIGH using half-open
// intervals: `< low_ms` is LOW, `[low_ms, high_ms)` is MEDIUM and
// `>= high_ms` is HIGH. The thresholds are policy constants carried in
// config, never learned.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{LatencyMs, LatencyReading, Target, NUM_TARGETS};

/// Number of discrete latency levels per target.
pub const LEVEL_COUNT: usize = 3;

/// Size of the discrete state space (`LEVEL_COUNT ^ NUM_TARGETS`).
pub const STATE_COUNT: usize = LEVEL_COUNT.pow(NUM_TARGETS as u32);

pub const DEFAULT_LOW_LATENCY_MS: LatencyMs = 200.0;
pub const DEFAULT_HIGH_LATENCY_MS: LatencyMs = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LatencyLevel {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl LatencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LatencyLevel::Low => "LOW",
            LatencyLevel::Medium => "MEDIUM",
            LatencyLevel::High => "HIGH",
        }
    }

    pub fn from_index(index: usize) -> Option<LatencyLevel> {
        match index {
            0 => Some(LatencyLevel::Low),
            1 => Some(LatencyLevel::Medium),
            2 => Some(LatencyLevel::High),
            _ => None,
        }
    }
}

/// Bucket boundaries in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyThresholds {
    /// Readings strictly below this are LOW.
    pub low_ms: LatencyMs,
    /// Readings at or above this are HIGH.
    pub high_ms: LatencyMs,
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            low_ms: DEFAULT_LOW_LATENCY_MS,
            high_ms: DEFAULT_HIGH_LATENCY_MS,
        }
    }
}

impl LatencyThresholds {
    pub fn is_valid(&self) -> bool {
        self.low_ms.is_finite()
            && self.high_ms.is_finite()
            && self.low_ms >= 0.0
            && self.low_ms < self.high_ms
    }
}

/// Discrete state: one latency level per target, in [`Target::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct State(pub [LatencyLevel; NUM_TARGETS]);

impl State {
    pub fn new(levels: [LatencyLevel; NUM_TARGETS]) -> Self {
        Self(levels)
    }

    pub fn level(&self, target: Target) -> LatencyLevel {
        self.0[target.index()]
    }

    pub fn levels(&self) -> &[LatencyLevel; NUM_TARGETS] {
        &self.0
    }

    /// Linear base-3 offset in `[0, STATE_COUNT)`; the first target is the
    /// most significant digit.
    pub fn index(&self) -> usize {
        self.0
            .iter()
            .fold(0usize, |acc, level| acc * LEVEL_COUNT + *level as usize)
    }

    /// Inverse of [`State::index`].
    ///
    /// # Panics
    ///
    /// Panics if `index >= STATE_COUNT`.
    pub fn from_index(index: usize) -> State {
        assert!(
            index < STATE_COUNT,
            "state index {index} out of range (state count {STATE_COUNT})"
        );
        let mut levels = [LatencyLevel::Low; NUM_TARGETS];
        let mut rest = index;
        for slot in levels.iter_mut().rev() {
            *slot = LatencyLevel::from_index(rest % LEVEL_COUNT).unwrap_or(LatencyLevel::High);
            rest /= LEVEL_COUNT;
        }
        State(levels)
    }

    /// Iterate every state in index order.
    pub fn all() -> impl Iterator<Item = State> {
        (0..STATE_COUNT).map(State::from_index)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self.0.iter().map(|l| l.as_str()).collect();
        write!(f, "({})", parts.join(","))
    }
}

/// Pure, total encoder from latency readings to [`State`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEncoder {
    thresholds: LatencyThresholds,
}

impl StateEncoder {
    pub fn new(thresholds: LatencyThresholds) -> Self {
        debug_assert!(thresholds.is_valid(), "invalid thresholds {thresholds:?}");
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &LatencyThresholds {
        &self.thresholds
    }

    /// Value substituted for a target with no sample.
    pub fn worst_case_ms(&self) -> LatencyMs {
        self.thresholds.high_ms
    }

    pub fn level(&self, latency_ms: LatencyMs) -> LatencyLevel {
        if latency_ms < self.thresholds.low_ms {
            LatencyLevel::Low
        } else if latency_ms < self.thresholds.high_ms {
            LatencyLevel::Medium
        } else {
            // NaN also lands here.
            LatencyLevel::High
        }
    }

    pub fn encode(&self, reading: &LatencyReading) -> State {
        let mut levels = [LatencyLevel::High; NUM_TARGETS];
        for target in Target::ALL {
            levels[target.index()] = self.level(reading.get(target));
        }
        State(levels)
    }

    /// Build a reading whose missing targets default to the HIGH threshold.
    pub fn reading_from_samples<I>(&self, samples: I) -> LatencyReading
    where
        I: IntoIterator<Item = (Target, LatencyMs)>,
    {
        LatencyReading::from_samples(samples, self.worst_case_ms())
    }

    pub fn encode_samples<I>(&self, samples: I) -> State
    where
        I: IntoIterator<Item = (Target, LatencyMs)>,
    {
        self.encode(&self.reading_from_samples(samples))
    }
}
