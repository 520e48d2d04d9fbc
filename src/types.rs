// src/types.rs
//
// Core domain types shared by the RL engine and the live loop:
// traffic targets, per-tick latency readings and weight tuples.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of traffic destinations the controller balances across.
pub const NUM_TARGETS: usize = 3;

/// Latency value in milliseconds.
pub type LatencyMs = f64;

/// One traffic destination (service variant / routing subset).
///
/// The set is fixed for the lifetime of the process and iterated in the
/// order of [`Target::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    V1,
    V2,
    V3,
}

impl Target {
    pub const ALL: [Target; NUM_TARGETS] = [Target::V1, Target::V2, Target::V3];

    /// Stable subset label (used in routing subsets and logs).
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::V1 => "v1",
            Target::V2 => "v2",
            Target::V3 => "v3",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Target::V1 => 0,
            Target::V2 => 1,
            Target::V3 => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Target> {
        Target::ALL.get(index).copied()
    }

    /// Match a workload or pod label such as `product-service-v2-deployment`.
    ///
    /// The label is split on `-`, `_` and `.`; the first token equal to a
    /// subset name wins, so pod hashes such as `7fv1x` never match.
    pub fn from_label(label: &str) -> Option<Target> {
        label
            .split(['-', '_', '.'])
            .find_map(|token| {
                Target::ALL
                    .iter()
                    .copied()
                    .find(|t| token.eq_ignore_ascii_case(t.as_str()))
            })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-target latency observed on one sampling tick.
///
/// Every slot is always defined: targets with no (or an unusable) sample
/// hold the fallback value and are flagged as missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyReading {
    values: [LatencyMs; NUM_TARGETS],
    missing: [bool; NUM_TARGETS],
}

impl LatencyReading {
    /// Build a reading where every target reported.
    pub fn new(values: [LatencyMs; NUM_TARGETS]) -> Self {
        Self {
            values,
            missing: [false; NUM_TARGETS],
        }
    }

    /// Build a reading from labelled samples.
    ///
    /// Absent targets, as well as NaN, infinite or negative samples, are
    /// replaced by `fallback_ms`. When a target appears more than once the
    /// last usable sample wins.
    pub fn from_samples<I>(samples: I, fallback_ms: LatencyMs) -> Self
    where
        I: IntoIterator<Item = (Target, LatencyMs)>,
    {
        let mut values = [fallback_ms; NUM_TARGETS];
        let mut missing = [true; NUM_TARGETS];
        for (target, value) in samples {
            if value.is_finite() && value >= 0.0 {
                values[target.index()] = value;
                missing[target.index()] = false;
            }
        }
        Self { values, missing }
    }

    pub fn get(&self, target: Target) -> LatencyMs {
        self.values[target.index()]
    }

    pub fn values(&self) -> &[LatencyMs; NUM_TARGETS] {
        &self.values
    }

    pub fn is_missing(&self, target: Target) -> bool {
        self.missing[target.index()]
    }

    pub fn missing_targets(&self) -> Vec<Target> {
        Target::ALL
            .iter()
            .copied()
            .filter(|t| self.is_missing(*t))
            .collect()
    }

    /// Arithmetic mean over all slots, substituted slots included.
    pub fn mean_ms(&self) -> LatencyMs {
        self.values.iter().sum::<f64>() / NUM_TARGETS as f64
    }
}

impl fmt::Display for LatencyReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, target) in Target::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={:.2}ms", target, self.get(*target))?;
            if self.is_missing(*target) {
                f.write_str("(missing)")?;
            }
        }
        Ok(())
    }
}

/// Percentage split across targets, one weight per target in
/// [`Target::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightTuple(pub [u32; NUM_TARGETS]);

impl WeightTuple {
    pub fn new(weights: [u32; NUM_TARGETS]) -> Self {
        Self(weights)
    }

    pub fn weight(&self, target: Target) -> u32 {
        self.0[target.index()]
    }

    pub fn as_array(&self) -> &[u32; NUM_TARGETS] {
        &self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().map(|w| *w as u64).sum()
    }

    pub fn sums_to_100(&self) -> bool {
        self.total() == 100
    }
}

impl fmt::Display for WeightTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|w| w.to_string()).collect();
        f.write_str(&parts.join("/"))
    }
}
