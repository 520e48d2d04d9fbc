// src/rl/reward.rs
//
// Reward: inverse of the mean latency across all targets.
//
//   r = 1 / (mean_latency_ms + 1)
//
// Strictly positive, bounded in (0, 1], strictly decreasing in the mean.
// Substituted (missing) targets count toward the mean with their
// substituted value. Only aggregate latency is rewarded: a starved
// target can be masked by two fast ones.

use crate::types::{LatencyMs, LatencyReading};

pub fn reward_from_mean(mean_ms: LatencyMs) -> f64 {
    1.0 / (mean_ms + 1.0)
}

pub fn latency_reward(reading: &LatencyReading) -> f64 {
    reward_from_mean(reading.mean_ms())
}
