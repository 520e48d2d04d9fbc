// src/rl/policy.rs
//
// Epsilon-greedy action selection and the exploration schedule.
//
// Selection draws exactly one uniform sample in [0, 1): below epsilon we
// explore (uniform action), otherwise we exploit the table's arg-max.
// Given a seeded RNG and a fixed table the choice is reproducible.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::q_table::QTable;
use super::state::State;

/// Choose an action index for `state`. Read-only on the table.
pub fn select_action<R: Rng + ?Sized>(
    state: &State,
    table: &QTable,
    epsilon: f64,
    rng: &mut R,
) -> usize {
    let draw: f64 = rng.gen();
    if draw < epsilon {
        rng.gen_range(0..table.num_actions())
    } else {
        table.argmax(state)
    }
}

/// Multiplicative epsilon decay with a floor.
///
/// Decays once per learning step, independent of wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSchedule {
    epsilon: f64,
    epsilon_min: f64,
    decay: f64,
}

impl ExplorationSchedule {
    pub fn new(epsilon: f64, epsilon_min: f64, decay: f64) -> Self {
        Self {
            epsilon,
            epsilon_min,
            decay,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn epsilon_min(&self) -> f64 {
        self.epsilon_min
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Advance one learning step. Never increases epsilon, never goes
    /// below the floor.
    pub fn decay_step(&mut self) {
        if self.epsilon > self.epsilon_min {
            self.epsilon = (self.epsilon * self.decay).max(self.epsilon_min);
        }
    }

    /// Closed form of epsilon after `steps` decay steps from `epsilon0`.
    pub fn epsilon_after(epsilon0: f64, epsilon_min: f64, decay: f64, steps: u64) -> f64 {
        let exp = steps.min(i32::MAX as u64) as i32;
        (epsilon0 * decay.powi(exp)).max(epsilon_min)
    }
}
