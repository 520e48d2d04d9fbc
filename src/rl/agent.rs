// src/rl/agent.rs
//
// One-step tabular Q-learning agent.
//
// The agent owns the Q-table, the action catalog, the exploration
// schedule and the RNG. Nothing else reads or writes the table while a
// control loop runs, so no locking is involved.
//
// Update rule (Bellman backup):
//
//   new = (1 - alpha) * old + alpha * (reward + gamma * max_a Q(next, a))
//
// followed by one epsilon decay step.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::actions::ActionCatalog;
use super::policy::{select_action, ExplorationSchedule};
use super::q_table::QTable;
use super::state::State;
use crate::config::ConfigError;
use crate::types::WeightTuple;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    /// Alpha, in (0, 1].
    pub learning_rate: f64,
    /// Gamma, in [0, 1].
    pub discount_factor: f64,
    /// Initial epsilon, in [0, 1].
    pub exploration_rate: f64,
    /// Epsilon floor, in [0, exploration_rate].
    pub exploration_min: f64,
    /// Multiplicative decay per learning step, in (0, 1].
    pub exploration_decay: f64,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            exploration_rate: 1.0,
            exploration_min: 0.01,
            exploration_decay: 0.995,
        }
    }
}

impl AgentParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, field: &str, message: String) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, message))
            }
        }
        let a = self.learning_rate;
        check(
            a > 0.0 && a <= 1.0,
            "learning_rate",
            format!("{a} not in (0, 1]"),
        )?;
        let g = self.discount_factor;
        check(
            (0.0..=1.0).contains(&g),
            "discount_factor",
            format!("{g} not in [0, 1]"),
        )?;
        let e = self.exploration_rate;
        check(
            (0.0..=1.0).contains(&e),
            "exploration_rate",
            format!("{e} not in [0, 1]"),
        )?;
        let m = self.exploration_min;
        check(
            m >= 0.0 && m <= e,
            "exploration_min",
            format!("{m} not in [0, exploration_rate={e}]"),
        )?;
        let d = self.exploration_decay;
        check(
            d > 0.0 && d <= 1.0,
            "exploration_decay",
            format!("{d} not in (0, 1]"),
        )
    }
}

/// A single observed transition, consumed once by [`QLearningAgent::learn`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Transition {
    pub state: State,
    pub action_index: usize,
    pub reward: f64,
    pub next_state: State,
}

pub struct QLearningAgent {
    params: AgentParams,
    catalog: ActionCatalog,
    table: QTable,
    schedule: ExplorationSchedule,
    rng: ChaCha8Rng,
    updates: u64,
}

impl QLearningAgent {
    /// Build an agent. `seed = None` seeds the RNG from OS entropy.
    ///
    /// # Panics
    ///
    /// Panics if `params` fail validation; callers validate config first.
    pub fn new(params: AgentParams, catalog: ActionCatalog, seed: Option<u64>) -> Self {
        if let Err(err) = params.validate() {
            panic!("invalid agent parameters: {err}");
        }
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            table: QTable::new(catalog.len()),
            schedule: ExplorationSchedule::new(
                params.exploration_rate,
                params.exploration_min,
                params.exploration_decay,
            ),
            params,
            catalog,
            rng,
            updates: 0,
        }
    }

    /// Construct with the four tunable hyperparameters, the default
    /// catalog, the default epsilon floor and an entropy-seeded RNG.
    pub fn with_hyperparameters(
        learning_rate: f64,
        discount_factor: f64,
        exploration_rate: f64,
        exploration_decay: f64,
    ) -> Self {
        let params = AgentParams {
            learning_rate,
            discount_factor,
            exploration_rate,
            exploration_decay,
            ..AgentParams::default()
        };
        Self::new(params, ActionCatalog::default(), None)
    }

    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    /// Mutable table access, for seeding values in tests and warm starts.
    pub fn table_mut(&mut self) -> &mut QTable {
        &mut self.table
    }

    pub fn epsilon(&self) -> f64 {
        self.schedule.epsilon()
    }

    /// Number of learning updates applied so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn select_action(&mut self, state: &State) -> usize {
        select_action(state, &self.table, self.schedule.epsilon(), &mut self.rng)
    }

    pub fn weights(&self, action_index: usize) -> WeightTuple {
        self.catalog.weights(action_index)
    }

    /// Apply one Bellman backup and decay epsilon. Returns the new value.
    pub fn learn(&mut self, t: &Transition) -> f64 {
        let old = self.table.get(&t.state, t.action_index);
        let best_next = self.table.best_value(&t.next_state);
        let alpha = self.params.learning_rate;
        let new = (1.0 - alpha) * old
            + alpha * (t.reward + self.params.discount_factor * best_next);
        self.table.set(&t.state, t.action_index, new);
        self.schedule.decay_step();
        self.updates += 1;
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::state::LatencyLevel;

    fn agent() -> QLearningAgent {
        QLearningAgent::new(AgentParams::default(), ActionCatalog::default(), Some(1))
    }

    #[test]
    fn defaults_validate() {
        assert!(AgentParams::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let bad = [
            AgentParams {
                learning_rate: 0.0,
                ..AgentParams::default()
            },
            AgentParams {
                discount_factor: 1.5,
                ..AgentParams::default()
            },
            AgentParams {
                exploration_min: 2.0,
                ..AgentParams::default()
            },
            AgentParams {
                exploration_decay: 0.0,
                ..AgentParams::default()
            },
        ];
        for p in bad {
            assert!(p.validate().is_err(), "{p:?} should be rejected");
        }
    }

    #[test]
    fn bellman_numeric_example() {
        let mut agent = agent();
        let s = State::new([LatencyLevel::Low, LatencyLevel::Low, LatencyLevel::Low]);
        let next = State::new([LatencyLevel::High, LatencyLevel::Low, LatencyLevel::Low]);
        agent.table_mut().set(&next, 4, 0.2);
        let new = agent.learn(&Transition {
            state: s,
            action_index: 2,
            reward: 0.5,
            next_state: next,
        });
        assert!((new - 0.068).abs() < 1e-12);
        assert!((agent.table().get(&s, 2) - 0.068).abs() < 1e-12);
    }

    #[test]
    fn self_transition_updates_normally() {
        let mut agent = agent();
        let s = State::from_index(13);
        agent.table_mut().set(&s, 0, 1.0);
        let new = agent.learn(&Transition {
            state: s,
            action_index: 0,
            reward: 0.0,
            next_state: s,
        });
        // 0.9 * 1.0 + 0.1 * (0.0 + 0.9 * 1.0)
        assert!((new - 0.99).abs() < 1e-12);
    }

    #[test]
    fn learn_decays_epsilon_once() {
        let mut agent = agent();
        let s = State::from_index(0);
        agent.learn(&Transition {
            state: s,
            action_index: 0,
            reward: 0.1,
            next_state: s,
        });
        assert!((agent.epsilon() - 0.995).abs() < 1e-12);
        assert_eq!(agent.updates(), 1);
    }

    #[test]
    fn epsilon_stays_between_floor_and_initial_rate() {
        let params = AgentParams {
            exploration_rate: 0.5,
            exploration_min: 0.01,
            exploration_decay: 0.9,
            ..AgentParams::default()
        };
        let mut agent = QLearningAgent::new(params, ActionCatalog::default(), Some(7));
        assert_eq!(agent.epsilon(), 0.5);
        let s = State::from_index(4);
        for _ in 0..200 {
            agent.learn(&Transition {
                state: s,
                action_index: 1,
                reward: 0.2,
                next_state: s,
            });
            let eps = agent.epsilon();
            assert!(eps <= params.exploration_rate);
            assert!(eps >= params.exploration_min);
        }
        assert_eq!(agent.epsilon(), params.exploration_min);
    }
}
