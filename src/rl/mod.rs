// src/rl/mod.rs
//
// Tabular reinforcement-learning decision engine.
//
// Key components:
// - State encoder: latency reading -> discrete (LOW/MEDIUM/HIGH per target) state
// - Action catalog: fixed enumerated weight assignments
// - Q-table: dense value estimates over (state, action)
// - Policy: epsilon-greedy selection and the exploration schedule
// - Reward: inverse mean latency
// - Agent: owns the above and applies the Bellman update

pub mod actions;
pub mod agent;
pub mod policy;
pub mod q_table;
pub mod reward;
pub mod state;

pub use actions::{ActionCatalog, CatalogError};
pub use agent::{AgentParams, QLearningAgent, Transition};
pub use policy::{select_action, ExplorationSchedule};
pub use q_table::{QTable, QTableSnapshot};
pub use reward::{latency_reward, reward_from_mean};
pub use state::{
    LatencyLevel, LatencyThresholds, State, StateEncoder, LEVEL_COUNT, STATE_COUNT,
};
