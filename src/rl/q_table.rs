// src/rl/q_table.rs
//
// Dense Q-table: one value estimate per (state, action) pair stored in a
// flat array. The offset of a cell is `state.index() * num_actions + action`.

use serde::Serialize;

use super::state::{State, STATE_COUNT};

#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    num_actions: usize,
    values: Vec<f64>,
}

impl QTable {
    /// Zero-initialized table for `num_actions` actions.
    ///
    /// # Panics
    ///
    /// Panics if `num_actions == 0`.
    pub fn new(num_actions: usize) -> Self {
        assert!(num_actions > 0, "Q-table needs at least one action");
        Self {
            num_actions,
            values: vec![0.0; STATE_COUNT * num_actions],
        }
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `action` is outside `[0, num_actions)`.
    pub fn offset(&self, state: &State, action: usize) -> usize {
        assert!(
            action < self.num_actions,
            "action index {action} out of range (num_actions {})",
            self.num_actions
        );
        state.index() * self.num_actions + action
    }

    pub fn get(&self, state: &State, action: usize) -> f64 {
        self.values[self.offset(state, action)]
    }

    pub fn set(&mut self, state: &State, action: usize, value: f64) {
        let offset = self.offset(state, action);
        self.values[offset] = value;
    }

    pub fn row(&self, state: &State) -> &[f64] {
        let start = state.index() * self.num_actions;
        &self.values[start..start + self.num_actions]
    }

    pub fn best_value(&self, state: &State) -> f64 {
        self.row(state)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Index of the highest value for `state`; ties go to the lowest index.
    pub fn argmax(&self, state: &State) -> usize {
        let row = self.row(state);
        let mut best = 0;
        for (i, v) in row.iter().enumerate().skip(1) {
            if *v > row[best] {
                best = i;
            }
        }
        best
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn snapshot(&self) -> QTableSnapshot {
        let rows = State::all()
            .map(|state| QTableRow {
                state: state.to_string(),
                values: self.row(&state).to_vec(),
                best_action: self.argmax(&state),
            })
            .collect();
        QTableSnapshot {
            num_states: STATE_COUNT,
            num_actions: self.num_actions,
            rows,
        }
    }
}

/// Serializable view of the table, for shutdown telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct QTableSnapshot {
    pub num_states: usize,
    pub num_actions: usize,
    pub rows: Vec<QTableRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QTableRow {
    pub state: String,
    pub values: Vec<f64>,
    pub best_action: usize,
}
