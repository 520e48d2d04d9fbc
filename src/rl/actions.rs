// src/rl/actions.rs
//
// Fixed, enumerated catalog of weight assignments the agent chooses from.
//
// Weights are expected to sum to 100 but the engine does not enforce it;
// that is a contract on whoever authors the catalog. `unbalanced()` lets
// the caller surface violations at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{WeightTuple, NUM_TARGETS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("action catalog is empty")]
    Empty,
    #[error("action {index}: expected {expected} weights, got {got}")]
    Arity {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("action {index}: invalid weight '{value}'")]
    InvalidWeight { index: usize, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCatalog {
    actions: Vec<WeightTuple>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self {
            actions: vec![
                WeightTuple::new([70, 15, 15]), // favor v1
                WeightTuple::new([15, 70, 15]), // favor v2
                WeightTuple::new([15, 15, 70]), // favor v3
                WeightTuple::new([34, 33, 33]), // even split
                WeightTuple::new([50, 50, 0]),  // exclude v3
                WeightTuple::new([50, 0, 50]),  // exclude v2
                WeightTuple::new([0, 50, 50]),  // exclude v1
            ],
        }
    }
}

impl ActionCatalog {
    pub fn new(actions: Vec<WeightTuple>) -> Result<Self, CatalogError> {
        if actions.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { actions })
    }

    /// Parse `"70,15,15;15,70,15"`: actions separated by `;`, weights by `,`.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let mut actions = Vec::new();
        for (index, chunk) in raw
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .enumerate()
        {
            let parts: Vec<&str> = chunk.split(',').map(str::trim).collect();
            if parts.len() != NUM_TARGETS {
                return Err(CatalogError::Arity {
                    index,
                    expected: NUM_TARGETS,
                    got: parts.len(),
                });
            }
            let mut weights = [0u32; NUM_TARGETS];
            for (slot, part) in weights.iter_mut().zip(parts.iter()) {
                *slot = part.parse().map_err(|_| CatalogError::InvalidWeight {
                    index,
                    value: part.to_string(),
                })?;
            }
            actions.push(WeightTuple::new(weights));
        }
        Self::new(actions)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WeightTuple> {
        self.actions.get(index)
    }

    /// # Panics
    ///
    /// Panics if `index` is outside the catalog.
    pub fn weights(&self, index: usize) -> WeightTuple {
        match self.actions.get(index) {
            Some(w) => *w,
            None => panic!(
                "action index {index} out of range (catalog size {})",
                self.actions.len()
            ),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &WeightTuple> {
        self.actions.iter()
    }

    /// Indices of actions whose weights do not sum to 100.
    pub fn unbalanced(&self) -> Vec<usize> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.sums_to_100())
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_shape() {
        let catalog = ActionCatalog::default();
        assert_eq!(catalog.len(), 7);
        assert_eq!(catalog.weights(1), WeightTuple::new([15, 70, 15]));
        assert!(catalog.unbalanced().is_empty());
    }

    #[test]
    fn parse_accepts_whitespace_and_trailing_separator() {
        let catalog = ActionCatalog::parse(" 60,20,20 ; 20,60,20;").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.weights(0), WeightTuple::new([60, 20, 20]));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(ActionCatalog::parse(""), Err(CatalogError::Empty));
        assert!(matches!(
            ActionCatalog::parse("50,50"),
            Err(CatalogError::Arity { got: 2, .. })
        ));
        assert!(matches!(
            ActionCatalog::parse("50,x,50"),
            Err(CatalogError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn unbalanced_is_reported_not_rejected() {
        let catalog = ActionCatalog::parse("50,50,50;34,33,33").unwrap();
        assert_eq!(catalog.unbalanced(), vec![0]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn weights_panics_outside_catalog() {
        let _ = ActionCatalog::default().weights(7);
    }
}
