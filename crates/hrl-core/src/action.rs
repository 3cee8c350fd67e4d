//! Actions and the fixed action set of an agent

use serde::{Deserialize, Serialize};

use crate::{RLError, Result};

/// A labelled action with its effect vector in state or motor space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Human readable label (e.g. `"up"`)
    pub label: String,
    /// Direction vector associated with the action
    pub vector: Vec<f64>,
}

impl Action {
    /// Create a new action
    pub fn new(label: impl Into<String>, vector: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            vector,
        }
    }
}

/// Immutable, ordered set of actions available to one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Action>", into = "Vec<Action>")]
pub struct ActionSet {
    actions: Vec<Action>,
}

impl ActionSet {
    /// Build an action set. Labels must be unique and all vectors the same length.
    pub fn new(actions: Vec<Action>) -> Result<Self> {
        let Some(first) = actions.first() else {
            return Err(RLError::InvalidAction("action set is empty".into()));
        };
        let dim = first.vector.len();

        for (i, action) in actions.iter().enumerate() {
            if action.vector.len() != dim {
                return Err(RLError::DimensionMismatch {
                    expected: dim,
                    actual: action.vector.len(),
                });
            }
            if actions[..i].iter().any(|a| a.label == action.label) {
                return Err(RLError::InvalidAction(format!(
                    "duplicate action label '{}'",
                    action.label
                )));
            }
        }

        Ok(Self { actions })
    }

    /// The four cardinal moves used by the navigation tasks
    #[must_use]
    pub fn cardinal() -> Self {
        Self {
            actions: vec![
                Action::new("up", vec![0.0, 1.0]),
                Action::new("right", vec![1.0, 0.0]),
                Action::new("down", vec![0.0, -1.0]),
                Action::new("left", vec![-1.0, 0.0]),
            ],
        }
    }

    /// Number of actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Always false; an action set is never empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Dimension of the action vectors
    #[must_use]
    pub fn vector_dim(&self) -> usize {
        self.actions[0].vector.len()
    }

    /// Action at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Action> {
        self.actions.get(index)
    }

    /// Index of the action with the given label
    #[must_use]
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.label == label)
    }

    /// Iterate over the actions in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Index of the action whose vector has the highest dot product with
    /// `vector`. Ties go to the earliest action.
    #[must_use]
    pub fn closest(&self, vector: &[f64]) -> usize {
        crate::state::argmax(
            &self
                .actions
                .iter()
                .map(|a| crate::state::dot(&a.vector, vector))
                .collect::<Vec<_>>(),
        )
    }
}

impl TryFrom<Vec<Action>> for ActionSet {
    type Error = RLError;

    fn try_from(actions: Vec<Action>) -> Result<Self> {
        Self::new(actions)
    }
}

impl From<ActionSet> for Vec<Action> {
    fn from(set: ActionSet) -> Self {
        set.actions
    }
}
