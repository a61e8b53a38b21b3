//! The ordered history of committed transitions on the current branch.

use crate::transition::{Transition, TransitionStorage};
use serde::{Deserialize, Serialize};

/// Committed transitions, oldest first, named after the application.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    app: String,
    transitions: Vec<Transition>,
}

impl Path {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            transitions: Vec::new(),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn push(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn remove_last(&mut self) -> Option<Transition> {
        self.transitions.pop()
    }

    pub fn last(&self) -> Option<&Transition> {
        self.transitions.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Transition> {
        self.transitions.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Transition> {
        self.transitions.get(index)
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transition> {
        self.transitions.iter()
    }

    /// Total steps over all transitions.
    pub fn step_count(&self) -> usize {
        self.transitions.iter().map(Transition::step_count).sum()
    }

    pub fn store(&self) -> PathStorage {
        PathStorage {
            app: self.app.clone(),
            transitions: self.transitions.iter().map(Transition::store).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Transition;
    type IntoIter = std::slice::Iter<'a, Transition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Serializable form of a [`Path`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStorage {
    app: String,
    transitions: Vec<TransitionStorage>,
}

impl PathStorage {
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn restore(&self) -> Path {
        Path {
            app: self.app.clone(),
            transitions: self
                .transitions
                .iter()
                .map(TransitionStorage::restore)
                .collect(),
        }
    }
}
