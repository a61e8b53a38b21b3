//! The seam between the search driver and the program being checked.
//!
//! An [`Interpreter`] executes one transition at a time: the search advances
//! a choice generator cascade, opens a transition and calls
//! [`Interpreter::forward`].  The interpreter reads the current choices from
//! the [`SystemState`], reports steps, allocations and the next choice point
//! back into it, and returns once it reaches that choice point or the end of
//! the program.

use statecheck_core::{CoreError, SystemState, ThreadId};
use thiserror::Error;

/// Errors raised while executing the program.
#[derive(Error, Debug)]
pub enum InterpreterError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("program error: {0}")]
    Program(String),
}

/// How a transition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Stopped at a choice point; at least one CG was registered.
    ChoicePoint,
    /// The program finished.
    Terminated,
}

/// A program the search can drive.
pub trait Interpreter {
    /// Program state captured for backtracking.
    type Memento: Clone;

    /// Thread that runs the first transition.
    fn main_thread(&self) -> ThreadId;

    /// Run the transition selected by the current choices.
    fn forward(&mut self, system: &mut SystemState) -> Result<ForwardOutcome, InterpreterError>;

    /// Fingerprint of the current program state.  Equal states must have
    /// equal fingerprints.
    fn fingerprint(&self, system: &SystemState) -> u64;

    fn memento(&self) -> Self::Memento;

    fn restore(&mut self, memento: &Self::Memento);

    /// Property violated in the current state, if any.
    fn violation(&self, _system: &SystemState) -> Option<String> {
        None
    }
}
