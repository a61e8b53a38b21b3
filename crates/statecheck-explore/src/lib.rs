//! Depth-first search driver for the statecheck exploration core.
//!
//! This crate drives an [`Interpreter`] through every reachable state of a
//! program, using `statecheck-core` for choice generators, transitions,
//! object ids, backtracking and snapshots.
//!
//! # Architecture
//!
//! ```text
//! Search::run()
//!   loop:
//!     advance top CG cascade ──→ exhausted? ──→ backtrack (or finish at root)
//!     push kernel memento
//!     begin transition ──→ Interpreter::forward() ──→ end transition
//!     fingerprint ──→ StateSet ──→ commit state id
//!     seen / end state / depth limit ──→ backtrack
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use statecheck_explore::demo::RacyCounter;
//! use statecheck_explore::report::format_report;
//! use statecheck_explore::search::{Search, SearchConfig};
//!
//! let mut search = Search::new(SearchConfig::default(), RacyCounter::new(2)).unwrap();
//! let report = search.run().unwrap();
//!
//! println!("{}", format_report(&report));
//! ```
//!
//! # Module Structure
//!
//! - [`interpreter`] — The trait a program implements to be searched
//! - [`state_set`] — Fingerprint to state id map
//! - [`search`] — The depth-first search loop, snapshots and statistics
//! - [`demo`] — A racy counter program with a lost-update bug
//! - [`report`] — Search reports
//!
//! # Determinism
//!
//! A search is deterministic given the same seed: state ids are handed out
//! in discovery order and the core only uses seeded RNGs and ordered maps.

pub mod demo;
pub mod interpreter;
pub mod report;
pub mod search;
pub mod state_set;

// Re-export main types for convenience
pub use demo::{CounterState, RacyCounter};
pub use interpreter::{ForwardOutcome, Interpreter, InterpreterError};
pub use report::{format_report, format_violation};
pub use search::{
    Checkpoint, Kernel, KernelMemento, Search, SearchConfig, SearchError, SearchOutcome,
    SearchReport, Snapshot, Violation,
};
pub use state_set::StateSet;
