//! State-space exploration core for a bytecode model checker.
//!
//! This crate turns a non-deterministic program execution into a searchable
//! graph of states.  Every edge of that graph is a [`Transition`]: one
//! deterministic run of the interpreter between two choice points.  Every
//! choice point is mediated by a [`ChoiceGenerator`] that enumerates the
//! alternatives (thread schedules, input values, ...).
//!
//! # Architecture
//!
//! ```text
//! interpreter                    core                          search driver
//! ───────────                    ────                          ─────────────
//! new object    ──→ allocate() ──→ AllocationContext
//!                                  └─→ SgoidRegistry ──→ sgoid
//! choice point  ──→ register_cg() ─→ pending cascade
//! instruction   ──→ step_executed() → open Transition
//!                                  end_transition() ──→ Path ──→ commit_state()
//!                                  CgStack::advance_top() ←── advance_top_cg()
//!                                  Backtracker        ←── backtrack()
//!                                  RestorableVmState  ←── snapshot()/restore()
//! ```
//!
//! # Module Structure
//!
//! - [`allocation`] — Allocation contexts (hashed and precise)
//! - [`sgoid`] — Search-global object ids
//! - [`choice`] — Choice generators, choice sets, randomization
//! - [`cascade`] — The stack of CGs on the current path and cascade enumeration
//! - [`transition`] — Steps and transitions
//! - [`path`] — The committed transition history
//! - [`backtrack`] — Undo stack of kernel state
//! - [`system`] — The interpreter- and driver-facing system state
//! - [`storage`] — Snapshot files in secondary storage
//! - [`restorable`] — Restorable VM snapshots with lazy rehydration
//! - [`config`] — Core configuration options
//! - [`error`] — Error kinds
//!
//! # Determinism
//!
//! Every structure that is iterated is ordered (`BTreeMap`, `im::OrdMap`),
//! and all randomness comes from seeded ChaCha generators, so a search is
//! reproducible given the same seed and interpreter.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod allocation;
pub mod backtrack;
pub mod cascade;
pub mod choice;
pub mod config;
pub mod error;
pub mod path;
pub mod restorable;
pub mod sgoid;
pub mod storage;
pub mod system;
pub mod transition;

// Re-export main types for convenience
pub use allocation::{Allocation, AllocationContext, AllocationContextKind, Anchor, StoredContext};
pub use backtrack::{Backtracker, KernelState, RestorableState, StackBacktracker};
pub use cascade::CgStack;
pub use choice::{
    Attributes, BoolSet, CgStorage, Choice, ChoiceGenerator, ChoiceSet, ChoiceSetStorage,
    DoubleSet, IntInterval, IntSet, RandomizePolicy, Randomization, ThreadSet,
};
pub use config::{CoreConfig, OffloadPolicy};
pub use error::{CoreError, ErrorKind};
pub use path::{Path, PathStorage};
pub use restorable::RestorableVmState;
pub use sgoid::{AllocCountsMemento, Sgoid, SgoidRegistry, StoredAllocCounts};
pub use storage::{SnapshotData, SnapshotStore, StorageError};
pub use system::{SystemMemento, SystemState};
pub use transition::{Annotation, Step, StepCursor, Transition, TransitionStorage};

/// State id of a state that has not been committed to the state set.
pub const UNKNOWN_STATE_ID: StateId = -1;

/// Dense id handed out by the state set for every distinct state.
pub type StateId = i32;

/// Identifier of a thread of the system under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identifier of a class being instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

/// An instruction location: method id plus bytecode offset.
///
/// Also serves as a call-stack frame when building allocation contexts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct InsnRef {
    pub method: u32,
    pub pc: u32,
}

impl InsnRef {
    pub fn new(method: u32, pc: u32) -> Self {
        Self { method, pc }
    }
}

impl fmt::Display for InsnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}@{}", self.method, self.pc)
    }
}
