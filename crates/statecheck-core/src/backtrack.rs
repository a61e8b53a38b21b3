//! Undo stack of kernel state.
//!
//! The search pushes the kernel state of the source state before running a
//! transition and pops it to come back.  What a kernel memento contains is
//! up to [`KernelState`]; the backtracker only stores them.

use log::debug;

/// State that can be captured into a memento and rewound to it.
pub trait KernelState {
    type Memento: Clone;

    fn memento(&self) -> Self::Memento;

    fn restore(&mut self, memento: &Self::Memento);
}

/// Snapshot/restore of the whole undo stack.
pub trait Backtracker<K: KernelState> {
    /// Token restoring the kernel and the undo stack at capture time.
    type Restorable: Clone;

    /// Record the current kernel state.
    fn push_kernel_state(&mut self, kernel: &K);

    /// Pop the most recent kernel state and restore it. `false` when empty.
    fn backtrack(&mut self, kernel: &mut K) -> bool;

    fn restorable_state(&self, kernel: &K) -> Self::Restorable;

    fn restore_state(&mut self, kernel: &mut K, state: &Self::Restorable);

    fn depth(&self) -> usize;
}

/// A plain stack of mementos.
#[derive(Debug, Clone)]
pub struct StackBacktracker<M> {
    stack: Vec<M>,
}

impl<M> StackBacktracker<M> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }
}

impl<M> Default for StackBacktracker<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// The kernel memento at capture time plus the undo stack below it.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorableState<M> {
    current: M,
    stack: Vec<M>,
}

impl<M> RestorableState<M> {
    pub fn current(&self) -> &M {
        &self.current
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl<K: KernelState> Backtracker<K> for StackBacktracker<K::Memento> {
    type Restorable = RestorableState<K::Memento>;

    fn push_kernel_state(&mut self, kernel: &K) {
        self.stack.push(kernel.memento());
    }

    fn backtrack(&mut self, kernel: &mut K) -> bool {
        match self.stack.pop() {
            Some(memento) => {
                kernel.restore(&memento);
                debug!("backtracked to depth {}", self.stack.len());
                true
            }
            None => false,
        }
    }

    fn restorable_state(&self, kernel: &K) -> Self::Restorable {
        RestorableState {
            current: kernel.memento(),
            stack: self.stack.clone(),
        }
    }

    fn restore_state(&mut self, kernel: &mut K, state: &Self::Restorable) {
        kernel.restore(&state.current);
        self.stack = state.stack.clone();
    }

    fn depth(&self) -> usize {
        self.stack.len()
    }
}
