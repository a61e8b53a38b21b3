//! The stack of choice generators on the current search path.
//!
//! CGs are kept in registration order.  A CG flagged `is_cascaded` has the
//! slot directly below it as its parent, so a cascade is always a contiguous
//! run of the stack ending in a non-cascaded root.  Parents can only be
//! earlier slots, which rules out cycles without any runtime check.
//!
//! ```text
//!   slot:   0        1        2          3
//!          [sched]  [sched]  [sched] ←─ [data, cascaded]
//!                             └────── cascade of top ──────┘
//! ```

use crate::choice::ChoiceGenerator;
use crate::error::CoreError;
use crate::StateId;
use log::debug;

/// Owns every CG installed along the current path.
#[derive(Debug, Clone, Default)]
pub struct CgStack {
    cgs: Vec<ChoiceGenerator>,
}

impl CgStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `cg` on top.  With `cascaded`, the previous top becomes its
    /// parent; a cascaded push onto an empty stack installs a root.
    pub fn push(&mut self, mut cg: ChoiceGenerator, cascaded: bool) {
        let cascaded = cascaded && !self.cgs.is_empty();
        if cascaded {
            debug!(
                "cascading CG \"{}\" below \"{}\"",
                cg.id(),
                self.cgs.last().map(|p| p.id()).unwrap_or_default()
            );
        }
        cg.set_cascaded(cascaded);
        self.cgs.push(cg);
    }

    pub fn depth(&self) -> usize {
        self.cgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cgs.is_empty()
    }

    pub fn top(&self) -> Option<&ChoiceGenerator> {
        self.cgs.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ChoiceGenerator> {
        self.cgs.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&ChoiceGenerator> {
        self.cgs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChoiceGenerator> {
        self.cgs.iter()
    }

    /// Slot of the cascade parent of the CG at `index`.
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        match self.cgs.get(index) {
            Some(cg) if cg.is_cascaded() && index > 0 => Some(index - 1),
            _ => None,
        }
    }

    /// Root-to-leaf chain ending at `index` (inclusive).
    pub fn cascade_at(&self, index: usize) -> &[ChoiceGenerator] {
        if index >= self.cgs.len() {
            return &[];
        }
        let mut root = index;
        while let Some(parent) = self.parent_of(root) {
            root = parent;
        }
        &self.cgs[root..=index]
    }

    /// Root-to-leaf chain of the top CG.
    pub fn cascade(&self) -> &[ChoiceGenerator] {
        match self.cgs.len() {
            0 => &[],
            n => self.cascade_at(n - 1),
        }
    }

    /// Set the installation state of the top CG and every cascaded parent.
    pub fn set_state_id(&mut self, state_id: StateId) {
        let Some(mut index) = self.cgs.len().checked_sub(1) else {
            return;
        };
        loop {
            self.cgs[index].set_state_id(state_id);
            match self.parent_of(index) {
                Some(parent) => index = parent,
                None => break,
            }
        }
    }

    /// Drop every CG above `depth`.
    pub fn truncate(&mut self, depth: usize) {
        self.cgs.truncate(depth);
    }

    /// Advance the top cascade to its next combination.
    ///
    /// Combinations are enumerated leaf-fastest: the leaf runs through its
    /// choices, then its parent advances and the leaf starts over.  Returns
    /// `false` once the whole product is exhausted.
    pub fn advance_top(&mut self) -> Result<bool, CoreError> {
        match self.cgs.len() {
            0 => Ok(false),
            n => self.advance_at(n - 1),
        }
    }

    fn advance_at(&mut self, index: usize) -> Result<bool, CoreError> {
        let parent = self.parent_of(index);

        if let Some(p) = parent {
            if self.cgs[p].processed_choices() == 0 && !self.advance_at(p)? {
                return Ok(false);
            }
        }

        if self.cgs[index].has_more_choices() {
            self.cgs[index].advance()?;
            return Ok(true);
        }

        if let Some(p) = parent {
            if self.advance_at(p)? {
                let leaf = &mut self.cgs[index];
                leaf.reset();
                if leaf.has_more_choices() {
                    leaf.advance()?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::Choice;
    use crate::ThreadId;

    fn combos(stack: &mut CgStack) -> Vec<Vec<Choice>> {
        let mut out = Vec::new();
        while stack.advance_top().unwrap() {
            out.push(
                stack
                    .cascade()
                    .iter()
                    .map(|cg| cg.next_choice().unwrap())
                    .collect(),
            );
        }
        out
    }

    #[test]
    fn empty_stack_is_exhausted() {
        let mut stack = CgStack::new();
        assert!(!stack.advance_top().unwrap());
        assert!(stack.cascade().is_empty());
    }

    #[test]
    fn single_cg_enumerates_its_choices() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::ints("data", &[1, 2]), false);
        assert_eq!(combos(&mut stack), vec![vec![Choice::Int(1)], vec![Choice::Int(2)]]);
    }

    #[test]
    fn cascade_is_leaf_fastest_product() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::threads("sched", &[ThreadId(1), ThreadId(2)]), false);
        stack.push(ChoiceGenerator::ints("data", &[7, 8]), true);

        let t1 = Choice::Thread(ThreadId(1));
        let t2 = Choice::Thread(ThreadId(2));
        assert_eq!(
            combos(&mut stack),
            vec![
                vec![t1, Choice::Int(7)],
                vec![t1, Choice::Int(8)],
                vec![t2, Choice::Int(7)],
                vec![t2, Choice::Int(8)],
            ]
        );
    }

    #[test]
    fn three_level_cascade() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("a"), false);
        stack.push(ChoiceGenerator::ints("b", &[1, 2, 3]), true);
        stack.push(ChoiceGenerator::booleans("c"), true);
        assert_eq!(combos(&mut stack).len(), 12);
        assert_eq!(stack.cascade().len(), 3);
    }

    #[test]
    fn empty_leaf_yields_nothing() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("a"), false);
        stack.push(ChoiceGenerator::ints("none", &[]), true);
        assert!(combos(&mut stack).is_empty());
    }

    #[test]
    fn cascade_stops_at_uncascaded_root() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("earlier"), false);
        stack.push(ChoiceGenerator::booleans("root"), false);
        stack.push(ChoiceGenerator::booleans("leaf"), true);

        let ids: Vec<&str> = stack.cascade().iter().map(|cg| cg.id()).collect();
        assert_eq!(ids, vec!["root", "leaf"]);
        assert!(!stack.cascade()[0].is_cascaded());
        assert_eq!(stack.parent_of(1), None);
        assert_eq!(stack.parent_of(2), Some(1));
    }

    #[test]
    fn cascaded_push_on_empty_stack_is_root() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("lonely"), true);
        assert!(!stack.top().unwrap().is_cascaded());
    }

    #[test]
    fn state_id_propagates_to_cascade_only() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("earlier"), false);
        stack.push(ChoiceGenerator::booleans("root"), false);
        stack.push(ChoiceGenerator::booleans("leaf"), true);
        stack.set_state_id(5);

        assert_eq!(stack.get(0).unwrap().state_id(), crate::UNKNOWN_STATE_ID);
        assert!(stack.cascade().iter().all(|cg| cg.state_id() == 5));
    }

    #[test]
    fn truncate_drops_upper_slots() {
        let mut stack = CgStack::new();
        stack.push(ChoiceGenerator::booleans("a"), false);
        stack.push(ChoiceGenerator::booleans("b"), false);
        stack.truncate(1);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().unwrap().id(), "a");
    }
}
