//! Transitions: recorded deterministic execution segments.
//!
//! A [`Transition`] is opened when the search advances a CG cascade and closed
//! at the next choice point.  While open it is an append-only log of
//! [`Step`]s.  Cloning shares the step log (copy-on-write) and deep-copies
//! the driving CG cascade.

use crate::choice::{CgStorage, ChoiceGenerator};
use crate::{InsnRef, StateId, ThreadId, UNKNOWN_STATE_ID};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One interpreter event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub thread: ThreadId,
    pub insn: InsnRef,
    /// Source location text, if the interpreter knows it.
    pub label: Option<String>,
}

impl Step {
    pub fn new(thread: ThreadId, insn: InsnRef) -> Self {
        Self {
            thread,
            insn,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The label, or the instruction location if there is none.
    pub fn line_string(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.insn.to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.thread, self.line_string())
    }
}

/// Listener-supplied annotation of a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotation {
    Text(String),
    KeyValue(Vec<(String, String)>),
}

/// A deterministic execution segment between two choice points.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Driving cascade, root to leaf.
    cascade: Vec<ChoiceGenerator>,
    thread: ThreadId,
    steps: Arc<Vec<Step>>,
    step_count: usize,
    annotation: Option<Annotation>,
    output: Option<String>,
    state_id: StateId,
}

impl Transition {
    pub fn new(cascade: Vec<ChoiceGenerator>, thread: ThreadId) -> Self {
        Self {
            cascade,
            thread,
            steps: Arc::new(Vec::new()),
            step_count: 0,
            annotation: None,
            output: None,
            state_id: UNKNOWN_STATE_ID,
        }
    }

    /// Append a step. O(1) unless the log is shared with a clone.
    pub fn add_step(&mut self, step: Step) {
        Arc::make_mut(&mut self.steps).push(step);
        self.step_count += 1;
    }

    /// Count a step that is not recorded in the log.
    pub fn inc_step_count(&mut self) {
        self.step_count += 1;
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// The `index`-th recorded step.
    ///
    /// Walks the log from the front, so it is O(index); use
    /// [`iter`](Self::iter) to visit every step.
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.iter().nth(index)
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    /// Single-pass cursor that can remove the step it just returned.
    pub fn cursor(&mut self) -> StepCursor<'_> {
        StepCursor {
            transition: self,
            next: 0,
            current: None,
        }
    }

    /// Source label of the last step, `"?"` for an empty transition.
    pub fn label(&self) -> String {
        match self.steps.last() {
            Some(step) => step.line_string(),
            None => "?".to_string(),
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The leaf of the driving cascade.
    pub fn choice_generator(&self) -> Option<&ChoiceGenerator> {
        self.cascade.last()
    }

    pub fn cascade(&self) -> &[ChoiceGenerator] {
        &self.cascade
    }

    pub fn state_id(&self) -> StateId {
        self.state_id
    }

    pub fn set_state_id(&mut self, state_id: StateId) {
        self.state_id = state_id;
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn set_output(&mut self, output: impl Into<String>) {
        self.output = Some(output.into());
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        self.annotation.as_ref()
    }

    pub fn set_annotation(&mut self, annotation: Annotation) {
        self.annotation = Some(annotation);
    }

    /// Whether `other` shares this transition's step log.
    pub fn shares_steps_with(&self, other: &Transition) -> bool {
        Arc::ptr_eq(&self.steps, &other.steps)
    }

    pub fn store(&self) -> TransitionStorage {
        TransitionStorage {
            cascade: self.cascade.iter().map(ChoiceGenerator::store).collect(),
            thread: self.thread,
            steps: self.steps.to_vec(),
            step_count: self.step_count,
            annotation: self.annotation.clone(),
            output: self.output.clone(),
            state_id: self.state_id,
        }
    }
}

impl<'a> IntoIterator for &'a Transition {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} steps, {}", self.thread, self.step_count, self.label())?;
        if let Some(cg) = self.choice_generator() {
            write!(f, " <{}>", cg.id())?;
        }
        Ok(())
    }
}

/// Cursor over the steps of a [`Transition`] supporting removal.
pub struct StepCursor<'a> {
    transition: &'a mut Transition,
    /// Index of the step the next call returns.
    next: usize,
    /// Index of the step last returned, if it is still present.
    current: Option<usize>,
}

impl StepCursor<'_> {
    pub fn has_next(&self) -> bool {
        self.next < self.transition.steps.len()
    }

    pub fn next_step(&mut self) -> Option<&Step> {
        let index = self.next;
        let step = self.transition.steps.get(index)?;
        self.current = Some(index);
        self.next = index + 1;
        Some(step)
    }

    /// Remove the step last returned by [`next_step`](Self::next_step).
    ///
    /// Returns `false` if there is no such step.  The step count drops by one.
    pub fn remove(&mut self) -> bool {
        let Some(index) = self.current.take() else {
            return false;
        };
        Arc::make_mut(&mut self.transition.steps).remove(index);
        self.transition.step_count = self.transition.step_count.saturating_sub(1);
        self.next = index;
        true
    }
}

/// Serializable form of a [`Transition`]. Steps are kept inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStorage {
    cascade: Vec<CgStorage>,
    thread: ThreadId,
    steps: Vec<Step>,
    step_count: usize,
    annotation: Option<Annotation>,
    output: Option<String>,
    state_id: StateId,
}

impl TransitionStorage {
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn restore(&self) -> Transition {
        Transition {
            cascade: self.cascade.iter().map(CgStorage::restore).collect(),
            thread: self.thread,
            steps: Arc::new(self.steps.clone()),
            step_count: self.step_count,
            annotation: self.annotation.clone(),
            output: self.output.clone(),
            state_id: self.state_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(pc: u32) -> Step {
        Step::new(ThreadId(0), InsnRef::new(1, pc))
    }

    fn transition(n: u32) -> Transition {
        let mut cg = ChoiceGenerator::threads("sched", &[ThreadId(0)]);
        cg.advance().unwrap();
        let mut t = Transition::new(vec![cg], ThreadId(0));
        for pc in 0..n {
            t.add_step(step(pc));
        }
        t
    }

    #[test]
    fn iteration_visits_steps_in_order() {
        let t = transition(4);
        assert_eq!(t.step_count(), 4);
        let pcs: Vec<u32> = t.iter().map(|s| s.insn.pc).collect();
        assert_eq!(pcs, vec![0, 1, 2, 3]);
        assert_eq!((&t).into_iter().count(), t.step_count());
    }

    #[test]
    fn empty_transition() {
        let mut t = transition(0);
        assert_eq!(t.iter().count(), 0);
        assert!(t.last_step().is_none());
        assert!(t.step(0).is_none());
        assert_eq!(t.label(), "?");

        let mut cursor = t.cursor();
        assert!(!cursor.has_next());
        assert!(cursor.next_step().is_none());
        assert!(!cursor.remove());
    }

    #[test]
    fn indexed_access() {
        let t = transition(3);
        assert_eq!(t.step(2).unwrap().insn.pc, 2);
        assert!(t.step(3).is_none());
        assert_eq!(t.last_step().unwrap().insn.pc, 2);
    }

    #[test]
    fn inc_step_count_does_not_record() {
        let mut t = transition(1);
        t.inc_step_count();
        assert_eq!(t.step_count(), 2);
        assert_eq!(t.iter().count(), 1);
    }

    #[test]
    fn label_prefers_source_text() {
        let mut t = transition(1);
        assert_eq!(t.label(), "m1@0");
        t.add_step(step(9).with_label("Counter.java:12"));
        assert_eq!(t.label(), "Counter.java:12");
    }

    #[test]
    fn cursor_removal() {
        let mut t = transition(4);
        {
            let mut cursor = t.cursor();
            while let Some(s) = cursor.next_step() {
                let odd = s.insn.pc % 2 == 1;
                if odd {
                    assert!(cursor.remove());
                    assert!(!cursor.remove());
                }
            }
        }
        let pcs: Vec<u32> = t.iter().map(|s| s.insn.pc).collect();
        assert_eq!(pcs, vec![0, 2]);
        assert_eq!(t.step_count(), 2);
    }

    #[test]
    fn clone_shares_steps_and_copies_cascade() {
        let original = transition(2);
        let mut copy = original.clone();
        assert!(copy.shares_steps_with(&original));
        assert_eq!(copy.choice_generator(), original.choice_generator());

        copy.add_step(step(7));
        assert!(!copy.shares_steps_with(&original));
        assert_eq!(original.step_count(), 2);
        assert_eq!(copy.step_count(), 3);
    }

    #[test]
    fn store_restore_keeps_everything() {
        let mut t = transition(3);
        t.set_state_id(8);
        t.set_output("hello\n");
        t.set_annotation(Annotation::KeyValue(vec![("race".into(), "count".into())]));

        let json = serde_json::to_string(&t.store()).unwrap();
        let stored: TransitionStorage = serde_json::from_str(&json).unwrap();
        let restored = stored.restore();

        assert_eq!(restored, t);
        assert_eq!(restored.state_id(), 8);
        assert_eq!(restored.output(), Some("hello\n"));
        assert_eq!(restored.iter().count(), 3);
        assert_eq!(stored.thread(), ThreadId(0));
    }
}
