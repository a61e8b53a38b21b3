//! A small concurrent program to explore: the racy counter.
//!
//! The main thread allocates a shared counter and starts `n` workers.  Each
//! worker allocates a private box, then increments the counter with a
//! separate load and store:
//!
//! ```text
//! T0:  counter = new Counter; start T1..Tn     (choice: initial value 0|1)
//! Ti:  box = new Box ─→ local = counter ─→ counter = local + 1
//! ```
//!
//! Every worker instruction is a scheduling point, so the search finds the
//! lost update where two workers load the same value.

use crate::interpreter::{ForwardOutcome, Interpreter, InterpreterError};
use statecheck_core::{ChoiceGenerator, ClassId, InsnRef, Sgoid, Step, SystemState, ThreadId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const MAIN: ThreadId = ThreadId(0);
const COUNTER_CLASS: ClassId = ClassId(1);
const BOX_CLASS: ClassId = ClassId(2);
/// Site tag of the counter allocation.
const COUNTER_SITE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Phase {
    Start,
    Load,
    Store,
    Done,
}

impl Phase {
    fn pc(self) -> u32 {
        match self {
            Phase::Start => 0,
            Phase::Load => 1,
            Phase::Store => 2,
            Phase::Done => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Worker {
    phase: Phase,
    local: i64,
    boxed: Option<Sgoid>,
}

/// Program state, also its backtracking memento.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterState {
    counter_id: Option<Sgoid>,
    initial: Option<i64>,
    counter: i64,
    workers: Vec<Worker>,
}

impl CounterState {
    pub fn counter(&self) -> i64 {
        self.counter
    }

    pub fn is_finished(&self) -> bool {
        self.counter_id.is_some() && self.workers.iter().all(|w| w.phase == Phase::Done)
    }
}

/// The racy counter with `threads` workers.
#[derive(Debug, Clone)]
pub struct RacyCounter {
    threads: u32,
    state: CounterState,
}

impl RacyCounter {
    pub fn new(threads: u32) -> Self {
        Self {
            threads,
            state: CounterState {
                counter_id: None,
                initial: None,
                counter: 0,
                workers: Vec::new(),
            },
        }
    }

    pub fn threads(&self) -> u32 {
        self.threads
    }

    pub fn state(&self) -> &CounterState {
        &self.state
    }

    fn worker_thread(index: usize) -> ThreadId {
        ThreadId(index as u32 + 1)
    }

    fn runnable(&self) -> Vec<ThreadId> {
        self.state
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.phase != Phase::Done)
            .map(|(i, _)| Self::worker_thread(i))
            .collect()
    }

    fn start(&mut self, system: &mut SystemState) -> Result<(), InterpreterError> {
        let insn = InsnRef::new(0, 0);
        self.state.counter_id = Some(system.allocate_system(COUNTER_CLASS, MAIN, COUNTER_SITE)?);
        system.step_executed(Step::new(MAIN, insn).with_label("counter = new Counter"))?;

        self.state.workers = (0..self.threads)
            .map(|_| Worker {
                phase: Phase::Start,
                local: 0,
                boxed: None,
            })
            .collect();
        system.step_executed(
            Step::new(MAIN, InsnRef::new(0, 1))
                .with_label(format!("start {} worker(s)", self.threads)),
        )?;

        system.register_cg(ChoiceGenerator::threads("sched", &self.runnable()), MAIN, insn);
        system.register_cg(ChoiceGenerator::interval("initial", 0, 1, 1)?, MAIN, insn);
        Ok(())
    }

    fn step_worker(
        &mut self,
        system: &mut SystemState,
        thread: ThreadId,
    ) -> Result<(), InterpreterError> {
        let index = (thread.0 as usize)
            .checked_sub(1)
            .filter(|&i| i < self.state.workers.len())
            .ok_or_else(|| InterpreterError::Program(format!("no worker {}", thread)))?;

        let phase = self.state.workers[index].phase;
        let insn = InsnRef::new(thread.0, phase.pc());
        let (label, next) = match phase {
            Phase::Start => {
                let id = system.allocate(BOX_CLASS, thread, &[insn])?;
                self.state.workers[index].boxed = Some(id);
                ("box = new Box".to_string(), Phase::Load)
            }
            Phase::Load => {
                self.state.workers[index].local = self.state.counter;
                (format!("local = counter ({})", self.state.counter), Phase::Store)
            }
            Phase::Store => {
                self.state.counter = self.state.workers[index].local + 1;
                (format!("counter = local + 1 ({})", self.state.counter), Phase::Done)
            }
            Phase::Done => {
                return Err(InterpreterError::Program(format!(
                    "{} scheduled after it finished",
                    thread
                )))
            }
        };
        self.state.workers[index].phase = next;
        system.step_executed(Step::new(thread, insn).with_label(label))?;
        Ok(())
    }
}

impl Interpreter for RacyCounter {
    type Memento = CounterState;

    fn main_thread(&self) -> ThreadId {
        MAIN
    }

    fn forward(&mut self, system: &mut SystemState) -> Result<ForwardOutcome, InterpreterError> {
        if self.state.counter_id.is_none() {
            self.start(system)?;
            return Ok(ForwardOutcome::ChoicePoint);
        }

        let choices = system.current_choices();
        if self.state.initial.is_none() {
            let initial = choices
                .iter()
                .find_map(|&c| i64::try_from(c).ok())
                .unwrap_or(0);
            self.state.initial = Some(initial);
            self.state.counter = initial;
        }
        let thread = choices
            .iter()
            .rev()
            .find_map(|&c| ThreadId::try_from(c).ok())
            .ok_or_else(|| InterpreterError::Program("no thread was scheduled".to_string()))?;

        self.step_worker(system, thread)?;

        let runnable = self.runnable();
        if runnable.is_empty() {
            system.set_output(format!("counter = {}", self.state.counter))?;
            return Ok(ForwardOutcome::Terminated);
        }
        system.register_cg(
            ChoiceGenerator::threads("sched", &runnable),
            thread,
            InsnRef::new(thread.0, Phase::Done.pc()),
        );
        Ok(ForwardOutcome::ChoicePoint)
    }

    fn fingerprint(&self, _system: &SystemState) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.state.hash(&mut hasher);
        hasher.finish()
    }

    fn memento(&self) -> CounterState {
        self.state.clone()
    }

    fn restore(&mut self, memento: &CounterState) {
        self.state = memento.clone();
    }

    fn violation(&self, _system: &SystemState) -> Option<String> {
        if !self.state.is_finished() {
            return None;
        }
        let initial = self.state.initial?;
        let expected = initial + self.threads as i64;
        (self.state.counter != expected).then(|| {
            format!(
                "lost update: counter is {} but {} worker(s) incremented it from {}",
                self.state.counter, self.threads, initial
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statecheck_core::{CoreConfig, OffloadPolicy};

    fn system() -> SystemState {
        let config = CoreConfig {
            offload: OffloadPolicy::Memory,
            ..CoreConfig::default()
        };
        let mut sys = SystemState::new(&config);
        sys.register_cg(ChoiceGenerator::threads("<root>", &[MAIN]), MAIN, InsnRef::default());
        sys.commit_state(0);
        sys
    }

    fn step(sys: &mut SystemState, program: &mut RacyCounter, id: i32) -> ForwardOutcome {
        assert!(sys.advance_top_cg().unwrap());
        sys.begin_transition().unwrap();
        let outcome = program.forward(sys).unwrap();
        sys.end_transition().unwrap();
        sys.commit_state(id);
        outcome
    }

    #[test]
    fn test_first_transition_registers_cascade() {
        let mut sys = system();
        let mut program = RacyCounter::new(2);
        assert_eq!(step(&mut sys, &mut program, 1), ForwardOutcome::ChoicePoint);

        let cascade = sys.cg_stack().cascade();
        assert_eq!(cascade.len(), 2);
        assert_eq!(cascade[0].total_choices(), 2);
        assert_eq!(cascade[1].total_choices(), 2);
        assert_eq!(sys.last_transition().unwrap().step_count(), 2);
        assert_eq!(sys.registry().len(), 1);
    }

    #[test]
    fn test_sequential_run_has_no_violation() {
        let mut sys = system();
        let mut program = RacyCounter::new(1);
        let mut id = 1;
        while step(&mut sys, &mut program, id) == ForwardOutcome::ChoicePoint {
            id += 1;
        }
        // Main transition plus three worker transitions.
        assert_eq!(sys.path().len(), 4);
        assert!(program.state().is_finished());
        assert_eq!(program.state().counter(), 1);
        assert_eq!(program.violation(&sys), None);
        assert_eq!(sys.last_transition().unwrap().output(), Some("counter = 1"));
    }

    #[test]
    fn test_fingerprint_follows_state() {
        let sys = system();
        let mut program = RacyCounter::new(2);
        let before = program.fingerprint(&sys);
        let memento = program.memento();

        program.state.counter = 5;
        assert_ne!(program.fingerprint(&sys), before);
        program.restore(&memento);
        assert_eq!(program.fingerprint(&sys), before);
    }
}
