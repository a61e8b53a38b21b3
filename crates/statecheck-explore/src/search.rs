//! Depth-first search driver.
//!
//! The driver owns the [`SystemState`], the program and the backtracker,
//! and alternates between two moves:
//!
//! ```text
//! forward:   advance top CG ─→ push kernel state ─→ begin transition
//!            ─→ interpreter.forward() ─→ end transition ─→ fingerprint
//!            ─→ commit state (installs the next cascade)
//!
//! backtrack: pop kernel state ─→ drop last path transition
//! ```
//!
//! A state is expanded only if it is new, not an end state, and below the
//! depth limit; otherwise the search backtracks right away.  The search is
//! over when the root CG is exhausted.

use crate::interpreter::{ForwardOutcome, Interpreter, InterpreterError};
use crate::state_set::StateSet;
use log::{debug, info, warn};
use serde::Serialize;
use statecheck_core::{
    Backtracker, CgStack, ChoiceGenerator, CoreConfig, CoreError, InsnRef, KernelState,
    OffloadPolicy, Path, RestorableState, RestorableVmState, SnapshotStore, StackBacktracker,
    StateId, SystemMemento, SystemState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the search driver.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("interpreter error: {0}")]
    Interpreter(#[from] InterpreterError),
}

/// Configuration of a search.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Core options (allocation contexts, randomization, snapshot storage).
    pub core: CoreConfig,
    /// Do not expand states deeper than this.
    pub max_depth: Option<usize>,
    /// Stop at the first end state instead of exploring everything.
    pub stop_on_first_end: bool,
    /// Round-trip the search through a snapshot every N new states.
    pub snapshot_every: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            max_depth: None,
            stop_on_first_end: false,
            snapshot_every: None,
        }
    }
}

/// The system state and the program, rewound together.
#[derive(Debug)]
pub struct Kernel<I> {
    system: SystemState,
    program: I,
}

/// Kernel memento: core part plus program part.
#[derive(Debug, Clone)]
pub struct KernelMemento<M> {
    system: SystemMemento,
    program: M,
}

impl<M> KernelMemento<M> {
    pub fn system(&self) -> &SystemMemento {
        &self.system
    }
}

impl<I: Interpreter> KernelState for Kernel<I> {
    type Memento = KernelMemento<I::Memento>;

    fn memento(&self) -> Self::Memento {
        KernelMemento {
            system: self.system.memento(),
            program: self.program.memento(),
        }
    }

    fn restore(&mut self, memento: &Self::Memento) {
        self.system.restore(&memento.system);
        self.program.restore(&memento.program);
    }
}

/// Backtracker token of a snapshot, plus the CG stack at capture time.
#[derive(Debug, Clone)]
pub struct Checkpoint<M> {
    backtracker: RestorableState<KernelMemento<M>>,
    cgs: CgStack,
}

impl<M> Checkpoint<M> {
    pub fn depth(&self) -> usize {
        self.backtracker.depth()
    }
}

/// A restorable snapshot of a [`Search`] over program `I`.
pub type Snapshot<I> = RestorableVmState<Checkpoint<<I as Interpreter>::Memento>>;

/// Why the search ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SearchOutcome {
    /// Every reachable state within the depth limit was explored.
    #[default]
    Exhausted,
    /// Stopped at the first end state.
    EndStateReached,
    /// Stopped on request.
    Stopped,
}

/// A property violation found in a new state.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub state_id: StateId,
    pub depth: usize,
    pub message: String,
    /// Path leading to the state, one line per transition.
    pub trace: Vec<String>,
}

/// Statistics of a search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// Distinct states.
    pub states: usize,
    pub new_states: u64,
    pub seen_states: u64,
    pub end_states: u64,
    pub transitions: u64,
    pub steps: u64,
    pub backtracks: u64,
    pub max_depth: usize,
    /// SGOIDs handed out.
    pub sgoids: u32,
    /// Snapshot round trips.
    pub snapshots: u64,
    pub violations: Vec<Violation>,
}

impl SearchReport {
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// What a forward move arrived at.
#[derive(Debug, Clone, Copy)]
struct Arrival {
    is_new: bool,
    is_end: bool,
}

/// Depth-first search over the states of an [`Interpreter`].
pub struct Search<I: Interpreter> {
    config: SearchConfig,
    kernel: Kernel<I>,
    backtracker: StackBacktracker<KernelMemento<I::Memento>>,
    states: StateSet,
    store: Option<SnapshotStore>,
    report: SearchReport,
    depth: usize,
    stop: Arc<AtomicBool>,
}

impl<I: Interpreter> Search<I> {
    /// Set up a search and commit the initial state.
    pub fn new(config: SearchConfig, program: I) -> Result<Self, SearchError> {
        let store = match config.core.offload {
            OffloadPolicy::File => {
                Some(SnapshotStore::from_config(&config.core).map_err(CoreError::from)?)
            }
            OffloadPolicy::Memory => None,
        };

        let mut system = SystemState::new(&config.core);
        let main = program.main_thread();
        system.register_cg(
            ChoiceGenerator::threads("<root>", &[main]),
            main,
            InsnRef::default(),
        );

        let mut search = Self {
            config,
            kernel: Kernel { system, program },
            backtracker: StackBacktracker::new(),
            states: StateSet::new(),
            store,
            report: SearchReport::default(),
            depth: 0,
            stop: Arc::new(AtomicBool::new(false)),
        };

        let fingerprint = search.kernel.program.fingerprint(&search.kernel.system);
        let (state_id, _) = search.states.add(fingerprint);
        search.kernel.system.commit_state(state_id);
        search.report.new_states = 1;
        search.check_violation(state_id);
        Ok(search)
    }

    /// Remove snapshot files left behind by earlier runs.
    pub fn sweep_storage(&self) -> Result<usize, SearchError> {
        match &self.store {
            Some(store) => Ok(store.sweep().map_err(CoreError::from)?),
            None => Ok(0),
        }
    }

    /// Explore until the state space is exhausted, an end state is reached
    /// (with `stop_on_first_end`), or a stop is requested.
    pub fn run(&mut self) -> Result<SearchReport, SearchError> {
        info!(
            "starting search: max depth {:?}, randomize {:?}, offload {:?}",
            self.config.max_depth, self.config.core.cg_randomize, self.config.core.offload
        );

        let outcome = loop {
            if self.stop.load(Ordering::Relaxed) {
                info!("stop requested at depth {}", self.depth);
                break SearchOutcome::Stopped;
            }

            match self.forward()? {
                Some(arrival) => {
                    if arrival.is_end && self.config.stop_on_first_end {
                        break SearchOutcome::EndStateReached;
                    }
                    if arrival.is_new && !arrival.is_end && !self.at_depth_limit() {
                        self.maybe_snapshot()?;
                    } else if !self.backtrack() {
                        break SearchOutcome::Exhausted;
                    }
                }
                None => {
                    if !self.backtrack() {
                        break SearchOutcome::Exhausted;
                    }
                }
            }
        };

        self.report.outcome = outcome;
        self.report.states = self.states.len();
        self.report.sgoids = self.kernel.system.registry().next_id();
        info!(
            "search finished ({:?}): {} states, {} transitions, {} backtracks, \
             max depth {}, {} violation(s)",
            outcome,
            self.report.states,
            self.report.transitions,
            self.report.backtracks,
            self.report.max_depth,
            self.report.violations.len()
        );
        Ok(self.report.clone())
    }

    /// Take the next transition out of the current state.  `None` if the
    /// current state has no choices left.
    fn forward(&mut self) -> Result<Option<Arrival>, SearchError> {
        if !self.kernel.system.advance_top_cg()? {
            return Ok(None);
        }
        self.backtracker.push_kernel_state(&self.kernel);
        self.kernel.system.begin_transition()?;

        let outcome = match self.kernel.program.forward(&mut self.kernel.system) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.kernel.system.discard_transition();
                return Err(e.into());
            }
        };
        let has_choice_point = !self.kernel.system.pending_cgs().is_empty();
        if has_choice_point != (outcome == ForwardOutcome::ChoicePoint) {
            self.kernel.system.discard_transition();
            return Err(InterpreterError::Program(format!(
                "transition ended with {:?} but registered {} choice generator(s)",
                outcome,
                self.kernel.system.pending_cgs().len()
            ))
            .into());
        }

        let transition = self.kernel.system.end_transition()?;
        let fingerprint = self.kernel.program.fingerprint(&self.kernel.system);
        let (state_id, is_new) = self.states.add(fingerprint);
        self.kernel.system.commit_state(state_id);
        self.depth += 1;

        let is_end = outcome == ForwardOutcome::Terminated;
        self.report.transitions += 1;
        self.report.steps += transition.step_count() as u64;
        self.report.max_depth = self.report.max_depth.max(self.depth);
        if is_new {
            self.report.new_states += 1;
        } else {
            self.report.seen_states += 1;
        }
        if is_end {
            self.report.end_states += 1;
        }
        debug!(
            "state {} {} at depth {} via {}",
            state_id,
            if is_new { "new" } else { "seen" },
            self.depth,
            transition
        );

        if is_new {
            self.check_violation(state_id);
        }

        Ok(Some(Arrival { is_new, is_end }))
    }

    /// Record a violation of the program's property in the current state.
    fn check_violation(&mut self, state_id: StateId) {
        if let Some(message) = self.kernel.program.violation(&self.kernel.system) {
            warn!("violation in state {}: {}", state_id, message);
            self.report.violations.push(Violation {
                state_id,
                depth: self.depth,
                message,
                trace: self.trace(),
            });
        }
    }

    /// Return to the state before the last transition. `false` at the root.
    fn backtrack(&mut self) -> bool {
        if !self.backtracker.backtrack(&mut self.kernel) {
            return false;
        }
        self.kernel.system.remove_last_transition();
        self.depth = self.depth.saturating_sub(1);
        self.report.backtracks += 1;
        true
    }

    fn at_depth_limit(&self) -> bool {
        self.config
            .max_depth
            .is_some_and(|limit| self.depth >= limit)
    }

    fn maybe_snapshot(&mut self) -> Result<(), SearchError> {
        let Some(every) = self.config.snapshot_every.filter(|&n| n > 0) else {
            return Ok(());
        };
        if self.report.new_states % every == 0 {
            let mut snapshot = self.snapshot()?;
            self.restore(&mut snapshot)?;
            self.report.snapshots += 1;
        }
        Ok(())
    }

    fn trace(&self) -> Vec<String> {
        self.kernel
            .system
            .path()
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    /// Capture the search frontier.
    ///
    /// An empty path is captured as no path.
    pub fn snapshot(&self) -> Result<Snapshot<I>, SearchError> {
        let checkpoint = Checkpoint {
            backtracker: self.backtracker.restorable_state(&self.kernel),
            cgs: self.kernel.system.cg_stack().clone(),
        };
        let path = self.kernel.system.path();
        let path = if path.is_empty() { None } else { Some(path) };
        let snapshot = RestorableVmState::capture(
            checkpoint,
            self.kernel.system.last_transition(),
            path,
            self.config.core.offload,
            self.store.as_ref(),
        )?;
        Ok(snapshot)
    }

    /// Rewind the search to `snapshot`.
    pub fn restore(&mut self, snapshot: &mut Snapshot<I>) -> Result<(), SearchError> {
        let path = match snapshot.path()? {
            Some(path) => path.clone(),
            None => Path::new(self.config.core.app_name.clone()),
        };
        let checkpoint = snapshot.bk_state();
        self.backtracker
            .restore_state(&mut self.kernel, &checkpoint.backtracker);
        self.kernel.system.set_cg_stack(checkpoint.cgs.clone());
        self.kernel.system.set_path(path);
        self.depth = checkpoint.depth();
        debug!("restored snapshot at depth {}", self.depth);
        Ok(())
    }

    /// Ask the search to stop before its next transition.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Shared stop flag, for stopping the search from elsewhere.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn report(&self) -> &SearchReport {
        &self.report
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn path(&self) -> &Path {
        self.kernel.system.path()
    }

    pub fn system(&self) -> &SystemState {
        &self.kernel.system
    }

    pub fn program(&self) -> &I {
        &self.kernel.program
    }

    pub fn states(&self) -> &StateSet {
        &self.states
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn snapshot_store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::RacyCounter;
    use statecheck_core::{OffloadPolicy, RandomizePolicy, ThreadId};
    use tempfile::TempDir;

    fn memory_config() -> SearchConfig {
        SearchConfig {
            core: CoreConfig {
                offload: OffloadPolicy::Memory,
                ..CoreConfig::default()
            },
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_search_config_default() {
        let config = SearchConfig::default();
        assert_eq!(config.max_depth, None);
        assert!(!config.stop_on_first_end);
        assert_eq!(config.snapshot_every, None);
    }

    #[test]
    fn test_initial_state() {
        let search = Search::new(memory_config(), RacyCounter::new(2)).unwrap();
        assert_eq!(search.states().len(), 1);
        assert_eq!(search.depth(), 0);
        assert!(search.path().is_empty());
        assert_eq!(search.system().current_state_id(), 0);
    }

    #[test]
    fn test_exhaustive_search_finds_lost_update() {
        let mut search = Search::new(memory_config(), RacyCounter::new(2)).unwrap();
        let report = search.run().unwrap();

        assert_eq!(report.outcome, SearchOutcome::Exhausted);
        assert!(report.states > 1);
        assert!(report.end_states > 0);
        assert!(report.has_violations());
        assert_eq!(report.new_states as usize, report.states);
        assert_eq!(report.transitions, report.new_states - 1 + report.seen_states);
        // Every transition is eventually undone.
        assert_eq!(report.backtracks, report.transitions);
        assert_eq!(search.depth(), 0);
        assert!(search.path().is_empty());
    }

    /// Violates its property from the start and ends after one transition.
    struct BrokenFromStart;

    impl Interpreter for BrokenFromStart {
        type Memento = ();

        fn main_thread(&self) -> ThreadId {
            ThreadId(0)
        }

        fn forward(
            &mut self,
            _system: &mut SystemState,
        ) -> Result<ForwardOutcome, InterpreterError> {
            Ok(ForwardOutcome::Terminated)
        }

        fn fingerprint(&self, _system: &SystemState) -> u64 {
            0
        }

        fn memento(&self) {}

        fn restore(&mut self, _memento: &()) {}

        fn violation(&self, _system: &SystemState) -> Option<String> {
            Some("broken before the first transition".to_string())
        }
    }

    #[test]
    fn test_initial_state_violation() {
        let search = Search::new(memory_config(), BrokenFromStart).unwrap();
        let violations = &search.report().violations;
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].state_id, 0);
        assert_eq!(violations[0].depth, 0);
        assert!(violations[0].trace.is_empty());

        // The only successor has the same fingerprint, so it is not reported again.
        let mut search = search;
        let report = search.run().unwrap();
        assert_eq!(report.outcome, SearchOutcome::Exhausted);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.seen_states, 1);
    }

    #[test]
    fn test_single_thread_has_no_violation() {
        let mut search = Search::new(memory_config(), RacyCounter::new(1)).unwrap();
        let report = search.run().unwrap();
        assert!(!report.has_violations());
        assert!(report.end_states >= 1);
    }

    #[test]
    fn test_search_is_deterministic() {
        let run = || {
            let mut search = Search::new(memory_config(), RacyCounter::new(2)).unwrap();
            search.run().unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.states, b.states);
        assert_eq!(a.transitions, b.transitions);
        assert_eq!(a.violations.len(), b.violations.len());
    }

    #[test]
    fn test_randomization_keeps_state_space() {
        let sequential = Search::new(memory_config(), RacyCounter::new(2))
            .unwrap()
            .run()
            .unwrap();

        let mut config = memory_config();
        config.core.cg_randomize = RandomizePolicy::RandomEachRun;
        config.core.cg_seed = 7;
        let randomized = Search::new(config, RacyCounter::new(2))
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(sequential.states, randomized.states);
        assert_eq!(sequential.end_states, randomized.end_states);
    }

    #[test]
    fn test_depth_limit() {
        let mut config = memory_config();
        config.max_depth = Some(2);
        let report = Search::new(config, RacyCounter::new(3))
            .unwrap()
            .run()
            .unwrap();
        assert!(report.max_depth <= 2);
        assert_eq!(report.end_states, 0);
    }

    #[test]
    fn test_stop_on_first_end() {
        let mut config = memory_config();
        config.stop_on_first_end = true;
        let mut search = Search::new(config, RacyCounter::new(2)).unwrap();
        let report = search.run().unwrap();
        assert_eq!(report.outcome, SearchOutcome::EndStateReached);
        assert_eq!(report.end_states, 1);
        assert_eq!(search.path().len(), search.depth());
    }

    #[test]
    fn test_request_stop() {
        let mut search = Search::new(memory_config(), RacyCounter::new(2)).unwrap();
        search.request_stop();
        let report = search.run().unwrap();
        assert_eq!(report.outcome, SearchOutcome::Stopped);
        assert_eq!(report.transitions, 0);
    }

    #[test]
    fn test_snapshot_round_trips_do_not_change_result() {
        let tmp = TempDir::new().unwrap();
        let plain = Search::new(memory_config(), RacyCounter::new(2))
            .unwrap()
            .run()
            .unwrap();

        let mut config = SearchConfig::default();
        config.core.storage_dir = Some(tmp.path().to_path_buf());
        config.snapshot_every = Some(1);
        let mut search = Search::new(config, RacyCounter::new(2)).unwrap();
        let report = search.run().unwrap();

        assert!(report.snapshots > 0);
        assert_eq!(report.states, plain.states);
        assert_eq!(report.transitions, plain.transitions);
        let store = search.snapshot_store().unwrap();
        assert!(store.snapshot_files().unwrap().is_empty());
    }
}
