//! The system state shared by the interpreter and the search driver.
//!
//! [`SystemState`] is the single owner of everything the core keeps per
//! search: the SGOID registry, the CG stack, the transition being executed
//! and the committed path.  The interpreter reports allocations, choice
//! points and steps into it; the driver opens and closes transitions,
//! commits states and backtracks through it.
//!
//! # Transition lifecycle
//!
//! ```text
//! driver                          interpreter
//! ──────                          ───────────
//! advance_top_cg()
//! begin_transition()
//!                                 step_executed() / allocate() / ...
//!                                 register_cg()       (choice point)
//! end_transition()   ──→ path
//! commit_state(id)   ──→ pending CGs installed as a cascade
//! ```

use crate::allocation::{AllocationContext, AllocationContextKind};
use crate::backtrack::KernelState;
use crate::cascade::CgStack;
use crate::choice::{Choice, ChoiceGenerator, RandomizePolicy, Randomization};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::path::Path;
use crate::sgoid::{AllocCountsMemento, Sgoid, SgoidRegistry};
use crate::transition::{Annotation, Step, Transition};
use crate::{ClassId, InsnRef, StateId, ThreadId, UNKNOWN_STATE_ID};
use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Core state of one search.
#[derive(Debug)]
pub struct SystemState {
    registry: SgoidRegistry,
    context_kind: AllocationContextKind,
    cgs: CgStack,
    /// CGs registered by the running transition, in registration order.
    pending: Vec<ChoiceGenerator>,
    open: Option<Transition>,
    /// Whether the last path transition still waits for its state id.
    uncommitted: bool,
    path: Path,
    state_id: StateId,
    /// Draws per-CG seeds.
    seeder: ChaCha8Rng,
    policy: RandomizePolicy,
}

impl SystemState {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            registry: SgoidRegistry::new(),
            context_kind: config.allocation_context,
            cgs: CgStack::new(),
            pending: Vec::new(),
            open: None,
            uncommitted: false,
            path: Path::new(config.app_name.clone()),
            state_id: UNKNOWN_STATE_ID,
            seeder: ChaCha8Rng::seed_from_u64(config.cg_seed),
            policy: config.cg_randomize,
        }
    }

    // ── Interpreter → core ─────────────────────────────────────────

    /// Id of a new object created by the program.  `stack` holds the
    /// allocating thread's frames, top first.
    pub fn allocate(
        &mut self,
        class: ClassId,
        thread: ThreadId,
        stack: &[InsnRef],
    ) -> Result<Sgoid, CoreError> {
        let ctx = AllocationContext::sut(self.context_kind, class, thread, stack);
        self.registry.assign_id(&ctx)
    }

    /// Id of a new object created on behalf of the runtime at site `anchor`.
    pub fn allocate_system(
        &mut self,
        class: ClassId,
        thread: ThreadId,
        anchor: i32,
    ) -> Result<Sgoid, CoreError> {
        let ctx = AllocationContext::system(self.context_kind, class, thread, anchor);
        self.registry.assign_id(&ctx)
    }

    /// Register a choice point reached by `thread` at `insn`.
    ///
    /// CGs registered during one transition are installed as a single
    /// cascade when the resulting state is committed.  Sequential CGs pick
    /// up the configured randomization policy; a CG too large to randomize
    /// stays sequential.
    pub fn register_cg(&mut self, mut cg: ChoiceGenerator, thread: ThreadId, insn: InsnRef) {
        cg.set_context(thread, insn);
        if self.policy != RandomizePolicy::Sequential
            && cg.randomization().policy() == RandomizePolicy::Sequential
        {
            let randomization = self.randomization();
            if let Err(e) = cg.set_randomization(randomization) {
                warn!("CG \"{}\" kept in set order: {}", cg.id(), e);
            }
        }
        debug!(
            "registered CG \"{}\" ({} choices) at {} in {}",
            cg.id(),
            cg.total_choices(),
            insn,
            thread
        );
        self.pending.push(cg);
    }

    /// Record a step of the open transition.
    pub fn step_executed(&mut self, step: Step) -> Result<(), CoreError> {
        self.open_transition()?.add_step(step);
        Ok(())
    }

    pub fn set_output(&mut self, output: impl Into<String>) -> Result<(), CoreError> {
        self.open_transition()?.set_output(output);
        Ok(())
    }

    pub fn set_annotation(&mut self, annotation: Annotation) -> Result<(), CoreError> {
        self.open_transition()?.set_annotation(annotation);
        Ok(())
    }

    /// A randomization with the configured policy and a fresh seed.
    pub fn randomization(&mut self) -> Randomization {
        Randomization::new(self.policy, self.seeder.gen())
    }

    /// Current choices of the top cascade, root to leaf.
    pub fn current_choices(&self) -> Vec<Choice> {
        self.cgs
            .cascade()
            .iter()
            .filter_map(ChoiceGenerator::next_choice)
            .collect()
    }

    /// CGs registered by the running transition.
    pub fn pending_cgs(&self) -> &[ChoiceGenerator] {
        &self.pending
    }

    fn open_transition(&mut self) -> Result<&mut Transition, CoreError> {
        self.open.as_mut().ok_or(CoreError::NoOpenTransition)
    }

    // ── Core → driver ──────────────────────────────────────────────

    /// Advance the top cascade. `false` once it is exhausted.
    pub fn advance_top_cg(&mut self) -> Result<bool, CoreError> {
        self.cgs.advance_top()
    }

    /// Open a transition driven by the current top cascade.
    pub fn begin_transition(&mut self) -> Result<(), CoreError> {
        if self.open.is_some() {
            return Err(CoreError::TransitionAlreadyOpen);
        }
        let cascade = self.cgs.cascade();
        if cascade.is_empty() {
            return Err(CoreError::NoChoiceGenerator);
        }

        let thread = cascade
            .iter()
            .rev()
            .find_map(|cg| cg.choice_as::<ThreadId>())
            .or_else(|| cascade.last().and_then(ChoiceGenerator::thread))
            .unwrap_or(ThreadId(0));
        self.open = Some(Transition::new(cascade.to_vec(), thread));
        self.pending.clear();
        Ok(())
    }

    /// Close the open transition and append it to the path.
    pub fn end_transition(&mut self) -> Result<Transition, CoreError> {
        let transition = self.open.take().ok_or(CoreError::NoOpenTransition)?;
        self.path.push(transition.clone());
        self.uncommitted = true;
        Ok(transition)
    }

    /// Drop the open transition and any CG it registered.
    pub fn discard_transition(&mut self) {
        if let Some(t) = self.open.take() {
            debug!("discarding partial transition {}", t);
        }
        self.pending.clear();
    }

    /// Enter `state_id`.
    ///
    /// Stamps the last transition, and installs the CGs registered since the
    /// transition began: the first as a new root, the rest cascaded on it.
    pub fn commit_state(&mut self, state_id: StateId) {
        self.state_id = state_id;
        if self.uncommitted {
            if let Some(t) = self.path.last_mut() {
                t.set_state_id(state_id);
            }
            self.uncommitted = false;
        }

        if self.pending.is_empty() {
            return;
        }
        for (i, cg) in std::mem::take(&mut self.pending).into_iter().enumerate() {
            self.cgs.push(cg, i > 0);
        }
        self.cgs.set_state_id(state_id);
        debug!(
            "state {}: installed cascade of {} CG(s), CG depth {}",
            state_id,
            self.cgs.cascade().len(),
            self.cgs.depth()
        );
    }

    pub fn current_state_id(&self) -> StateId {
        self.state_id
    }

    pub fn remove_last_transition(&mut self) -> Option<Transition> {
        self.path.remove_last()
    }

    pub fn last_transition(&self) -> Option<&Transition> {
        self.path.last()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: Path) {
        self.path = path;
        self.uncommitted = false;
    }

    pub fn cg_stack(&self) -> &CgStack {
        &self.cgs
    }

    /// Replace the CG stack, e.g. with one captured alongside a snapshot.
    pub fn set_cg_stack(&mut self, cgs: CgStack) {
        self.cgs = cgs;
    }

    pub fn registry(&self) -> &SgoidRegistry {
        &self.registry
    }

    pub fn allocation_context(&self) -> AllocationContextKind {
        self.context_kind
    }
}

/// Kernel memento of a [`SystemState`].
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMemento {
    alloc_counts: AllocCountsMemento,
    cg_depth: usize,
    state_id: StateId,
}

impl SystemMemento {
    pub fn alloc_counts(&self) -> &AllocCountsMemento {
        &self.alloc_counts
    }

    pub fn cg_depth(&self) -> usize {
        self.cg_depth
    }

    pub fn state_id(&self) -> StateId {
        self.state_id
    }
}

impl KernelState for SystemState {
    type Memento = SystemMemento;

    fn memento(&self) -> SystemMemento {
        SystemMemento {
            alloc_counts: self.registry.memento(),
            cg_depth: self.cgs.depth(),
            state_id: self.state_id,
        }
    }

    /// Rewinds alloc counts, the CG stack and the state id.  SGOIDs already
    /// handed out and the path are left alone.
    fn restore(&mut self, memento: &SystemMemento) {
        self.registry.restore(&memento.alloc_counts);
        self.cgs.truncate(memento.cg_depth);
        self.state_id = memento.state_id;
        self.open = None;
        self.pending.clear();
        self.uncommitted = false;
    }
}
