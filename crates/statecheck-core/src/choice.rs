//! Choice generators — enumerators of one non-deterministic decision.
//!
//! A [`ChoiceGenerator`] is a single concrete struct.  What it enumerates is
//! delegated to a [`ChoiceSet`] capability object (threads to schedule, ints,
//! booleans, ...), and the order it enumerates them in is decided by a
//! [`Randomization`] policy.  Randomization only permutes the visitation
//! order; the set of choices is never changed.
//!
//! # Lifecycle
//!
//! ```text
//! new ──→ advance ──→ advance ──→ ... ──→ advance (last, done) ──→ reset ──→ advance ...
//!          │
//!          └─ next_choice() is None before the first advance
//! ```
//!
//! Cascading is handled by [`CgStack`](crate::cascade::CgStack); a generator
//! itself only carries the `is_cascaded` flag.

use crate::error::CoreError;
use crate::{InsnRef, StateId, ThreadId, UNKNOWN_STATE_ID};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;

/// A single choice value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Choice {
    Thread(ThreadId),
    Int(i64),
    Bool(bool),
    Double(f64),
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Choice::Thread(t) => write!(f, "{}", t),
            Choice::Int(v) => write!(f, "{}", v),
            Choice::Bool(b) => write!(f, "{}", b),
            Choice::Double(d) => write!(f, "{}", d),
        }
    }
}

impl TryFrom<Choice> for ThreadId {
    type Error = Choice;

    fn try_from(choice: Choice) -> Result<Self, Self::Error> {
        match choice {
            Choice::Thread(t) => Ok(t),
            other => Err(other),
        }
    }
}

impl TryFrom<Choice> for i64 {
    type Error = Choice;

    fn try_from(choice: Choice) -> Result<Self, Self::Error> {
        match choice {
            Choice::Int(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl TryFrom<Choice> for bool {
    type Error = Choice;

    fn try_from(choice: Choice) -> Result<Self, Self::Error> {
        match choice {
            Choice::Bool(b) => Ok(b),
            other => Err(other),
        }
    }
}

impl TryFrom<Choice> for f64 {
    type Error = Choice;

    fn try_from(choice: Choice) -> Result<Self, Self::Error> {
        match choice {
            Choice::Double(d) => Ok(d),
            other => Err(other),
        }
    }
}

// ── Choice sets ────────────────────────────────────────────────────

/// The enumerable alternatives behind a [`ChoiceGenerator`].
///
/// Implementations are immutable once built; the generator keeps the cursor.
pub trait ChoiceSet: fmt::Debug + Send + Sync {
    /// Number of alternatives. Must not change over the set's lifetime.
    fn len(&self) -> usize;

    /// The alternative at `index`, `index < len()`.
    fn get(&self, index: usize) -> Choice;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether choosing from this set reschedules threads.
    fn is_scheduling_point(&self) -> bool {
        false
    }

    /// Storage form. The default materializes every alternative.
    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Explicit((0..self.len()).map(|i| self.get(i)).collect())
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet>;
}

impl Clone for Box<dyn ChoiceSet> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Runnable threads to schedule next.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSet(pub Vec<ThreadId>);

impl ChoiceSet for ThreadSet {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize) -> Choice {
        Choice::Thread(self.0[index])
    }

    fn is_scheduling_point(&self) -> bool {
        true
    }

    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Threads(self.0.clone())
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(self.clone())
    }
}

/// An explicit set of int values.
#[derive(Debug, Clone, PartialEq)]
pub struct IntSet(pub Vec<i64>);

impl ChoiceSet for IntSet {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize) -> Choice {
        Choice::Int(self.0[index])
    }

    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Ints(self.0.clone())
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(self.clone())
    }
}

/// Ints from `min` to `max` in steps of `delta`.
///
/// A positive `delta` counts up from `min`, a negative one counts down from
/// `max`. A zero `delta` or `min > max` yields an empty set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntInterval {
    min: i64,
    max: i64,
    delta: i64,
    len: usize,
}

impl IntInterval {
    /// Fails with [`CoreError::ChoiceSetTooLarge`] if the number of values
    /// does not fit in `usize`.
    pub fn new(min: i64, max: i64, delta: i64) -> Result<Self, CoreError> {
        let count = Self::count(min, max, delta);
        let len = usize::try_from(count).map_err(|_| CoreError::ChoiceSetTooLarge {
            len: count,
            limit: usize::MAX as u128,
        })?;
        Ok(Self {
            min,
            max,
            delta,
            len,
        })
    }

    /// Rebuild a stored interval. Stored intervals passed [`new`](Self::new),
    /// so the count only saturates for hand-edited storage.
    fn from_stored(min: i64, max: i64, delta: i64) -> Self {
        let len = usize::try_from(Self::count(min, max, delta)).unwrap_or(usize::MAX);
        Self {
            min,
            max,
            delta,
            len,
        }
    }

    fn count(min: i64, max: i64, delta: i64) -> u128 {
        if delta == 0 || min > max {
            return 0;
        }
        let span = (max as i128 - min as i128) as u128;
        span / delta.unsigned_abs() as u128 + 1
    }

    pub fn min(&self) -> i64 {
        self.min
    }

    pub fn max(&self) -> i64 {
        self.max
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }
}

impl ChoiceSet for IntInterval {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Choice {
        // In i128 the offset cannot overflow, and the value lies in
        // [min, max] for every index below len.
        let offset = index as i128 * self.delta as i128;
        let value = if self.delta > 0 {
            self.min as i128 + offset
        } else {
            self.max as i128 + offset
        };
        Choice::Int(value.clamp(self.min as i128, self.max as i128) as i64)
    }

    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Interval {
            min: self.min,
            max: self.max,
            delta: self.delta,
        }
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(*self)
    }
}

/// `false` and `true`, in the configured order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoolSet {
    pub false_first: bool,
}

impl ChoiceSet for BoolSet {
    fn len(&self) -> usize {
        2
    }

    fn get(&self, index: usize) -> Choice {
        Choice::Bool((index == 0) != self.false_first)
    }

    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Bools {
            false_first: self.false_first,
        }
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(*self)
    }
}

/// An explicit set of double values.
#[derive(Debug, Clone, PartialEq)]
pub struct DoubleSet(pub Vec<f64>);

impl ChoiceSet for DoubleSet {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize) -> Choice {
        Choice::Double(self.0[index])
    }

    fn store(&self) -> ChoiceSetStorage {
        ChoiceSetStorage::Doubles(self.0.clone())
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(self.clone())
    }
}

/// Materialized alternatives of a set without a dedicated storage form.
#[derive(Debug, Clone, PartialEq)]
struct ExplicitSet(Vec<Choice>);

impl ChoiceSet for ExplicitSet {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn get(&self, index: usize) -> Choice {
        self.0[index]
    }

    fn is_scheduling_point(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|c| matches!(c, Choice::Thread(_)))
    }

    fn clone_box(&self) -> Box<dyn ChoiceSet> {
        Box::new(self.clone())
    }
}

/// Serializable form of a [`ChoiceSet`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChoiceSetStorage {
    Threads(Vec<ThreadId>),
    Ints(Vec<i64>),
    Interval { min: i64, max: i64, delta: i64 },
    Bools { false_first: bool },
    Doubles(Vec<f64>),
    Explicit(Vec<Choice>),
}

impl ChoiceSetStorage {
    pub fn restore(&self) -> Box<dyn ChoiceSet> {
        match self {
            ChoiceSetStorage::Threads(t) => Box::new(ThreadSet(t.clone())),
            ChoiceSetStorage::Ints(v) => Box::new(IntSet(v.clone())),
            ChoiceSetStorage::Interval { min, max, delta } => {
                Box::new(IntInterval::from_stored(*min, *max, *delta))
            }
            ChoiceSetStorage::Bools { false_first } => Box::new(BoolSet {
                false_first: *false_first,
            }),
            ChoiceSetStorage::Doubles(v) => Box::new(DoubleSet(v.clone())),
            ChoiceSetStorage::Explicit(c) => Box::new(ExplicitSet(c.clone())),
        }
    }
}

// ── Randomization ──────────────────────────────────────────────────

/// Visitation order policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomizePolicy {
    /// Visit choices in set order.
    #[default]
    Sequential,
    /// Permute once at construction; every reset replays the same order.
    RandomizeOnce,
    /// Draw a fresh permutation from the generator's RNG stream on every reset.
    RandomEachRun,
}

/// Per-generator randomization state.
#[derive(Debug, Clone)]
pub struct Randomization {
    policy: RandomizePolicy,
    seed: u64,
    rng: ChaCha8Rng,
}

impl Randomization {
    pub fn new(policy: RandomizePolicy, seed: u64) -> Self {
        Self {
            policy,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn sequential() -> Self {
        Self::new(RandomizePolicy::Sequential, 0)
    }

    pub fn policy(&self) -> RandomizePolicy {
        self.policy
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Visitation order for a set of `len` choices; `None` is set order.
    ///
    /// Randomized orders are materialized, so they are limited to `u32`
    /// indices.
    fn permutation(&mut self, len: usize) -> Result<Option<Vec<u32>>, CoreError> {
        if self.policy == RandomizePolicy::Sequential {
            return Ok(None);
        }
        let len = u32::try_from(len).map_err(|_| CoreError::ChoiceSetTooLarge {
            len: len as u128,
            limit: u32::MAX as u128,
        })?;
        Ok(Some(self.shuffled(len)))
    }

    fn shuffled(&mut self, len: u32) -> Vec<u32> {
        let mut order: Vec<u32> = (0..len).collect();
        order.shuffle(&mut self.rng);
        order
    }

    fn store(&self) -> RandomizationStorage {
        let word_pos = self.rng.get_word_pos();
        RandomizationStorage {
            policy: self.policy,
            seed: self.seed,
            rng_key: self.rng.get_seed(),
            rng_stream: self.rng.get_stream(),
            rng_word_pos: [(word_pos >> 64) as u64, word_pos as u64],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RandomizationStorage {
    policy: RandomizePolicy,
    seed: u64,
    rng_key: [u8; 32],
    rng_stream: u64,
    rng_word_pos: [u64; 2],
}

impl RandomizationStorage {
    fn restore(&self) -> Randomization {
        let mut rng = ChaCha8Rng::from_seed(self.rng_key);
        rng.set_stream(self.rng_stream);
        rng.set_word_pos(((self.rng_word_pos[0] as u128) << 64) | self.rng_word_pos[1] as u128);
        Randomization {
            policy: self.policy,
            seed: self.seed,
            rng,
        }
    }
}

// ── Attributes ─────────────────────────────────────────────────────

/// Typed attachments for listener-style annotations, one value per type.
///
/// Attributes are shared between clones and are not part of the storage form.
#[derive(Clone, Default)]
pub struct Attributes {
    values: BTreeMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Attributes {
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> bool {
        self.values.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attributes({})", self.values.len())
    }
}

// ── Choice generator ───────────────────────────────────────────────

/// Enumerates the choices of one non-deterministic decision.
#[derive(Debug, Clone)]
pub struct ChoiceGenerator {
    id: String,
    /// Interpreter-side token for correlating later lookups without
    /// resolving `id` again.
    id_ref: i32,
    thread: Option<ThreadId>,
    insn: Option<InsnRef>,
    /// State in which the generator was installed.
    state_id: StateId,
    choices: Box<dyn ChoiceSet>,
    /// Visitation order as indices into `choices`; `None` is set order.
    order: Option<Vec<u32>>,
    processed: usize,
    done: bool,
    is_cascaded: bool,
    randomization: Randomization,
    attributes: Attributes,
}

impl ChoiceGenerator {
    /// Create a sequential generator over `choices`.
    pub fn new(id: impl Into<String>, choices: impl ChoiceSet + 'static) -> Self {
        Self::from_boxed(id.into(), Box::new(choices), Randomization::sequential())
    }

    /// Scheduling choice among `threads`.
    pub fn threads(id: impl Into<String>, threads: &[ThreadId]) -> Self {
        Self::new(id, ThreadSet(threads.to_vec()))
    }

    pub fn ints(id: impl Into<String>, values: &[i64]) -> Self {
        Self::new(id, IntSet(values.to_vec()))
    }

    pub fn interval(
        id: impl Into<String>,
        min: i64,
        max: i64,
        delta: i64,
    ) -> Result<Self, CoreError> {
        Ok(Self::new(id, IntInterval::new(min, max, delta)?))
    }

    pub fn booleans(id: impl Into<String>) -> Self {
        Self::new(id, BoolSet { false_first: true })
    }

    pub fn doubles(id: impl Into<String>, values: &[f64]) -> Self {
        Self::new(id, DoubleSet(values.to_vec()))
    }

    fn from_boxed(id: String, choices: Box<dyn ChoiceSet>, randomization: Randomization) -> Self {
        Self {
            id,
            id_ref: -1,
            thread: None,
            insn: None,
            state_id: UNKNOWN_STATE_ID,
            choices,
            order: None,
            processed: 0,
            done: false,
            is_cascaded: false,
            randomization,
            attributes: Attributes::default(),
        }
    }

    /// Apply a randomization policy. Resets the enumeration.
    pub fn with_randomization(mut self, randomization: Randomization) -> Result<Self, CoreError> {
        self.set_randomization(randomization)?;
        Ok(self)
    }

    /// Apply a randomization policy in place. Resets the enumeration.
    ///
    /// Fails with [`CoreError::ChoiceSetTooLarge`] if a randomized order
    /// cannot be built for the set; the generator is then left unchanged.
    pub fn set_randomization(&mut self, mut randomization: Randomization) -> Result<(), CoreError> {
        self.order = randomization.permutation(self.choices.len())?;
        self.randomization = randomization;
        self.processed = 0;
        self.done = false;
        Ok(())
    }

    /// Shorthand for [`with_randomization`](Self::with_randomization).
    pub fn randomized(self, policy: RandomizePolicy, seed: u64) -> Result<Self, CoreError> {
        self.with_randomization(Randomization::new(policy, seed))
    }

    fn choice_at(&self, pos: usize) -> Option<Choice> {
        let index = match &self.order {
            Some(order) => *order.get(pos)? as usize,
            None => pos,
        };
        (index < self.choices.len()).then(|| self.choices.get(index))
    }

    // --- choice state

    /// Move to the next choice.
    pub fn advance(&mut self) -> Result<(), CoreError> {
        if !self.has_more_choices() {
            return Err(CoreError::ChoiceGeneratorDone {
                id: self.id.clone(),
            });
        }
        self.processed += 1;
        if self.processed == self.total_choices() {
            self.done = true;
        }
        Ok(())
    }

    /// The current choice; `None` before the first [`advance`](Self::advance).
    pub fn next_choice(&self) -> Option<Choice> {
        let pos = self.processed.checked_sub(1)?;
        self.choice_at(pos)
    }

    /// The current choice converted to `T`, if it has that type.
    pub fn choice_as<T: TryFrom<Choice>>(&self) -> Option<T> {
        self.next_choice().and_then(|c| T::try_from(c).ok())
    }

    pub fn total_choices(&self) -> usize {
        self.choices.len()
    }

    pub fn processed_choices(&self) -> usize {
        self.processed
    }

    pub fn has_more_choices(&self) -> bool {
        !self.done && self.processed < self.total_choices()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Mark the generator exhausted without visiting the remaining choices.
    pub fn set_done(&mut self) {
        self.done = true;
    }

    /// Restart the enumeration.
    pub fn reset(&mut self) {
        self.processed = 0;
        self.done = false;
        if self.randomization.policy() == RandomizePolicy::RandomEachRun {
            if let Some(order) = &mut self.order {
                let len = order.len() as u32;
                *order = self.randomization.shuffled(len);
            }
        }
    }

    /// All choices in visitation order.
    pub fn all_choices(&self) -> Vec<Choice> {
        (0..self.total_choices())
            .filter_map(|pos| self.choice_at(pos))
            .collect()
    }

    pub fn is_scheduling_point(&self) -> bool {
        self.choices.is_scheduling_point()
    }

    pub fn randomization(&self) -> &Randomization {
        &self.randomization
    }

    // --- identity and creation context

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn id_ref(&self) -> i32 {
        self.id_ref
    }

    pub fn set_id_ref(&mut self, id_ref: i32) {
        self.id_ref = id_ref;
    }

    pub fn thread(&self) -> Option<ThreadId> {
        self.thread
    }

    pub fn set_thread(&mut self, thread: ThreadId) {
        self.thread = Some(thread);
    }

    pub fn insn(&self) -> Option<InsnRef> {
        self.insn
    }

    /// Record the creating thread and the instruction it was executing.
    pub fn set_context(&mut self, thread: ThreadId, insn: InsnRef) {
        self.thread = Some(thread);
        self.insn = Some(insn);
    }

    pub fn state_id(&self) -> StateId {
        self.state_id
    }

    /// Set the installation state of this generator only. Use
    /// [`CgStack::set_state_id`](crate::cascade::CgStack::set_state_id) to
    /// propagate along a cascade.
    pub fn set_state_id(&mut self, state_id: StateId) {
        self.state_id = state_id;
    }

    pub fn is_cascaded(&self) -> bool {
        self.is_cascaded
    }

    pub(crate) fn set_cascaded(&mut self, cascaded: bool) {
        self.is_cascaded = cascaded;
    }

    // --- attributes

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attr<T: Any + Send + Sync>(&mut self, value: T) {
        self.attributes.set(value);
    }

    pub fn attr<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.attributes.get::<T>()
    }

    pub fn remove_attr<T: Any + Send + Sync>(&mut self) -> bool {
        self.attributes.remove::<T>()
    }

    // --- storage

    /// Snapshot for transition records. Attributes are not stored.
    pub fn store(&self) -> CgStorage {
        CgStorage {
            id: self.id.clone(),
            id_ref: self.id_ref,
            thread: self.thread,
            insn: self.insn,
            state_id: self.state_id,
            choices: self.choices.store(),
            order: self.order.clone(),
            processed: self.processed,
            done: self.done,
            is_cascaded: self.is_cascaded,
            randomization: self.randomization.store(),
        }
    }
}

impl PartialEq for ChoiceGenerator {
    fn eq(&self, other: &Self) -> bool {
        self.store() == other.store()
    }
}

impl fmt::Display for ChoiceGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChoiceGenerator {{id:\"{}\", {}/{}, isCascaded:{}",
            self.id,
            self.processed,
            self.total_choices(),
            self.is_cascaded
        )?;
        if let Some(choice) = self.next_choice() {
            write!(f, ", choice:{}", choice)?;
        }
        if !self.attributes.is_empty() {
            write!(f, ", attrs:{}", self.attributes.len())?;
        }
        write!(f, "}}")
    }
}

/// Serializable snapshot of a [`ChoiceGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgStorage {
    id: String,
    id_ref: i32,
    thread: Option<ThreadId>,
    insn: Option<InsnRef>,
    state_id: StateId,
    choices: ChoiceSetStorage,
    order: Option<Vec<u32>>,
    processed: usize,
    done: bool,
    is_cascaded: bool,
    randomization: RandomizationStorage,
}

impl CgStorage {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn restore(&self) -> ChoiceGenerator {
        ChoiceGenerator {
            id: self.id.clone(),
            id_ref: self.id_ref,
            thread: self.thread,
            insn: self.insn,
            state_id: self.state_id,
            choices: self.choices.restore(),
            order: self.order.clone(),
            processed: self.processed,
            done: self.done,
            is_cascaded: self.is_cascaded,
            randomization: self.randomization.restore(),
            attributes: Attributes::default(),
        }
    }
}
