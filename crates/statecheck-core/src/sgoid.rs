//! Search-global object ids (SGOIDs).
//!
//! An SGOID is derived from the allocation context plus the number of
//! allocations made under that context so far, rather than from a heap
//! address.  Re-executing the same deterministic program prefix after a
//! backtrack therefore regenerates the same `(ctx, count)` pairs and gets the
//! same ids back, which is what makes heaps of different runs comparable.
//!
//! The registry has two halves with different lifetimes:
//!
//! | Field | Scope |
//! |---|---|
//! | `next`, `sgoids` | search-global, never rolled back |
//! | `alloc_counts` | state-managed, part of every kernel memento |

use crate::allocation::{Allocation, AllocationContext, StoredContext};
use crate::error::CoreError;
use crate::UNKNOWN_STATE_ID;
use im::OrdMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A search-global object id. `0` is the null reference.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Sgoid(pub u32);

impl Sgoid {
    pub const NULL: Sgoid = Sgoid(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Sgoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Maps allocations to stable ids.
#[derive(Debug, Clone, Default)]
pub struct SgoidRegistry {
    /// Last id handed out.
    next: u32,
    sgoids: BTreeMap<Allocation, u32>,
    alloc_counts: OrdMap<AllocationContext, u32>,
}

impl SgoidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the id of the next allocation under `ctx`.
    ///
    /// Reuses the id of an allocation seen before in another branch of the
    /// search; otherwise hands out a fresh one.
    pub fn assign_id(&mut self, ctx: &AllocationContext) -> Result<Sgoid, CoreError> {
        let count = self
            .alloc_counts
            .get(ctx)
            .copied()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or_else(|| CoreError::invariant(UNKNOWN_STATE_ID, "allocation count overflow"))?;

        let alloc = Allocation::new(ctx.clone(), count);
        let id = match self.sgoids.get(&alloc) {
            Some(&id) => id,
            None => {
                let id = self.next.checked_add(1).ok_or_else(|| {
                    CoreError::invariant(UNKNOWN_STATE_ID, "sgoid space exhausted")
                })?;
                self.next = id;
                self.sgoids.insert(alloc, id);
                id
            }
        };
        self.alloc_counts.insert(ctx.clone(), count);
        Ok(Sgoid(id))
    }

    /// The id assigned to `alloc`, if any.
    pub fn lookup(&self, alloc: &Allocation) -> Option<Sgoid> {
        self.sgoids.get(alloc).map(|&id| Sgoid(id))
    }

    /// The last id handed out (0 before the first allocation).
    pub fn next_id(&self) -> u32 {
        self.next
    }

    /// Number of distinct allocations known to the search.
    pub fn len(&self) -> usize {
        self.sgoids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sgoids.is_empty()
    }

    /// Allocations made under `ctx` along the current path.
    pub fn alloc_count(&self, ctx: &AllocationContext) -> u32 {
        self.alloc_counts.get(ctx).copied().unwrap_or(0)
    }

    /// All known allocations with their ids, in allocation order of the map.
    pub fn allocations(&self) -> impl Iterator<Item = (&Allocation, Sgoid)> {
        self.sgoids.iter().map(|(a, &id)| (a, Sgoid(id)))
    }

    /// Capture the state-managed part of the registry.
    pub fn memento(&self) -> AllocCountsMemento {
        AllocCountsMemento {
            counts: self.alloc_counts.clone(),
        }
    }

    /// Rewind the alloc counts. Ids and `next` are left untouched.
    pub fn restore(&mut self, memento: &AllocCountsMemento) {
        self.alloc_counts = memento.counts.clone();
    }
}

/// Snapshot of the alloc counts. Cloning is O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocCountsMemento {
    counts: OrdMap<AllocationContext, u32>,
}

impl AllocCountsMemento {
    pub fn get(&self, ctx: &AllocationContext) -> u32 {
        self.counts.get(ctx).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Storage form with every context compacted.
    pub fn compact(&self) -> StoredAllocCounts {
        StoredAllocCounts {
            entries: self
                .counts
                .iter()
                .map(|(ctx, &count)| (ctx.compact(), count))
                .collect(),
        }
    }
}

/// Serializable form of an [`AllocCountsMemento`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAllocCounts {
    entries: Vec<(StoredContext, u32)>,
}

impl StoredAllocCounts {
    pub fn restore(&self) -> AllocCountsMemento {
        AllocCountsMemento {
            counts: self
                .entries
                .iter()
                .map(|(stored, count)| (stored.restore(), *count))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationContextKind;
    use crate::{ClassId, InsnRef, ThreadId};

    fn ctx(class: u32, pc: u32) -> AllocationContext {
        AllocationContext::sut(
            AllocationContextKind::Hashed,
            ClassId(class),
            ThreadId(0),
            &[InsnRef::new(1, pc)],
        )
    }

    #[test]
    fn fresh_ids_are_dense_and_positive() {
        let mut reg = SgoidRegistry::new();
        assert_eq!(reg.assign_id(&ctx(1, 0)).unwrap(), Sgoid(1));
        assert_eq!(reg.assign_id(&ctx(2, 0)).unwrap(), Sgoid(2));
        assert_eq!(reg.assign_id(&ctx(1, 0)).unwrap(), Sgoid(3));
        assert_eq!(reg.next_id(), 3);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn alloc_count_increments_per_context() {
        let mut reg = SgoidRegistry::new();
        let a = ctx(1, 0);
        reg.assign_id(&a).unwrap();
        reg.assign_id(&a).unwrap();
        reg.assign_id(&ctx(2, 0)).unwrap();
        assert_eq!(reg.alloc_count(&a), 2);
        assert_eq!(reg.lookup(&Allocation::new(a.clone(), 2)), Some(Sgoid(2)));
        assert_eq!(reg.lookup(&Allocation::new(a, 3)), None);
    }

    #[test]
    fn restore_reissues_same_ids() {
        let mut reg = SgoidRegistry::new();
        let a = ctx(1, 0);
        assert_eq!(reg.assign_id(&a).unwrap(), Sgoid(1));
        let memento = reg.memento();

        assert_eq!(reg.assign_id(&a).unwrap(), Sgoid(2));
        assert_eq!(reg.assign_id(&ctx(9, 9)).unwrap(), Sgoid(3));

        reg.restore(&memento);
        assert_eq!(reg.alloc_count(&a), 1);
        assert_eq!(reg.next_id(), 3);

        // Same prefix, same ids.
        assert_eq!(reg.assign_id(&a).unwrap(), Sgoid(2));
        // A new branch allocating elsewhere gets a fresh id.
        assert_eq!(reg.assign_id(&ctx(5, 5)).unwrap(), Sgoid(4));
    }

    #[test]
    fn memento_is_not_affected_by_later_allocations() {
        let mut reg = SgoidRegistry::new();
        let a = ctx(1, 0);
        reg.assign_id(&a).unwrap();
        let memento = reg.memento();
        reg.assign_id(&a).unwrap();
        assert_eq!(memento.get(&a), 1);
        assert_eq!(reg.alloc_count(&a), 2);
    }

    #[test]
    fn memento_compact_round_trip() {
        let mut reg = SgoidRegistry::new();
        reg.assign_id(&ctx(1, 0)).unwrap();
        reg.assign_id(&ctx(1, 0)).unwrap();
        reg.assign_id(&ctx(3, 4)).unwrap();

        let memento = reg.memento();
        let json = serde_json::to_string(&memento.compact()).unwrap();
        let stored: StoredAllocCounts = serde_json::from_str(&json).unwrap();
        assert_eq!(stored.restore(), memento);
        assert_eq!(memento.len(), 2);
    }

    #[test]
    fn exhausted_id_space_leaves_counts_alone() {
        let mut reg = SgoidRegistry::new();
        let a = ctx(1, 0);
        assert_eq!(reg.assign_id(&a).unwrap(), Sgoid(1));
        let before = reg.memento();

        reg.next = u32::MAX;
        let err = reg.assign_id(&a).unwrap_err();
        assert!(matches!(err, CoreError::InvariantViolation { .. }));
        assert_eq!(reg.alloc_count(&a), 1);
        assert_eq!(reg.memento(), before);
        assert_eq!(reg.len(), 1);

        // Known allocations still resolve.
        reg.restore(&AllocCountsMemento::default());
        assert_eq!(reg.assign_id(&a).unwrap(), Sgoid(1));
    }

    #[test]
    fn null_sgoid() {
        assert!(Sgoid::NULL.is_null());
        assert!(!Sgoid(1).is_null());
        assert_eq!(Sgoid(5).to_string(), "@5");
    }
}
