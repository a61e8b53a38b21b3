//! Allocation contexts — logical identity of an allocation site.
//!
//! An [`AllocationContext`] fingerprints *where* an object is created (class,
//! creating thread, call-site anchor) instead of *what address* it lands on,
//! so equivalent heaps built by different runs of the same program prefix
//! compare equal.
//!
//! Two variants share one type:
//!
//! - **Hashed** folds the call stack into a 64-bit fingerprint with an
//!   iterated multiply-xor.  Cheap to compare, may collide in theory.
//! - **Precise** keeps the full stack signature.
//!
//! The variant is fixed by [`AllocationContextKind`] when the core is set up.

use crate::{ClassId, InsnRef, ThreadId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MIX_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const MIX_PRIME: u64 = 0x0000_0100_0000_01b3;

// Domain tags keep SUT and system contexts apart even on equal inputs.
const SUT_TAG: u64 = 0x5355_54;
const SYSTEM_TAG: u64 = 0x5359_53;

/// Which allocation context variant the core builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationContextKind {
    #[default]
    Hashed,
    Precise,
}

/// The call-site anchor of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Anchor {
    /// Program counter of the allocating frame (system-under-test allocations).
    Pc(u32),
    /// Caller supplied site id (allocations made by the runtime glue).
    Tag(i32),
}

/// Fingerprint of an allocation site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocationContext {
    Hashed {
        class: ClassId,
        thread: ThreadId,
        anchor: Anchor,
        fingerprint: u64,
    },
    Precise {
        class: ClassId,
        thread: ThreadId,
        anchor: Anchor,
        stack: Arc<[InsnRef]>,
    },
}

impl AllocationContext {
    /// Context of an allocation made by the program under test.
    ///
    /// `stack` holds the allocating thread's frames, top first.  The top
    /// frame is the one executing the allocating instruction.
    pub fn sut(
        kind: AllocationContextKind,
        class: ClassId,
        thread: ThreadId,
        stack: &[InsnRef],
    ) -> Self {
        let anchor = Anchor::Pc(stack.first().map(|f| f.pc).unwrap_or(0));
        match kind {
            AllocationContextKind::Hashed => {
                let mut h = mix(mix(mix(MIX_SEED, SUT_TAG), class.0 as u64), thread.0 as u64);
                for frame in stack {
                    h = mix(h, frame.method as u64);
                    h = mix(h, frame.pc as u64);
                }
                AllocationContext::Hashed {
                    class,
                    thread,
                    anchor,
                    fingerprint: h,
                }
            }
            AllocationContextKind::Precise => AllocationContext::Precise {
                class,
                thread,
                anchor,
                stack: Arc::from(stack),
            },
        }
    }

    /// Context of an allocation made on behalf of the runtime, anchored by
    /// an explicit site id.
    pub fn system(
        kind: AllocationContextKind,
        class: ClassId,
        thread: ThreadId,
        anchor: i32,
    ) -> Self {
        let tag = Anchor::Tag(anchor);
        match kind {
            AllocationContextKind::Hashed => {
                let h = mix(mix(mix(MIX_SEED, SYSTEM_TAG), class.0 as u64), thread.0 as u64);
                AllocationContext::Hashed {
                    class,
                    thread,
                    anchor: tag,
                    fingerprint: mix(h, anchor as u32 as u64),
                }
            }
            AllocationContextKind::Precise => AllocationContext::Precise {
                class,
                thread,
                anchor: tag,
                stack: Arc::from(Vec::new()),
            },
        }
    }

    pub fn kind(&self) -> AllocationContextKind {
        match self {
            AllocationContext::Hashed { .. } => AllocationContextKind::Hashed,
            AllocationContext::Precise { .. } => AllocationContextKind::Precise,
        }
    }

    pub fn class(&self) -> ClassId {
        match self {
            AllocationContext::Hashed { class, .. } | AllocationContext::Precise { class, .. } => {
                *class
            }
        }
    }

    pub fn thread(&self) -> ThreadId {
        match self {
            AllocationContext::Hashed { thread, .. }
            | AllocationContext::Precise { thread, .. } => *thread,
        }
    }

    pub fn anchor(&self) -> Anchor {
        match self {
            AllocationContext::Hashed { anchor, .. }
            | AllocationContext::Precise { anchor, .. } => *anchor,
        }
    }

    /// Storage form, suitable for mementos and serialization.
    pub fn compact(&self) -> StoredContext {
        match self {
            AllocationContext::Hashed {
                class,
                thread,
                anchor,
                fingerprint,
            } => StoredContext::Hashed {
                class: *class,
                thread: *thread,
                anchor: *anchor,
                fingerprint: *fingerprint,
            },
            AllocationContext::Precise {
                class,
                thread,
                anchor,
                stack,
            } => StoredContext::Precise {
                class: *class,
                thread: *thread,
                anchor: *anchor,
                stack: stack.to_vec(),
            },
        }
    }
}

/// Serializable form of an [`AllocationContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredContext {
    Hashed {
        class: ClassId,
        thread: ThreadId,
        anchor: Anchor,
        fingerprint: u64,
    },
    Precise {
        class: ClassId,
        thread: ThreadId,
        anchor: Anchor,
        stack: Vec<InsnRef>,
    },
}

impl StoredContext {
    /// Rebuild the live context.
    pub fn restore(&self) -> AllocationContext {
        match self {
            StoredContext::Hashed {
                class,
                thread,
                anchor,
                fingerprint,
            } => AllocationContext::Hashed {
                class: *class,
                thread: *thread,
                anchor: *anchor,
                fingerprint: *fingerprint,
            },
            StoredContext::Precise {
                class,
                thread,
                anchor,
                stack,
            } => AllocationContext::Precise {
                class: *class,
                thread: *thread,
                anchor: *anchor,
                stack: Arc::from(stack.as_slice()),
            },
        }
    }
}

/// A logical allocation: the `count`-th object created under `ctx`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Allocation {
    pub ctx: AllocationContext,
    pub count: u32,
}

impl Allocation {
    pub fn new(ctx: AllocationContext, count: u32) -> Self {
        Self { ctx, count }
    }
}

#[inline]
fn mix(h: u64, v: u64) -> u64 {
    (h ^ v).wrapping_mul(MIX_PRIME)
}
