//! Property-based tests for the exploration core.
//!
//! Programs are modelled as sequences of allocation sites; choice generators
//! and transitions are built from random shapes.

use proptest::prelude::*;
use statecheck_core::{
    AllocationContext, AllocationContextKind, Backtracker, CgStack, Choice, ChoiceGenerator,
    ClassId, InsnRef, KernelState, Path, RandomizePolicy, Sgoid, SgoidRegistry, StackBacktracker,
    Step, SystemMemento, SystemState, ThreadId, Transition,
};

// ============================================================================
// Helpers
// ============================================================================

/// An allocation site: (class, thread, pc).
type Site = (u32, u32, u32);

fn site_strategy() -> impl Strategy<Value = Site> {
    (0u32..4, 0u32..3, 0u32..5)
}

fn kind_strategy() -> impl Strategy<Value = AllocationContextKind> {
    prop_oneof![
        Just(AllocationContextKind::Hashed),
        Just(AllocationContextKind::Precise)
    ]
}

fn ctx(kind: AllocationContextKind, (class, thread, pc): Site) -> AllocationContext {
    AllocationContext::sut(
        kind,
        ClassId(class),
        ThreadId(thread),
        &[InsnRef::new(1, pc), InsnRef::new(0, 0)],
    )
}

fn run(reg: &mut SgoidRegistry, kind: AllocationContextKind, program: &[Site]) -> Vec<Sgoid> {
    program
        .iter()
        .map(|&site| reg.assign_id(&ctx(kind, site)).unwrap())
        .collect()
}

fn policy_strategy() -> impl Strategy<Value = RandomizePolicy> {
    prop_oneof![
        Just(RandomizePolicy::Sequential),
        Just(RandomizePolicy::RandomizeOnce),
        Just(RandomizePolicy::RandomEachRun)
    ]
}

// ============================================================================
// SGOID registry
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_sgoids_positive_bounded_unique(
        kind in kind_strategy(),
        program in prop::collection::vec(site_strategy(), 0..40),
    ) {
        let mut reg = SgoidRegistry::new();
        run(&mut reg, kind, &program);

        let mut seen = std::collections::BTreeSet::new();
        for (_, id) in reg.allocations() {
            prop_assert!(id.0 > 0);
            prop_assert!(id.0 <= reg.next_id());
            prop_assert!(seen.insert(id));
        }
        prop_assert_eq!(reg.len() as u32, reg.next_id());
    }

    #[test]
    fn prop_replayed_prefix_gets_same_ids(
        kind in kind_strategy(),
        prefix in prop::collection::vec(site_strategy(), 0..20),
        branch_a in prop::collection::vec(site_strategy(), 0..20),
        branch_b in prop::collection::vec(site_strategy(), 0..20),
    ) {
        let mut reg = SgoidRegistry::new();
        let root = reg.memento();

        let first = run(&mut reg, kind, &prefix);
        run(&mut reg, kind, &branch_a);

        reg.restore(&root);
        let second = run(&mut reg, kind, &prefix);
        prop_assert_eq!(&first, &second);

        // A different continuation does not disturb the prefix either.
        run(&mut reg, kind, &branch_b);
        reg.restore(&root);
        prop_assert_eq!(run(&mut reg, kind, &prefix), first);
    }

    #[test]
    fn prop_backtrack_restores_alloc_counts_only(
        before in prop::collection::vec(site_strategy(), 0..15),
        after in prop::collection::vec(site_strategy(), 1..15),
    ) {
        let config = statecheck_core::CoreConfig::default();
        let mut sys = SystemState::new(&config);
        let mut bt: StackBacktracker<SystemMemento> = StackBacktracker::new();
        let frames = |pc| [InsnRef::new(1, pc)];

        for &(class, thread, pc) in &before {
            sys.allocate(ClassId(class), ThreadId(thread), &frames(pc)).unwrap();
        }
        let captured = sys.memento();
        bt.push_kernel_state(&sys);

        for &(class, thread, pc) in &after {
            sys.allocate(ClassId(class), ThreadId(thread), &frames(pc)).unwrap();
        }
        let next = sys.registry().next_id();
        let known = sys.registry().len();

        prop_assert!(bt.backtrack(&mut sys));
        let restored = sys.memento();
        prop_assert_eq!(restored.alloc_counts(), captured.alloc_counts());
        prop_assert_eq!(sys.registry().next_id(), next);
        prop_assert_eq!(sys.registry().len(), known);
    }
}

// ============================================================================
// Choice generators and cascades
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_randomization_preserves_choice_set(
        values in prop::collection::vec(-50i64..50, 0..12),
        policy in policy_strategy(),
        seed in any::<u64>(),
        resets in 1usize..4,
    ) {
        let mut cg = ChoiceGenerator::ints("data", &values).randomized(policy, seed).unwrap();
        let mut expected = values.clone();
        expected.sort();

        for _ in 0..resets {
            let mut seen = Vec::new();
            while cg.has_more_choices() {
                cg.advance().unwrap();
                seen.push(cg.choice_as::<i64>().unwrap());
            }
            prop_assert!(cg.processed_choices() <= cg.total_choices());
            seen.sort();
            prop_assert_eq!(&seen, &expected);
            cg.reset();
        }
    }

    #[test]
    fn prop_stored_cg_continues_identically(
        len in 1i64..15,
        policy in policy_strategy(),
        seed in any::<u64>(),
        consumed in 0usize..15,
    ) {
        let mut cg = ChoiceGenerator::interval("data", 0, len - 1, 1)
            .and_then(|cg| cg.randomized(policy, seed))
            .unwrap();
        for _ in 0..consumed.min(len as usize) {
            cg.advance().unwrap();
        }
        let mut restored = cg.store().restore();

        let mut rest_a = Vec::new();
        let mut rest_b = Vec::new();
        while cg.has_more_choices() {
            cg.advance().unwrap();
            restored.advance().unwrap();
            rest_a.push(cg.next_choice());
            rest_b.push(restored.next_choice());
        }
        prop_assert!(!restored.has_more_choices());
        prop_assert_eq!(rest_a, rest_b);
    }

    #[test]
    fn prop_cascade_enumerates_full_product(
        sizes in prop::collection::vec(1usize..4, 1..4),
    ) {
        let mut stack = CgStack::new();
        for (i, &n) in sizes.iter().enumerate() {
            let values: Vec<i64> = (0..n as i64).collect();
            stack.push(ChoiceGenerator::ints(format!("cg{}", i), &values), i > 0);
        }

        let cascade = stack.cascade();
        prop_assert_eq!(cascade.len(), sizes.len());
        prop_assert!(!cascade[0].is_cascaded());
        prop_assert!(cascade[1..].iter().all(ChoiceGenerator::is_cascaded));

        let mut combos: Vec<Vec<Choice>> = Vec::new();
        while stack.advance_top().unwrap() {
            combos.push(stack.cascade().iter().filter_map(|cg| cg.next_choice()).collect());
        }
        prop_assert_eq!(combos.len(), sizes.iter().product::<usize>());

        // Leaf-fastest lexicographic order is strictly increasing.
        let keys: Vec<Vec<i64>> = combos
            .iter()
            .map(|c| c.iter().map(|x| i64::try_from(*x).unwrap()).collect())
            .collect();
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }
}

// ============================================================================
// Transitions and paths
// ============================================================================

fn transition(thread: u32, pcs: &[u32]) -> Transition {
    let mut cg = ChoiceGenerator::threads("sched", &[ThreadId(thread)]);
    cg.advance().unwrap();
    let mut t = Transition::new(vec![cg], ThreadId(thread));
    for &pc in pcs {
        t.add_step(Step::new(ThreadId(thread), InsnRef::new(2, pc)));
    }
    t
}

proptest! {
    #[test]
    fn prop_iteration_visits_step_count_steps(pcs in prop::collection::vec(0u32..100, 0..30)) {
        let t = transition(0, &pcs);
        let visited: Vec<u32> = t.iter().map(|s| s.insn.pc).collect();
        prop_assert_eq!(visited.len(), t.step_count());
        prop_assert_eq!(visited, pcs);
    }

    #[test]
    fn prop_path_store_restore_is_structural(
        shape in prop::collection::vec((0u32..3, prop::collection::vec(0u32..50, 0..5)), 0..12),
    ) {
        let mut path = Path::new("prop");
        for (i, (thread, pcs)) in shape.iter().enumerate() {
            let mut t = transition(*thread, pcs);
            t.set_state_id(i as i32);
            path.push(t);
        }

        let json = serde_json::to_string(&path.store()).unwrap();
        let stored: statecheck_core::PathStorage = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(stored.restore(), path);
    }
}
