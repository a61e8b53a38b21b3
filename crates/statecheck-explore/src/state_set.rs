//! Fingerprint → state id map.

use statecheck_core::StateId;
use std::collections::BTreeMap;

/// States visited by the search, numbered densely in discovery order.
#[derive(Debug, Clone, Default)]
pub struct StateSet {
    ids: BTreeMap<u64, StateId>,
}

impl StateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the state with `fingerprint`, and whether it was seen for the
    /// first time.
    pub fn add(&mut self, fingerprint: u64) -> (StateId, bool) {
        let next = self.ids.len() as StateId;
        match self.ids.get(&fingerprint) {
            Some(&id) => (id, false),
            None => {
                self.ids.insert(fingerprint, next);
                (next, true)
            }
        }
    }

    pub fn get(&self, fingerprint: u64) -> Option<StateId> {
        self.ids.get(&fingerprint).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_ids_in_discovery_order() {
        let mut set = StateSet::new();
        assert_eq!(set.add(900), (0, true));
        assert_eq!(set.add(5), (1, true));
        assert_eq!(set.add(900), (0, false));
        assert_eq!(set.add(77), (2, true));
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(5), Some(1));
        assert_eq!(set.get(6), None);
    }
}
