//! Canonicalizing table between composed state ids and state tuples.

use rustc_hash::FxHashMap;

use crate::filter::FilterState;
use crate::{StateId, NO_STATE_ID};

/// Bijection between dense composed state ids and
/// `(state1, state2, filter state)` tuples. Append-only for the lifetime
/// of a composition.
pub struct ComposeStateTable<FS: FilterState> {
    tuples: Vec<(StateId, StateId, FS)>,
    ids: FxHashMap<(StateId, StateId, FS), StateId>,
    error: bool,
}

impl<FS: FilterState> ComposeStateTable<FS> {
    pub fn new() -> Self {
        ComposeStateTable {
            tuples: Vec::new(),
            ids: FxHashMap::default(),
            error: false,
        }
    }

    /// The id for the tuple, interning it if new. On overflow the error
    /// flag latches and `NO_STATE_ID` is returned.
    pub fn find_state(&mut self, s1: StateId, s2: StateId, fs: &FS) -> StateId {
        let key = (s1, s2, fs.clone());
        if let Some(&id) = self.ids.get(&key) {
            return id;
        }
        if self.tuples.len() >= StateId::MAX as usize {
            self.error = true;
            return NO_STATE_ID;
        }
        let id = self.tuples.len() as StateId;
        self.tuples.push(key.clone());
        self.ids.insert(key, id);
        id
    }

    /// The tuple for a previously returned id. Must not be called with
    /// other ids.
    pub fn tuple(&self, s: StateId) -> &(StateId, StateId, FS) {
        &self.tuples[s as usize]
    }

    pub fn size(&self) -> usize {
        self.tuples.len()
    }

    pub fn error(&self) -> bool {
        self.error
    }
}

impl<FS: FilterState> Default for ComposeStateTable<FS> {
    fn default() -> Self {
        ComposeStateTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::IntFilterState;

    #[test]
    fn intern_and_lookup_test() {
        let mut table = ComposeStateTable::new();
        let fs0 = IntFilterState::new(0);
        let fs1 = IntFilterState::new(1);
        let a = table.find_state(0, 0, &fs0);
        let b = table.find_state(0, 1, &fs0);
        let c = table.find_state(0, 0, &fs1);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(c, 2);
        assert_eq!(table.find_state(0, 0, &fs0), a);
        assert_eq!(table.find_state(0, 1, &fs0), b);
        assert_eq!(table.size(), 3);
        assert_eq!(*table.tuple(1), (0, 1, fs0));
        assert!(!table.error());
    }
}
