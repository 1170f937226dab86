//! Per-state memo backing lazy machines.
//!
//! A lazy machine computes a state's arcs once, pushes them here, and marks
//! the state expanded; later requests are served from the stored vector.
//! Serving an unexpanded state is a programming error and panics.

use std::rc::Rc;

use crate::{Arc, Semiring, StateId};

/// Caching policy for a lazy machine.
///
/// With `gc` set and `gc_limit` zero only the most recently expanded
/// state's arcs are retained; earlier states may be expanded again on a
/// later visit. This trades recomputation for memory and suits a single
/// sequential sweep over the states.
#[derive(Clone, Copy, Debug)]
pub struct CacheOptions {
    pub gc: bool,
    pub gc_limit: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            gc: false,
            gc_limit: 0,
        }
    }
}

#[derive(Clone, Debug)]
struct CacheState<W> {
    arcs: Rc<Vec<Arc<W>>>,
    final_weight: Option<W>,
    expanded: bool,
}

impl<W> CacheState<W> {
    fn new() -> Self {
        CacheState {
            arcs: Rc::new(Vec::new()),
            final_weight: None,
            expanded: false,
        }
    }
}

/// The memo itself: computed start, per-state finality and arcs.
#[derive(Debug)]
pub struct CacheImpl<W: Semiring> {
    opts: CacheOptions,
    start: Option<StateId>,
    states: Vec<CacheState<W>>,
    last_expanded: StateId,
    expansions: usize,
}

impl<W: Semiring> CacheImpl<W> {
    pub fn new(opts: CacheOptions) -> Self {
        CacheImpl {
            opts,
            start: None,
            states: Vec::new(),
            last_expanded: crate::NO_STATE_ID,
            expansions: 0,
        }
    }

    fn ensure_state(&mut self, s: StateId) {
        while self.states.len() <= s as usize {
            self.states.push(CacheState::new());
        }
    }

    pub fn has_start(&self) -> bool {
        self.start.is_some()
    }

    pub fn set_start(&mut self, s: StateId) {
        self.start = Some(s);
    }

    pub fn start(&self) -> StateId {
        self.start.expect("cache: start not computed")
    }

    pub fn has_final(&self, s: StateId) -> bool {
        (s as usize) < self.states.len() && self.states[s as usize].final_weight.is_some()
    }

    pub fn set_final(&mut self, s: StateId, weight: W) {
        self.ensure_state(s);
        self.states[s as usize].final_weight = Some(weight);
    }

    pub fn final_weight(&self, s: StateId) -> W {
        self.states[s as usize]
            .final_weight
            .clone()
            .expect("cache: final weight not computed")
    }

    pub fn has_arcs(&self, s: StateId) -> bool {
        (s as usize) < self.states.len() && self.states[s as usize].expanded
    }

    /// Appends an arc to the expansion in progress for `s`.
    pub fn push_arc(&mut self, s: StateId, arc: Arc<W>) {
        self.ensure_state(s);
        Rc::make_mut(&mut self.states[s as usize].arcs).push(arc);
    }

    /// Marks `s` expanded. Under the keep-most-recent policy the previously
    /// retained state is evicted and may be expanded again later.
    pub fn set_arcs(&mut self, s: StateId) {
        self.ensure_state(s);
        self.states[s as usize].expanded = true;
        self.expansions += 1;
        if self.opts.gc && self.opts.gc_limit == 0 {
            let last = self.last_expanded;
            if last != crate::NO_STATE_ID && last != s {
                let state = &mut self.states[last as usize];
                state.expanded = false;
                state.arcs = Rc::new(Vec::new());
            }
            self.last_expanded = s;
        }
    }

    pub fn num_arcs(&self, s: StateId) -> usize {
        assert!(self.has_arcs(s), "cache: state {} not expanded", s);
        self.states[s as usize].arcs.len()
    }

    pub fn arc_iter(&self, s: StateId) -> CacheArcIterator<W> {
        assert!(self.has_arcs(s), "cache: state {} not expanded", s);
        CacheArcIterator {
            arcs: Rc::clone(&self.states[s as usize].arcs),
            pos: 0,
        }
    }

    /// How many expansions have run; with garbage collection off this is
    /// also the number of distinct states ever expanded.
    pub fn expansions(&self) -> usize {
        self.expansions
    }
}

/// Iterator over a cached state's arcs, holding the shared vector alive.
pub struct CacheArcIterator<W> {
    arcs: Rc<Vec<Arc<W>>>,
    pos: usize,
}

impl<W: Clone> Iterator for CacheArcIterator<W> {
    type Item = Arc<W>;

    fn next(&mut self) -> Option<Arc<W>> {
        let arc = self.arcs.get(self.pos).cloned();
        if arc.is_some() {
            self.pos += 1;
        }
        arc
    }
}

#[test]
fn cache_expand_once_test() {
    let mut cache = CacheImpl::<bool>::new(CacheOptions::default());
    assert!(!cache.has_arcs(0));
    cache.push_arc(0, crate::Arc::new(1, 1, true, 1));
    cache.push_arc(0, crate::Arc::new(2, 2, true, 2));
    cache.set_arcs(0);
    assert!(cache.has_arcs(0));
    assert_eq!(cache.num_arcs(0), 2);
    let labels: Vec<_> = cache.arc_iter(0).map(|a| a.ilabel).collect();
    assert_eq!(labels, vec![1, 2]);
    assert_eq!(cache.expansions(), 1);
}

#[test]
fn cache_gc_keeps_most_recent_test() {
    let mut cache = CacheImpl::<bool>::new(CacheOptions {
        gc: true,
        gc_limit: 0,
    });
    cache.push_arc(0, crate::Arc::new(1, 1, true, 1));
    cache.set_arcs(0);
    cache.push_arc(1, crate::Arc::new(2, 2, true, 0));
    cache.set_arcs(1);
    assert!(!cache.has_arcs(0));
    assert!(cache.has_arcs(1));
}

#[test]
fn cache_start_and_final_test() {
    let mut cache = CacheImpl::<bool>::new(CacheOptions::default());
    assert!(!cache.has_start());
    cache.set_start(3);
    assert_eq!(cache.start(), 3);
    assert!(!cache.has_final(3));
    cache.set_final(3, true);
    assert!(cache.has_final(3));
    assert!(cache.final_weight(3));
}

#[test]
#[should_panic]
fn cache_unexpanded_panics_test() {
    let cache = CacheImpl::<bool>::new(CacheOptions::default());
    let _ = cache.num_arcs(5);
}
