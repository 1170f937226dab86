//! Indexed lookup into the arcs leaving a single state.
//!
//! A matcher positions itself on a state, then answers `find(label)`
//! queries against one side of the arcs there. Two labels get special
//! treatment: `find(EPSILON_LABEL)` reports an implicit self-loop with
//! weight one before any real epsilon arcs, and `find(NO_LABEL)` reports
//! only the real epsilon arcs. Composition leans on exactly this protocol
//! to advance one machine while the other stays put.

use crate::properties::{
    I_LABEL_SORTED, NOT_I_LABEL_SORTED, NOT_O_LABEL_SORTED, O_LABEL_SORTED,
};
use crate::{Arc, Fst, Label, Semiring, StateId, EPSILON_LABEL, NO_LABEL, NO_STATE_ID};

/// Which arc side a matcher indexes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchType {
    MatchInput,
    MatchOutput,
    MatchBoth,
    MatchNone,
    MatchUnknown,
}

/// Matcher capability flag: the matcher cannot serve as the iterated side
/// and must be the one that is matched against.
pub const REQUIRE_MATCH: u32 = 0x1;

/// Priority value demanding to be the matched side at a state.
pub const REQUIRE_PRIORITY: isize = -1;

/// Trait for arc matchers.
///
/// Matchers borrow the machine they index, so clones are independent
/// cursors over shared immutable data and are always safe to use
/// concurrently with the original.
pub trait Matcher<'f, W: Semiring>: Clone {
    type F: Fst<W> + 'f;

    fn fst(&self) -> &'f Self::F;

    /// The side this matcher indexes. With `test` unset only cheaply known
    /// information is used and the answer may be `MatchUnknown`; with it
    /// set the underlying machine may be probed.
    fn match_type(&self, test: bool) -> MatchType;

    fn flags(&self) -> u32 {
        0
    }

    fn set_state(&mut self, s: StateId);

    /// Positions the cursor on the first match for `label`; returns false
    /// if there is none.
    fn find(&mut self, label: Label) -> bool;

    fn done(&self) -> bool;

    fn value(&self) -> Arc<W>;

    fn next(&mut self);

    /// Cost hint for choosing the iterated side, or `REQUIRE_PRIORITY`.
    fn priority(&self, s: StateId) -> isize {
        self.fst().num_arcs(s) as isize
    }

    /// Finality proxy; matchers over augmented topologies may override.
    fn final_weight(&self, s: StateId) -> W {
        self.fst().final_weight(s)
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops
    }
}

/// Matcher over machines whose arcs are sorted on the chosen side;
/// lookup is a binary search.
pub struct SortedMatcher<'f, W: Semiring, F> {
    fst: &'f F,
    match_type: MatchType,
    state: StateId,
    arcs: Vec<Arc<W>>,
    pos: usize,
    match_label: Label,
    current_loop: bool,
    loop_arc: Arc<W>,
}

impl<'f, W: Semiring, F: Fst<W>> SortedMatcher<'f, W, F> {
    pub fn new(fst: &'f F, match_type: MatchType) -> Self {
        debug_assert!(matches!(
            match_type,
            MatchType::MatchInput | MatchType::MatchOutput
        ));
        let loop_arc = match match_type {
            MatchType::MatchInput => Arc::new(NO_LABEL, EPSILON_LABEL, W::one(), NO_STATE_ID),
            _ => Arc::new(EPSILON_LABEL, NO_LABEL, W::one(), NO_STATE_ID),
        };
        SortedMatcher {
            fst,
            match_type,
            state: NO_STATE_ID,
            arcs: Vec::new(),
            pos: 0,
            match_label: NO_LABEL,
            current_loop: false,
            loop_arc,
        }
    }

    fn side(&self, arc: &Arc<W>) -> Label {
        if self.match_type == MatchType::MatchInput {
            arc.ilabel
        } else {
            arc.olabel
        }
    }
}

impl<'f, W: Semiring, F: Fst<W>> Clone for SortedMatcher<'f, W, F> {
    fn clone(&self) -> Self {
        SortedMatcher {
            fst: self.fst,
            match_type: self.match_type,
            state: self.state,
            arcs: self.arcs.clone(),
            pos: self.pos,
            match_label: self.match_label,
            current_loop: self.current_loop,
            loop_arc: self.loop_arc.clone(),
        }
    }
}

impl<'f, W: Semiring, F: Fst<W> + 'f> Matcher<'f, W> for SortedMatcher<'f, W, F> {
    type F = F;

    fn fst(&self) -> &'f F {
        self.fst
    }

    fn match_type(&self, test: bool) -> MatchType {
        let (true_prop, false_prop) = match self.match_type {
            MatchType::MatchInput => (I_LABEL_SORTED, NOT_I_LABEL_SORTED),
            MatchType::MatchOutput => (O_LABEL_SORTED, NOT_O_LABEL_SORTED),
            other => return other,
        };
        let props = self.fst.properties(true_prop | false_prop, test);
        if props & true_prop != 0 {
            self.match_type
        } else if props & false_prop != 0 {
            MatchType::MatchNone
        } else {
            MatchType::MatchUnknown
        }
    }

    fn set_state(&mut self, s: StateId) {
        if self.state == s {
            return;
        }
        self.state = s;
        self.arcs = self.fst.arcs(s).collect();
        self.pos = 0;
        self.match_label = NO_LABEL;
        self.current_loop = false;
        self.loop_arc.nextstate = s;
    }

    fn find(&mut self, label: Label) -> bool {
        self.current_loop = label == EPSILON_LABEL;
        self.match_label = if label == NO_LABEL {
            EPSILON_LABEL
        } else {
            label
        };
        let target = self.match_label;
        self.pos = self
            .arcs
            .partition_point(|a| match self.match_type {
                MatchType::MatchInput => a.ilabel < target,
                _ => a.olabel < target,
            });
        self.current_loop
            || (self.pos < self.arcs.len() && self.side(&self.arcs[self.pos]) == target)
    }

    fn done(&self) -> bool {
        if self.current_loop {
            return false;
        }
        self.pos >= self.arcs.len() || self.side(&self.arcs[self.pos]) != self.match_label
    }

    fn value(&self) -> Arc<W> {
        if self.current_loop {
            self.loop_arc.clone()
        } else {
            self.arcs[self.pos].clone()
        }
    }

    fn next(&mut self) {
        if self.current_loop {
            self.current_loop = false;
        } else {
            self.pos += 1;
        }
    }
}

/// Trait for machines that can hand out a matcher over themselves.
/// `None` asks the caller to fall back to the default matcher.
pub trait MatchableFst<W: Semiring>: Fst<W> {
    type M<'f>: Matcher<'f, W>
    where
        Self: 'f;

    fn init_matcher(&self, match_type: MatchType) -> Option<Self::M<'_>>;
}

impl<W: Semiring> MatchableFst<W> for crate::vector::VectorFst<W> {
    type M<'f> = SortedMatcher<'f, W, crate::vector::VectorFst<W>>
    where
        Self: 'f;

    fn init_matcher(&self, match_type: MatchType) -> Option<Self::M<'_>> {
        match match_type {
            MatchType::MatchInput | MatchType::MatchOutput => {
                Some(SortedMatcher::new(self, match_type))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
use crate::vector::VectorFst;
#[cfg(test)]
use crate::LoadTsv;

#[test]
fn sorted_matcher_find_test() {
    let fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t1\t5\ttrue
0\t2\t2\t6\ttrue
0\t3\t2\t7\ttrue
0\t4\t4\t8\ttrue
1\ttrue
2\ttrue
3\ttrue
4\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();

    let mut m = SortedMatcher::new(&fst, MatchType::MatchInput);
    m.set_state(0);
    assert!(m.find(2));
    let mut found = Vec::new();
    while !m.done() {
        found.push(m.value().nextstate);
        m.next();
    }
    assert_eq!(found, vec![2, 3]);
    assert!(!m.find(3));
}

#[test]
fn sorted_matcher_epsilon_test() {
    let fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t0\t1\ttrue
0\t2\t2\t2\ttrue
1\ttrue
2\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();

    let mut m = SortedMatcher::new(&fst, MatchType::MatchInput);
    m.set_state(0);

    // The epsilon label yields the implicit loop first, then real epsilon
    // arcs.
    assert!(m.find(EPSILON_LABEL));
    let arc = m.value();
    assert_eq!(arc.ilabel, NO_LABEL);
    assert_eq!(arc.nextstate, 0);
    m.next();
    assert!(!m.done());
    assert_eq!(m.value().nextstate, 1);
    m.next();
    assert!(m.done());

    // The no-label query yields only the real epsilon arcs.
    assert!(m.find(NO_LABEL));
    assert_eq!(m.value().nextstate, 1);
    m.next();
    assert!(m.done());
}

#[test]
fn sorted_matcher_type_probe_test() {
    let sorted = VectorFst::<bool>::load_tsv(
        "
0\t1\t1\t2\ttrue
0\t1\t2\t1\ttrue
1\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();
    let m = SortedMatcher::new(&sorted, MatchType::MatchInput);
    assert_eq!(m.match_type(false), MatchType::MatchUnknown);
    assert_eq!(m.match_type(true), MatchType::MatchInput);

    let m = SortedMatcher::new(&sorted, MatchType::MatchOutput);
    assert_eq!(m.match_type(true), MatchType::MatchNone);
}

#[test]
fn safe_copy_has_independent_cursor_test() {
    let fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t1\t1\ttrue
0\t2\t1\t1\ttrue
1\ttrue
2\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();
    let mut m = SortedMatcher::new(&fst, MatchType::MatchInput);
    m.set_state(0);
    assert!(m.find(1));
    let mut copy = m.clone();
    m.next();
    assert_eq!(copy.value().nextstate, 1);
    assert_eq!(m.value().nextstate, 2);
    copy.next();
    copy.next();
    assert!(copy.done());
    assert!(!m.done());
}
