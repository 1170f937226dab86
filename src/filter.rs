//! Composition filters: small state machines that rule on candidate arc
//! pairs during composition.
//!
//! When both inputs carry epsilons on the matched boundary, the bare
//! product admits the same epsilon moves in several interleavings and the
//! result carries redundant paths. A filter sees each candidate pair,
//! either rejects it or assigns the filter state the target composed state
//! will carry, and thereby admits exactly one canonical interleaving.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::matcher::Matcher;
use crate::properties::{I_LABEL_INVARIANT, O_LABEL_INVARIANT};
use crate::{Arc, Fst, Semiring, StateId, EPSILON_LABEL, NO_LABEL, NO_STATE_ID};

/// Trait for the state a filter threads through composition. Must be
/// cheap, hashable and carry a distinguished rejection sentinel.
pub trait FilterState: Clone + PartialEq + Eq + Hash + Debug {
    fn no_state() -> Self;
}

/// Filter state holding a small integer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IntFilterState(i8);

impl IntFilterState {
    pub fn new(state: i8) -> Self {
        IntFilterState(state)
    }

    pub fn state(self) -> i8 {
        self.0
    }
}

impl FilterState for IntFilterState {
    fn no_state() -> Self {
        IntFilterState(-1)
    }
}

/// Filter state holding only the accept/reject distinction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TrivialFilterState(bool);

impl TrivialFilterState {
    pub fn new(state: bool) -> Self {
        TrivialFilterState(state)
    }
}

impl FilterState for TrivialFilterState {
    fn no_state() -> Self {
        TrivialFilterState(false)
    }
}

/// Trait for composition filters. The filter owns the two matchers for the
/// machines being composed; some filters augment them.
pub trait ComposeFilter<'f, W: Semiring> {
    type M1: Matcher<'f, W>;
    type M2: Matcher<'f, W>;
    type FS: FilterState;

    /// Filter state at the composed start.
    fn start(&self) -> Self::FS;

    /// Positions the filter at a composed state's component states and its
    /// carried filter state.
    fn set_state(&mut self, s1: StateId, s2: StateId, fs: &Self::FS);

    /// Rules on a candidate pair. May rewrite the arcs' labels; returns the
    /// filter state for the target composed state, or the rejection
    /// sentinel.
    fn filter_arc(&mut self, arc1: &mut Arc<W>, arc2: &mut Arc<W>) -> Self::FS;

    /// May adjust the component finality weights at a composed final state.
    fn filter_final(&self, w1: &mut W, w2: &mut W);

    fn matcher1(&mut self) -> &mut Self::M1;
    fn matcher2(&mut self) -> &mut Self::M2;

    /// Declares the label invariants the filter upholds by OR-ing them
    /// into `inprops`.
    fn properties(&self, inprops: u64) -> u64;
}

/// Filter for epsilon-free inputs: rejects every one-sided epsilon
/// advance outright.
pub struct NullComposeFilter<W, M1, M2> {
    matcher1: M1,
    matcher2: M2,
    _weight: PhantomData<W>,
}

impl<W, M1, M2> NullComposeFilter<W, M1, M2> {
    pub fn new(matcher1: M1, matcher2: M2) -> Self {
        NullComposeFilter {
            matcher1,
            matcher2,
            _weight: PhantomData,
        }
    }
}

impl<'f, W, M1, M2> ComposeFilter<'f, W> for NullComposeFilter<W, M1, M2>
where
    W: Semiring,
    M1: Matcher<'f, W>,
    M2: Matcher<'f, W>,
{
    type M1 = M1;
    type M2 = M2;
    type FS = TrivialFilterState;

    fn start(&self) -> TrivialFilterState {
        TrivialFilterState::new(true)
    }

    fn set_state(&mut self, _s1: StateId, _s2: StateId, _fs: &TrivialFilterState) {}

    fn filter_arc(&mut self, arc1: &mut Arc<W>, arc2: &mut Arc<W>) -> TrivialFilterState {
        if arc1.olabel == NO_LABEL || arc2.ilabel == NO_LABEL {
            TrivialFilterState::no_state()
        } else {
            TrivialFilterState::new(true)
        }
    }

    fn filter_final(&self, _w1: &mut W, _w2: &mut W) {}

    fn matcher1(&mut self) -> &mut M1 {
        &mut self.matcher1
    }

    fn matcher2(&mut self) -> &mut M2 {
        &mut self.matcher2
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops | I_LABEL_INVARIANT | O_LABEL_INVARIANT
    }
}

/// Filter that admits every pair, epsilon interleavings included. Correct
/// but redundant when both sides carry boundary epsilons.
pub struct TrivialComposeFilter<W, M1, M2> {
    matcher1: M1,
    matcher2: M2,
    _weight: PhantomData<W>,
}

impl<W, M1, M2> TrivialComposeFilter<W, M1, M2> {
    pub fn new(matcher1: M1, matcher2: M2) -> Self {
        TrivialComposeFilter {
            matcher1,
            matcher2,
            _weight: PhantomData,
        }
    }
}

impl<'f, W, M1, M2> ComposeFilter<'f, W> for TrivialComposeFilter<W, M1, M2>
where
    W: Semiring,
    M1: Matcher<'f, W>,
    M2: Matcher<'f, W>,
{
    type M1 = M1;
    type M2 = M2;
    type FS = TrivialFilterState;

    fn start(&self) -> TrivialFilterState {
        TrivialFilterState::new(true)
    }

    fn set_state(&mut self, _s1: StateId, _s2: StateId, _fs: &TrivialFilterState) {}

    fn filter_arc(&mut self, _arc1: &mut Arc<W>, _arc2: &mut Arc<W>) -> TrivialFilterState {
        TrivialFilterState::new(true)
    }

    fn filter_final(&self, _w1: &mut W, _w2: &mut W) {}

    fn matcher1(&mut self) -> &mut M1 {
        &mut self.matcher1
    }

    fn matcher2(&mut self) -> &mut M2 {
        &mut self.matcher2
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops | I_LABEL_INVARIANT | O_LABEL_INVARIANT
    }
}

/// The default filter: between two real matches, epsilons on the first
/// machine come before epsilons on the second, and epsilon-on-both is
/// rejected. Filter state 1 records that the second machine has moved on
/// an epsilon while the first still has some.
pub struct SequenceComposeFilter<W, M1, M2> {
    matcher1: M1,
    matcher2: M2,
    s1: StateId,
    s2: StateId,
    fs: IntFilterState,
    // Facts about the first machine's current state.
    alleps1: bool,
    noeps1: bool,
    _weight: PhantomData<W>,
}

impl<W, M1, M2> SequenceComposeFilter<W, M1, M2> {
    pub fn new(matcher1: M1, matcher2: M2) -> Self {
        SequenceComposeFilter {
            matcher1,
            matcher2,
            s1: NO_STATE_ID,
            s2: NO_STATE_ID,
            fs: IntFilterState::no_state(),
            alleps1: false,
            noeps1: true,
            _weight: PhantomData,
        }
    }
}

impl<'f, W, M1, M2> ComposeFilter<'f, W> for SequenceComposeFilter<W, M1, M2>
where
    W: Semiring,
    M1: Matcher<'f, W>,
    M2: Matcher<'f, W>,
{
    type M1 = M1;
    type M2 = M2;
    type FS = IntFilterState;

    fn start(&self) -> IntFilterState {
        IntFilterState::new(0)
    }

    fn set_state(&mut self, s1: StateId, s2: StateId, fs: &IntFilterState) {
        if self.s1 == s1 && self.s2 == s2 && self.fs == *fs {
            return;
        }
        self.s1 = s1;
        self.s2 = s2;
        self.fs = *fs;
        let fst1 = self.matcher1.fst();
        let na1 = fst1.num_arcs(s1);
        let ne1 = fst1.num_output_epsilons(s1);
        let fin1 = !fst1.final_weight(s1).is_zero();
        self.alleps1 = na1 == ne1 && !fin1;
        self.noeps1 = ne1 == 0;
    }

    fn filter_arc(&mut self, arc1: &mut Arc<W>, arc2: &mut Arc<W>) -> IntFilterState {
        if arc1.olabel == NO_LABEL {
            // The second machine moves on its epsilon while the first
            // stays. Pointless if the first can only move on epsilons.
            if self.alleps1 {
                IntFilterState::no_state()
            } else if self.noeps1 {
                IntFilterState::new(0)
            } else {
                IntFilterState::new(1)
            }
        } else if arc2.ilabel == NO_LABEL {
            // The first machine moves on its epsilon; only before the
            // second machine has done so.
            if self.fs != IntFilterState::new(0) {
                IntFilterState::no_state()
            } else {
                IntFilterState::new(0)
            }
        } else if arc1.olabel == EPSILON_LABEL {
            // Epsilon on both real arcs: always redundant here.
            IntFilterState::no_state()
        } else {
            IntFilterState::new(0)
        }
    }

    fn filter_final(&self, _w1: &mut W, _w2: &mut W) {}

    fn matcher1(&mut self) -> &mut M1 {
        &mut self.matcher1
    }

    fn matcher2(&mut self) -> &mut M2 {
        &mut self.matcher2
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops | I_LABEL_INVARIANT | O_LABEL_INVARIANT
    }
}

/// Mirror image of the sequence filter, favoring the second machine's
/// epsilons first.
pub struct AltSequenceComposeFilter<W, M1, M2> {
    matcher1: M1,
    matcher2: M2,
    s1: StateId,
    s2: StateId,
    fs: IntFilterState,
    alleps2: bool,
    noeps2: bool,
    _weight: PhantomData<W>,
}

impl<W, M1, M2> AltSequenceComposeFilter<W, M1, M2> {
    pub fn new(matcher1: M1, matcher2: M2) -> Self {
        AltSequenceComposeFilter {
            matcher1,
            matcher2,
            s1: NO_STATE_ID,
            s2: NO_STATE_ID,
            fs: IntFilterState::no_state(),
            alleps2: false,
            noeps2: true,
            _weight: PhantomData,
        }
    }
}

impl<'f, W, M1, M2> ComposeFilter<'f, W> for AltSequenceComposeFilter<W, M1, M2>
where
    W: Semiring,
    M1: Matcher<'f, W>,
    M2: Matcher<'f, W>,
{
    type M1 = M1;
    type M2 = M2;
    type FS = IntFilterState;

    fn start(&self) -> IntFilterState {
        IntFilterState::new(0)
    }

    fn set_state(&mut self, s1: StateId, s2: StateId, fs: &IntFilterState) {
        if self.s1 == s1 && self.s2 == s2 && self.fs == *fs {
            return;
        }
        self.s1 = s1;
        self.s2 = s2;
        self.fs = *fs;
        let fst2 = self.matcher2.fst();
        let na2 = fst2.num_arcs(s2);
        let ne2 = fst2.num_input_epsilons(s2);
        let fin2 = !fst2.final_weight(s2).is_zero();
        self.alleps2 = na2 == ne2 && !fin2;
        self.noeps2 = ne2 == 0;
    }

    fn filter_arc(&mut self, arc1: &mut Arc<W>, arc2: &mut Arc<W>) -> IntFilterState {
        if arc2.ilabel == NO_LABEL {
            if self.alleps2 {
                IntFilterState::no_state()
            } else if self.noeps2 {
                IntFilterState::new(0)
            } else {
                IntFilterState::new(1)
            }
        } else if arc1.olabel == NO_LABEL {
            if self.fs != IntFilterState::new(0) {
                IntFilterState::no_state()
            } else {
                IntFilterState::new(0)
            }
        } else if arc1.olabel == EPSILON_LABEL {
            IntFilterState::no_state()
        } else {
            IntFilterState::new(0)
        }
    }

    fn filter_final(&self, _w1: &mut W, _w2: &mut W) {}

    fn matcher1(&mut self) -> &mut M1 {
        &mut self.matcher1
    }

    fn matcher2(&mut self) -> &mut M2 {
        &mut self.matcher2
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops | I_LABEL_INVARIANT | O_LABEL_INVARIANT
    }
}

/// Symmetric filter: epsilons are matched with epsilons whenever
/// possible; one-sided epsilon runs are allowed but may not alternate.
/// State 1 records an unmatched epsilon run on the first machine, state 2
/// one on the second.
pub struct MatchComposeFilter<W, M1, M2> {
    matcher1: M1,
    matcher2: M2,
    s1: StateId,
    s2: StateId,
    fs: IntFilterState,
    alleps1: bool,
    noeps1: bool,
    alleps2: bool,
    noeps2: bool,
    _weight: PhantomData<W>,
}

impl<W, M1, M2> MatchComposeFilter<W, M1, M2> {
    pub fn new(matcher1: M1, matcher2: M2) -> Self {
        MatchComposeFilter {
            matcher1,
            matcher2,
            s1: NO_STATE_ID,
            s2: NO_STATE_ID,
            fs: IntFilterState::no_state(),
            alleps1: false,
            noeps1: true,
            alleps2: false,
            noeps2: true,
            _weight: PhantomData,
        }
    }
}

impl<'f, W, M1, M2> ComposeFilter<'f, W> for MatchComposeFilter<W, M1, M2>
where
    W: Semiring,
    M1: Matcher<'f, W>,
    M2: Matcher<'f, W>,
{
    type M1 = M1;
    type M2 = M2;
    type FS = IntFilterState;

    fn start(&self) -> IntFilterState {
        IntFilterState::new(0)
    }

    fn set_state(&mut self, s1: StateId, s2: StateId, fs: &IntFilterState) {
        if self.s1 == s1 && self.s2 == s2 && self.fs == *fs {
            return;
        }
        self.s1 = s1;
        self.s2 = s2;
        self.fs = *fs;
        let fst1 = self.matcher1.fst();
        let na1 = fst1.num_arcs(s1);
        let ne1 = fst1.num_output_epsilons(s1);
        let fin1 = !fst1.final_weight(s1).is_zero();
        self.alleps1 = na1 == ne1 && !fin1;
        self.noeps1 = ne1 == 0;
        let fst2 = self.matcher2.fst();
        let na2 = fst2.num_arcs(s2);
        let ne2 = fst2.num_input_epsilons(s2);
        let fin2 = !fst2.final_weight(s2).is_zero();
        self.alleps2 = na2 == ne2 && !fin2;
        self.noeps2 = ne2 == 0;
    }

    fn filter_arc(&mut self, arc1: &mut Arc<W>, arc2: &mut Arc<W>) -> IntFilterState {
        if arc2.ilabel == NO_LABEL {
            // Epsilon advance on the first machine only.
            if self.fs == IntFilterState::new(0) {
                if self.alleps2 {
                    IntFilterState::no_state()
                } else if self.noeps2 {
                    IntFilterState::new(0)
                } else {
                    IntFilterState::new(1)
                }
            } else if self.fs == IntFilterState::new(1) {
                IntFilterState::new(1)
            } else {
                IntFilterState::no_state()
            }
        } else if arc1.olabel == NO_LABEL {
            // Epsilon advance on the second machine only.
            if self.fs == IntFilterState::new(0) {
                if self.alleps1 {
                    IntFilterState::no_state()
                } else if self.noeps1 {
                    IntFilterState::new(0)
                } else {
                    IntFilterState::new(2)
                }
            } else if self.fs == IntFilterState::new(2) {
                IntFilterState::new(2)
            } else {
                IntFilterState::no_state()
            }
        } else {
            // A real match, epsilon-with-epsilon included.
            IntFilterState::new(0)
        }
    }

    fn filter_final(&self, _w1: &mut W, _w2: &mut W) {}

    fn matcher1(&mut self) -> &mut M1 {
        &mut self.matcher1
    }

    fn matcher2(&mut self) -> &mut M2 {
        &mut self.matcher2
    }

    fn properties(&self, inprops: u64) -> u64 {
        inprops | I_LABEL_INVARIANT | O_LABEL_INVARIANT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchType, SortedMatcher};
    use crate::vector::VectorFst;
    use crate::LoadTsv;

    fn machines() -> (VectorFst<bool>, VectorFst<bool>) {
        // The first machine has one epsilon-output arc and one real arc
        // at the start; the second has one epsilon-input arc and one real
        // arc.
        let a = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t0\ttrue
0\t2\t2\t3\ttrue
1\ttrue
2\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let b = VectorFst::<bool>::load_tsv(
            "
0\t1\t0\t5\ttrue
0\t2\t3\t6\ttrue
1\ttrue
2\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        (a, b)
    }

    #[test]
    fn sequence_filter_decisions_test() {
        let (a, b) = machines();
        let mut f: SequenceComposeFilter<bool, _, _> = SequenceComposeFilter::new(
            SortedMatcher::new(&a, MatchType::MatchOutput),
            SortedMatcher::new(&b, MatchType::MatchInput),
        );
        let start = f.start();
        f.set_state(0, 0, &start);

        // Second machine's epsilon advance from state 0 moves the filter
        // to state 1 because the first machine still has epsilons.
        let mut loop1 = Arc::new(EPSILON_LABEL, NO_LABEL, true, 0);
        let mut eps2 = Arc::new(EPSILON_LABEL, 5, true, 1);
        assert_eq!(f.filter_arc(&mut loop1, &mut eps2), IntFilterState::new(1));

        // First machine's epsilon advance is admitted in state 0.
        let mut eps1 = Arc::new(1, EPSILON_LABEL, true, 1);
        let mut loop2 = Arc::new(NO_LABEL, EPSILON_LABEL, true, 0);
        assert_eq!(f.filter_arc(&mut eps1, &mut loop2), IntFilterState::new(0));

        // In filter state 1 the first machine's epsilon is rejected.
        f.set_state(0, 0, &IntFilterState::new(1));
        let mut eps1 = Arc::new(1, EPSILON_LABEL, true, 1);
        let mut loop2 = Arc::new(NO_LABEL, EPSILON_LABEL, true, 0);
        assert_eq!(
            f.filter_arc(&mut eps1, &mut loop2),
            IntFilterState::no_state()
        );

        // A real match resets to state 0 from anywhere.
        let mut real1 = Arc::new(2, 3, true, 2);
        let mut real2 = Arc::new(3, 6, true, 2);
        assert_eq!(f.filter_arc(&mut real1, &mut real2), IntFilterState::new(0));
    }

    #[test]
    fn null_filter_rejects_epsilon_moves_test() {
        let (a, b) = machines();
        let mut f: NullComposeFilter<bool, _, _> = NullComposeFilter::new(
            SortedMatcher::new(&a, MatchType::MatchOutput),
            SortedMatcher::new(&b, MatchType::MatchInput),
        );
        let mut loop1 = Arc::new(EPSILON_LABEL, NO_LABEL, true, 0);
        let mut eps2 = Arc::new(EPSILON_LABEL, 5, true, 1);
        assert_eq!(
            f.filter_arc(&mut loop1, &mut eps2),
            TrivialFilterState::no_state()
        );
        let mut real1 = Arc::new(2, 3, true, 2);
        let mut real2 = Arc::new(3, 6, true, 2);
        assert_eq!(
            f.filter_arc(&mut real1, &mut real2),
            TrivialFilterState::new(true)
        );
    }

    #[test]
    fn match_filter_forbids_alternation_test() {
        let (a, b) = machines();
        let mut f: MatchComposeFilter<bool, _, _> = MatchComposeFilter::new(
            SortedMatcher::new(&a, MatchType::MatchOutput),
            SortedMatcher::new(&b, MatchType::MatchInput),
        );
        let start = f.start();
        f.set_state(0, 0, &start);

        // One-sided epsilon run on the first machine enters state 1.
        let mut eps1 = Arc::new(1, EPSILON_LABEL, true, 1);
        let mut loop2 = Arc::new(NO_LABEL, EPSILON_LABEL, true, 0);
        assert_eq!(f.filter_arc(&mut eps1, &mut loop2), IntFilterState::new(1));

        // From state 1 the second machine's epsilon may not follow.
        f.set_state(0, 0, &IntFilterState::new(1));
        let mut loop1 = Arc::new(EPSILON_LABEL, NO_LABEL, true, 0);
        let mut eps2 = Arc::new(EPSILON_LABEL, 5, true, 1);
        assert_eq!(
            f.filter_arc(&mut loop1, &mut eps2),
            IntFilterState::no_state()
        );
    }
}
