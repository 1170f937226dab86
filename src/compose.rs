//! Delayed composition of two transducers.
//!
//! If the first machine transduces `x` to `y` with weight `a` and the
//! second transduces `y` to `z` with weight `b`, the composition
//! transduces `x` to `z` with the plus-sum over `y` of `a` times `b`.
//! States of the result are expanded on access: a composed state is a
//! tuple of one state from each input plus a filter state, interned to a
//! dense id. Expansion iterates one side's arcs and matches each against
//! the other side's indexed matcher, with the filter ruling on every
//! candidate pair.
//!
//! The output labels of the first machine or the input labels of the
//! second must be sorted; failures to resolve a usable match side latch
//! the error property instead of panicking. The delayed result is not
//! trimmed; the eager wrapper is.

use std::cell::{Cell, RefCell};

use tracing::error;

use crate::cache::{CacheImpl, CacheOptions};
use crate::connect::connect;
use crate::filter::{
    AltSequenceComposeFilter, ComposeFilter, FilterState, MatchComposeFilter, NullComposeFilter,
    SequenceComposeFilter, TrivialComposeFilter,
};
use crate::matcher::{
    MatchType, MatchableFst, Matcher, SortedMatcher, REQUIRE_MATCH, REQUIRE_PRIORITY,
};
use crate::properties::{
    compose_properties, ERROR, I_LABEL_INVARIANT, O_LABEL_INVARIANT, UNWEIGHTED,
};
use crate::statetable::ComposeStateTable;
use crate::symt::{compat_symbols, SymbolTable};
use crate::vector::VectorFst;
use crate::{
    Arc, Fst, Label, Semiring, StateId, COMMUTATIVE, EPSILON_LABEL, NO_LABEL, NO_STATE_ID,
};

/// The delayed composition machine.
///
/// Holds the filter (which owns the two matchers), the state-tuple table
/// and the per-state cache. Everything is expanded on demand through the
/// `Fst` interface.
pub struct ComposeFst<'f, W: Semiring, CF: ComposeFilter<'f, W>> {
    fst1: &'f <CF::M1 as Matcher<'f, W>>::F,
    fst2: &'f <CF::M2 as Matcher<'f, W>>::F,
    filter: RefCell<CF>,
    state_table: RefCell<ComposeStateTable<CF::FS>>,
    cache: RefCell<CacheImpl<W>>,
    match_type: MatchType,
    props: Cell<u64>,
    isymbols: Option<SymbolTable>,
    osymbols: Option<SymbolTable>,
}

impl<'f, W, CF> ComposeFst<'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    /// Builds a composition from an explicit filter, which supplies the
    /// matchers and through them the two machines.
    pub fn new_with_filter(mut filter: CF, copts: CacheOptions, check_symbols: bool) -> Self {
        let fst1 = filter.matcher1().fst();
        let fst2 = filter.matcher2().fst();

        let mut props = 0u64;
        if !compat_symbols(fst1.output_symbols(), fst2.input_symbols(), check_symbols) {
            error!(
                "compose: output symbol table of the first machine does not \
                 match input symbol table of the second machine"
            );
            props |= ERROR;
        }

        let match_type = resolve_match_type(&mut filter);
        if match_type == MatchType::MatchNone {
            props |= ERROR;
        }

        if W::properties() & COMMUTATIVE == 0 {
            let w1 = fst1.properties(UNWEIGHTED, true);
            let w2 = fst2.properties(UNWEIGHTED, true);
            if w1 & UNWEIGHTED == 0 && w2 & UNWEIGHTED == 0 {
                error!("compose: weights must form a commutative semiring");
                props |= ERROR;
            }
        }

        let p1 = fst1.properties(crate::properties::ALL_PROPERTIES, false);
        let p2 = fst2.properties(crate::properties::ALL_PROPERTIES, false);
        props |= compose_properties(p1, p2);

        let isymbols = fst1.input_symbols().cloned();
        let osymbols = fst2.output_symbols().cloned();

        ComposeFst {
            fst1,
            fst2,
            filter: RefCell::new(filter),
            state_table: RefCell::new(ComposeStateTable::new()),
            cache: RefCell::new(CacheImpl::new(copts)),
            match_type,
            props: Cell::new(props),
            isymbols,
            osymbols,
        }
    }

    /// How many state expansions have run so far.
    pub fn expansions(&self) -> usize {
        self.cache.borrow().expansions()
    }

    /// A matcher over the composed machine itself, avoiding arc
    /// materialization. Available when both inner matchers index the
    /// requested side and the filter leaves that side's labels alone.
    pub fn init_matcher(&self, match_type: MatchType) -> Option<ComposeFstMatcher<'_, 'f, W, CF>> {
        let test_prop = match match_type {
            MatchType::MatchInput => I_LABEL_INVARIANT,
            MatchType::MatchOutput => O_LABEL_INVARIANT,
            _ => return None,
        };
        let mut filter = self.filter.borrow_mut();
        if filter.matcher1().match_type(false) == match_type
            && filter.matcher2().match_type(false) == match_type
            && filter.properties(0) & test_prop != 0
        {
            let matcher1 = filter.matcher1().clone();
            let matcher2 = filter.matcher2().clone();
            drop(filter);
            Some(ComposeFstMatcher::new(self, matcher1, matcher2, match_type))
        } else {
            None
        }
    }

    fn compute_start(&self) -> StateId {
        if self.props.get() & ERROR != 0 {
            return NO_STATE_ID;
        }
        let s1 = self.fst1.start();
        if s1 == NO_STATE_ID {
            return NO_STATE_ID;
        }
        let s2 = self.fst2.start();
        if s2 == NO_STATE_ID {
            return NO_STATE_ID;
        }
        let fs = self.filter.borrow().start();
        let s = self.state_table.borrow_mut().find_state(s1, s2, &fs);
        if s == NO_STATE_ID {
            self.props.set(self.props.get() | ERROR);
        }
        s
    }

    fn compute_final(&self, s: StateId) -> W {
        let (s1, s2, fs) = self.state_table.borrow().tuple(s).clone();
        let mut filter = self.filter.borrow_mut();
        let mut final1 = filter.matcher1().final_weight(s1);
        if final1.is_zero() {
            return final1;
        }
        let mut final2 = filter.matcher2().final_weight(s2);
        if final2.is_zero() {
            return final2;
        }
        filter.set_state(s1, s2, &fs);
        filter.filter_final(&mut final1, &mut final2);
        final1.times(&final2)
    }

    // Picks the side to iterate at this composed state; the other side is
    // matched against. True means the second matcher does the matching.
    fn match_input(&self, filter: &mut CF, s1: StateId, s2: StateId) -> bool {
        match self.match_type {
            MatchType::MatchInput => true,
            MatchType::MatchOutput => false,
            _ => {
                let priority1 = filter.matcher1().priority(s1);
                let priority2 = filter.matcher2().priority(s2);
                if priority1 == REQUIRE_PRIORITY && priority2 == REQUIRE_PRIORITY {
                    error!("compose: both matchers require to be the matched side");
                    self.props.set(self.props.get() | ERROR);
                    return true;
                }
                if priority1 == REQUIRE_PRIORITY {
                    return false;
                }
                if priority2 == REQUIRE_PRIORITY {
                    return true;
                }
                priority1 <= priority2
            }
        }
    }

    fn expand(&self, s: StateId) {
        let (s1, s2, fs) = self.state_table.borrow().tuple(s).clone();
        let mut filter = self.filter.borrow_mut();
        filter.set_state(s1, s2, &fs);
        if self.match_input(&mut filter, s1, s2) {
            self.ordered_expand(&mut filter, s, s2, s1, true);
        } else {
            self.ordered_expand(&mut filter, s, s1, s2, false);
        }
    }

    // Expands composed state `s`, matching at state `sa` of one machine
    // for each arc leaving state `sb` of the other.
    fn ordered_expand(&self, filter: &mut CF, s: StateId, sa: StateId, sb: StateId, match_input: bool) {
        if match_input {
            filter.matcher2().set_state(sa);
        } else {
            filter.matcher1().set_state(sa);
        }

        // The non-consuming arc first: it advances the iterated side on
        // its epsilons while the matched side stays put.
        let loop_arc = if match_input {
            Arc::new(EPSILON_LABEL, NO_LABEL, W::one(), sb)
        } else {
            Arc::new(NO_LABEL, EPSILON_LABEL, W::one(), sb)
        };
        self.match_arc(filter, s, &loop_arc, match_input);

        let fst1 = self.fst1;
        let fst2 = self.fst2;
        let arcs_b: Box<dyn Iterator<Item = Arc<W>> + '_> = if match_input {
            fst1.arcs(sb)
        } else {
            fst2.arcs(sb)
        };
        for arcb in arcs_b {
            self.match_arc(filter, s, &arcb, match_input);
        }

        self.cache.borrow_mut().set_arcs(s);
    }

    // Matches one arc of the iterated side against the matched side and
    // emits every pair the filter admits.
    fn match_arc(&self, filter: &mut CF, s: StateId, arcb: &Arc<W>, match_input: bool) {
        let label = if match_input { arcb.olabel } else { arcb.ilabel };
        let found = if match_input {
            filter.matcher2().find(label)
        } else {
            filter.matcher1().find(label)
        };
        if !found {
            return;
        }
        loop {
            let arca = if match_input {
                let matcher = filter.matcher2();
                if matcher.done() {
                    break;
                }
                let arc = matcher.value();
                matcher.next();
                arc
            } else {
                let matcher = filter.matcher1();
                if matcher.done() {
                    break;
                }
                let arc = matcher.value();
                matcher.next();
                arc
            };
            let (mut arc1, mut arc2) = if match_input {
                (arcb.clone(), arca)
            } else {
                (arca, arcb.clone())
            };
            let fs = filter.filter_arc(&mut arc1, &mut arc2);
            if fs != CF::FS::no_state() {
                self.add_arc(s, arc1, arc2, fs);
            }
        }
    }

    fn add_arc(&self, s: StateId, arc1: Arc<W>, arc2: Arc<W>, fs: CF::FS) {
        let nextstate = self
            .state_table
            .borrow_mut()
            .find_state(arc1.nextstate, arc2.nextstate, &fs);
        if nextstate == NO_STATE_ID {
            self.props.set(self.props.get() | ERROR);
            return;
        }
        let arc = Arc::new(
            arc1.ilabel,
            arc2.olabel,
            arc1.weight.times(&arc2.weight),
            nextstate,
        );
        self.cache.borrow_mut().push_arc(s, arc);
    }
}

// Checks the required matchings are possible and decides which sides can
// be matched on, favoring cheap tests before probing.
fn resolve_match_type<'f, W, CF>(filter: &mut CF) -> MatchType
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    if filter.matcher1().flags() & REQUIRE_MATCH != 0
        && filter.matcher1().match_type(true) != MatchType::MatchOutput
    {
        error!("compose: the first matcher requires matching but cannot match on output labels");
        return MatchType::MatchNone;
    }
    if filter.matcher2().flags() & REQUIRE_MATCH != 0
        && filter.matcher2().match_type(true) != MatchType::MatchInput
    {
        error!("compose: the second matcher requires matching but cannot match on input labels");
        return MatchType::MatchNone;
    }
    let type1 = filter.matcher1().match_type(false);
    let type2 = filter.matcher2().match_type(false);
    if type1 == MatchType::MatchOutput && type2 == MatchType::MatchInput {
        MatchType::MatchBoth
    } else if type1 == MatchType::MatchOutput {
        MatchType::MatchOutput
    } else if type2 == MatchType::MatchInput {
        MatchType::MatchInput
    } else if filter.matcher1().match_type(true) == MatchType::MatchOutput {
        MatchType::MatchOutput
    } else if filter.matcher2().match_type(true) == MatchType::MatchInput {
        MatchType::MatchInput
    } else {
        error!(
            "compose: the first machine cannot match on output labels and \
             the second cannot match on input labels; sort an input first"
        );
        MatchType::MatchNone
    }
}

impl<'f, W, CF> Fst<W> for ComposeFst<'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    fn start(&self) -> StateId {
        if !self.cache.borrow().has_start() {
            let s = self.compute_start();
            self.cache.borrow_mut().set_start(s);
        }
        self.cache.borrow().start()
    }

    fn final_weight(&self, s: StateId) -> W {
        if self.props.get() & ERROR != 0 {
            return W::zero();
        }
        if !self.cache.borrow().has_final(s) {
            let w = self.compute_final(s);
            self.cache.borrow_mut().set_final(s, w);
        }
        self.cache.borrow().final_weight(s)
    }

    fn num_arcs(&self, s: StateId) -> usize {
        if self.props.get() & ERROR != 0 {
            return 0;
        }
        if !self.cache.borrow().has_arcs(s) {
            self.expand(s);
        }
        self.cache.borrow().num_arcs(s)
    }

    fn arcs<'a>(&'a self, s: StateId) -> Box<dyn Iterator<Item = Arc<W>> + 'a> {
        if self.props.get() & ERROR != 0 {
            return Box::new(std::iter::empty());
        }
        if !self.cache.borrow().has_arcs(s) {
            self.expand(s);
        }
        Box::new(self.cache.borrow().arc_iter(s))
    }

    fn properties(&self, mask: u64, _test: bool) -> u64 {
        if mask & ERROR != 0 {
            let mut filter = self.filter.borrow_mut();
            let funneled = self.fst1.properties(ERROR, false)
                | self.fst2.properties(ERROR, false)
                | (filter.matcher1().properties(0) & ERROR)
                | (filter.matcher2().properties(0) & ERROR)
                | (filter.properties(0) & ERROR);
            drop(filter);
            if funneled != 0 || self.state_table.borrow().error() {
                self.props.set(self.props.get() | ERROR);
            }
        }
        self.props.get() & mask
    }

    fn input_symbols(&self) -> Option<&SymbolTable> {
        self.isymbols.as_ref()
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        self.osymbols.as_ref()
    }
}

impl<'f, W, F1, F2>
    ComposeFst<
        'f,
        W,
        SequenceComposeFilter<W, SortedMatcher<'f, W, F1>, SortedMatcher<'f, W, F2>>,
    >
where
    W: Semiring,
    F1: Fst<W> + 'f,
    F2: Fst<W> + 'f,
{
    /// Builds the default delayed composition: sorted matchers on both
    /// machines and the sequence filter.
    pub fn new(fst1: &'f F1, fst2: &'f F2, copts: CacheOptions) -> Self {
        let filter = SequenceComposeFilter::new(
            SortedMatcher::new(fst1, MatchType::MatchOutput),
            SortedMatcher::new(fst2, MatchType::MatchInput),
        );
        ComposeFst::new_with_filter(filter, copts, true)
    }
}

/// Matcher over a composed machine, enumerating composed arcs straight
/// from the two inner matchers without expanding states into the cache.
pub struct ComposeFstMatcher<'c, 'f, W: Semiring, CF: ComposeFilter<'f, W>> {
    fst: &'c ComposeFst<'f, W, CF>,
    matcher1: CF::M1,
    matcher2: CF::M2,
    s: StateId,
    match_type: MatchType,
    current_loop: bool,
    loop_arc: Arc<W>,
    arc: Arc<W>,
    error: bool,
}

impl<'c, 'f, W, CF> ComposeFstMatcher<'c, 'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    fn new(
        fst: &'c ComposeFst<'f, W, CF>,
        matcher1: CF::M1,
        matcher2: CF::M2,
        match_type: MatchType,
    ) -> Self {
        let mut loop_arc = Arc::new(NO_LABEL, EPSILON_LABEL, W::one(), NO_STATE_ID);
        if match_type == MatchType::MatchOutput {
            std::mem::swap(&mut loop_arc.ilabel, &mut loop_arc.olabel);
        }
        ComposeFstMatcher {
            fst,
            matcher1,
            matcher2,
            s: NO_STATE_ID,
            match_type,
            current_loop: false,
            loop_arc,
            arc: Arc::new(NO_LABEL, NO_LABEL, W::zero(), NO_STATE_ID),
            error: false,
        }
    }
}

impl<'c, 'f, W, CF> Clone for ComposeFstMatcher<'c, 'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    fn clone(&self) -> Self {
        ComposeFstMatcher {
            fst: self.fst,
            matcher1: self.matcher1.clone(),
            matcher2: self.matcher2.clone(),
            s: self.s,
            match_type: self.match_type,
            current_loop: self.current_loop,
            loop_arc: self.loop_arc.clone(),
            arc: self.arc.clone(),
            error: self.error,
        }
    }
}

// Runs the filter on a candidate pair and builds the composed arc on
// acceptance.
fn match_arc_pair<'c, 'f, W, CF>(
    fst: &'c ComposeFst<'f, W, CF>,
    out: &mut Arc<W>,
    error: &mut bool,
    match_input: bool,
    arca: Arc<W>,
    arcb: Arc<W>,
) -> bool
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    let (mut arc1, mut arc2) = if match_input { (arca, arcb) } else { (arcb, arca) };
    let fs = fst.filter.borrow_mut().filter_arc(&mut arc1, &mut arc2);
    if fs == CF::FS::no_state() {
        return false;
    }
    let nextstate = fst
        .state_table
        .borrow_mut()
        .find_state(arc1.nextstate, arc2.nextstate, &fs);
    if nextstate == NO_STATE_ID {
        *error = true;
        return false;
    }
    *out = Arc::new(
        arc1.ilabel,
        arc2.olabel,
        arc1.weight.times(&arc2.weight),
        nextstate,
    );
    true
}

// Positions the secondary matcher on the primary's current match and
// advances both until the filter admits a pair.
fn find_next<'f, W, MA, MB>(
    matchera: &mut MA,
    matcherb: &mut MB,
    match_input: bool,
    try_match: &mut impl FnMut(Arc<W>, Arc<W>) -> bool,
) -> bool
where
    W: Semiring,
    MA: Matcher<'f, W>,
    MB: Matcher<'f, W>,
{
    while !matchera.done() || !matcherb.done() {
        if matcherb.done() {
            matchera.next();
            while !matchera.done() {
                let v = matchera.value();
                let label = if match_input { v.olabel } else { v.ilabel };
                if matcherb.find(label) {
                    break;
                }
                matchera.next();
            }
        }
        while !matcherb.done() {
            let arca = matchera.value();
            let arcb = matcherb.value();
            matcherb.next();
            if try_match(arca, arcb) {
                return true;
            }
        }
    }
    false
}

fn find_label<'f, W, MA, MB>(
    label: Label,
    matchera: &mut MA,
    matcherb: &mut MB,
    match_input: bool,
    try_match: &mut impl FnMut(Arc<W>, Arc<W>) -> bool,
) -> bool
where
    W: Semiring,
    MA: Matcher<'f, W>,
    MB: Matcher<'f, W>,
{
    if matchera.find(label) {
        let v = matchera.value();
        let inner = if match_input { v.olabel } else { v.ilabel };
        matcherb.find(inner);
        find_next(matchera, matcherb, match_input, try_match)
    } else {
        false
    }
}

impl<'c, 'f, W, CF> Matcher<'c, W> for ComposeFstMatcher<'c, 'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    type F = ComposeFst<'f, W, CF>;

    fn fst(&self) -> &'c ComposeFst<'f, W, CF> {
        self.fst
    }

    fn match_type(&self, test: bool) -> MatchType {
        let type1 = self.matcher1.match_type(test);
        let type2 = self.matcher2.match_type(test);
        if type1 == MatchType::MatchNone || type2 == MatchType::MatchNone {
            return MatchType::MatchNone;
        }
        let unknown1 = type1 == MatchType::MatchUnknown;
        let unknown2 = type2 == MatchType::MatchUnknown;
        if (unknown1 && unknown2)
            || (unknown1 && type2 == self.match_type)
            || (type1 == self.match_type && unknown2)
        {
            return MatchType::MatchUnknown;
        }
        if type1 == self.match_type && type2 == self.match_type {
            return self.match_type;
        }
        MatchType::MatchNone
    }

    fn set_state(&mut self, s: StateId) {
        if self.s == s {
            return;
        }
        self.s = s;
        let (s1, s2, fs) = self.fst.state_table.borrow().tuple(s).clone();
        self.matcher1.set_state(s1);
        self.matcher2.set_state(s2);
        self.fst.filter.borrow_mut().set_state(s1, s2, &fs);
        self.loop_arc.nextstate = s;
    }

    fn find(&mut self, label: Label) -> bool {
        let mut found = false;
        self.current_loop = false;
        if label == EPSILON_LABEL {
            self.current_loop = true;
            found = true;
        }
        if !found {
            let fst = self.fst;
            let match_input = self.match_type == MatchType::MatchInput;
            let arc_out = &mut self.arc;
            let error = &mut self.error;
            let mut try_match = |arca: Arc<W>, arcb: Arc<W>| {
                match_arc_pair(fst, arc_out, error, match_input, arca, arcb)
            };
            found = if match_input {
                find_label(label, &mut self.matcher1, &mut self.matcher2, true, &mut try_match)
            } else {
                find_label(label, &mut self.matcher2, &mut self.matcher1, false, &mut try_match)
            };
        }
        found
    }

    fn done(&self) -> bool {
        !self.current_loop && self.matcher1.done() && self.matcher2.done()
    }

    fn value(&self) -> Arc<W> {
        if self.current_loop {
            self.loop_arc.clone()
        } else {
            self.arc.clone()
        }
    }

    fn next(&mut self) {
        if self.current_loop {
            self.current_loop = false;
            return;
        }
        let fst = self.fst;
        let match_input = self.match_type == MatchType::MatchInput;
        let arc_out = &mut self.arc;
        let error = &mut self.error;
        let mut try_match =
            |arca: Arc<W>, arcb: Arc<W>| match_arc_pair(fst, arc_out, error, match_input, arca, arcb);
        if match_input {
            find_next(&mut self.matcher1, &mut self.matcher2, true, &mut try_match);
        } else {
            find_next(&mut self.matcher2, &mut self.matcher1, false, &mut try_match);
        }
    }

    fn priority(&self, s: StateId) -> isize {
        self.fst.num_arcs(s) as isize
    }

    fn properties(&self, inprops: u64) -> u64 {
        if self.error {
            inprops | ERROR
        } else {
            inprops
        }
    }
}

impl<'f, W, CF> MatchableFst<W> for ComposeFst<'f, W, CF>
where
    W: Semiring,
    CF: ComposeFilter<'f, W>,
{
    type M<'c> = ComposeFstMatcher<'c, 'f, W, CF>
    where
        Self: 'c;

    fn init_matcher(&self, match_type: MatchType) -> Option<Self::M<'_>> {
        ComposeFst::init_matcher(self, match_type)
    }
}

/// Which predefined filter the eager wrapper uses. `Auto` currently
/// selects the sequence filter.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ComposeFilterType {
    Auto,
    Null,
    Trivial,
    Sequence,
    AltSequence,
    Match,
}

#[derive(Clone, Copy, Debug)]
pub struct ComposeOptions {
    /// Trim the output down to its successful paths.
    pub connect: bool,
    pub filter_type: ComposeFilterType,
    /// Verify the boundary symbol tables agree.
    pub compat_symbols: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        ComposeOptions {
            connect: true,
            filter_type: ComposeFilterType::Auto,
            compat_symbols: true,
        }
    }
}

/// Eager composition: materializes the delayed machine into vector form,
/// trimming unless disabled. The cache retains only the most recent state
/// since the copy sweeps each state once.
pub fn compose<W, F1, F2>(fst1: &F1, fst2: &F2, opts: &ComposeOptions) -> VectorFst<W>
where
    W: Semiring,
    F1: Fst<W>,
    F2: Fst<W>,
{
    let copts = CacheOptions {
        gc: true,
        gc_limit: 0,
    };
    let mut ofst = match opts.filter_type {
        ComposeFilterType::Auto | ComposeFilterType::Sequence => {
            let cfst = ComposeFst::new_with_filter(
                SequenceComposeFilter::new(
                    SortedMatcher::new(fst1, MatchType::MatchOutput),
                    SortedMatcher::new(fst2, MatchType::MatchInput),
                ),
                copts,
                opts.compat_symbols,
            );
            VectorFst::from_fst(&cfst)
        }
        ComposeFilterType::AltSequence => {
            let cfst = ComposeFst::new_with_filter(
                AltSequenceComposeFilter::new(
                    SortedMatcher::new(fst1, MatchType::MatchOutput),
                    SortedMatcher::new(fst2, MatchType::MatchInput),
                ),
                copts,
                opts.compat_symbols,
            );
            VectorFst::from_fst(&cfst)
        }
        ComposeFilterType::Match => {
            let cfst = ComposeFst::new_with_filter(
                MatchComposeFilter::new(
                    SortedMatcher::new(fst1, MatchType::MatchOutput),
                    SortedMatcher::new(fst2, MatchType::MatchInput),
                ),
                copts,
                opts.compat_symbols,
            );
            VectorFst::from_fst(&cfst)
        }
        ComposeFilterType::Null => {
            let cfst = ComposeFst::new_with_filter(
                NullComposeFilter::new(
                    SortedMatcher::new(fst1, MatchType::MatchOutput),
                    SortedMatcher::new(fst2, MatchType::MatchInput),
                ),
                copts,
                opts.compat_symbols,
            );
            VectorFst::from_fst(&cfst)
        }
        ComposeFilterType::Trivial => {
            let cfst = ComposeFst::new_with_filter(
                TrivialComposeFilter::new(
                    SortedMatcher::new(fst1, MatchType::MatchOutput),
                    SortedMatcher::new(fst2, MatchType::MatchInput),
                ),
                copts,
                opts.compat_symbols,
            );
            VectorFst::from_fst(&cfst)
        }
    };
    if opts.connect {
        connect(&mut ofst);
    }
    ofst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arcsort::{arc_sort_input, arc_sort_output};
    use crate::properties::{ACCESSIBLE, COACCESSIBLE, NOT_COACCESSIBLE};
    use crate::shortestdistance::{total_weight, ShortestDistanceOptions};
    use crate::{ExpandedFst, LoadTsv, MutableFst, Tropical};

    fn load_bool(src: &str) -> VectorFst<bool> {
        VectorFst::load_tsv(src.trim().as_bytes()).unwrap()
    }

    fn load_tropical(src: &str) -> VectorFst<Tropical<f32>> {
        VectorFst::load_tsv(src.trim().as_bytes()).unwrap()
    }

    // Number of distinct accepting paths; the machines under test are
    // acyclic.
    fn count_paths<W: Semiring>(fst: &VectorFst<W>) -> usize {
        fn go<W: Semiring>(fst: &VectorFst<W>, s: StateId) -> usize {
            let mut n = usize::from(!fst.final_weight(s).is_zero());
            for arc in fst.arcs_slice(s) {
                n += go(fst, arc.nextstate);
            }
            n
        }
        if fst.num_states() == 0 || fst.start() == NO_STATE_ID {
            0
        } else {
            go(fst, fst.start())
        }
    }

    fn ab_ac_acceptor() -> VectorFst<bool> {
        load_bool(
            "
0\t1\t1\t1\ttrue
1\t2\t2\t2\ttrue
1\t3\t3\t3\ttrue
2\ttrue
3\ttrue
",
        )
    }

    fn ab_acceptor() -> VectorFst<bool> {
        load_bool(
            "
0\t1\t1\t1\ttrue
1\t2\t2\t2\ttrue
2\ttrue
",
        )
    }

    #[test]
    fn acceptor_intersection_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_output(&mut a);
        let mut b = ab_acceptor();
        arc_sort_input(&mut b);

        let out = compose(&a, &b, &ComposeOptions::default());
        assert_eq!(out.properties(ERROR, false), 0);
        assert_eq!(out.num_states(), 3);
        assert_eq!(count_paths(&out), 1);
        assert_eq!(out.num_arcs(out.start()), 1);
        let first = &out.arcs_slice(out.start())[0];
        assert_eq!((first.ilabel, first.olabel), (1, 1));
        let second = &out.arcs_slice(first.nextstate)[0];
        assert_eq!((second.ilabel, second.olabel), (2, 2));
    }

    #[test]
    fn weight_multiplication_test() {
        let a = load_tropical(
            "
0\t1\t1\t1\t0.5
1\t0
",
        );
        let b = load_tropical(
            "
0\t1\t1\t1\t0.25
1\t0
",
        );
        let out = compose(&a, &b, &ComposeOptions::default());
        let total = total_weight(&out, &ShortestDistanceOptions::default());
        assert!(total.approx_eq(&Tropical::new(0.75), 1e-6));
    }

    #[test]
    fn epsilon_parallel_paths_test() {
        // Two epsilon-input arcs whose outputs select different arcs of
        // the second machine: exactly two composed paths, no duplicates.
        let a = load_bool(
            "
0\t1\t0\t1\ttrue
0\t2\t0\t2\ttrue
1\ttrue
2\ttrue
",
        );
        let b = load_bool(
            "
0\t1\t1\t3\ttrue
0\t2\t2\t4\ttrue
1\ttrue
2\ttrue
",
        );
        let out = compose(&a, &b, &ComposeOptions::default());
        assert_eq!(count_paths(&out), 2);
        let mut olabels: Vec<_> = out
            .arcs_slice(out.start())
            .iter()
            .map(|arc| arc.olabel)
            .collect();
        olabels.sort_unstable();
        assert_eq!(olabels, vec![3, 4]);
        assert!(out
            .arcs_slice(out.start())
            .iter()
            .all(|arc| arc.ilabel == EPSILON_LABEL));
    }

    #[test]
    fn epsilon_diamond_filter_test() {
        // An output epsilon in the first machine meets an input epsilon
        // in the second. The trivial filter admits every interleaving of
        // the two epsilon moves; the sequence filter admits one.
        let a = load_bool(
            "
0\t1\t1\t1\ttrue
1\t2\t2\t0\ttrue
2\ttrue
",
        );
        let b = load_bool(
            "
0\t1\t1\t3\ttrue
1\t2\t0\t4\ttrue
2\ttrue
",
        );
        let sequence = compose(
            &a,
            &b,
            &ComposeOptions {
                filter_type: ComposeFilterType::Sequence,
                ..Default::default()
            },
        );
        assert_eq!(count_paths(&sequence), 1);

        let trivial = compose(
            &a,
            &b,
            &ComposeOptions {
                filter_type: ComposeFilterType::Trivial,
                ..Default::default()
            },
        );
        assert_eq!(count_paths(&trivial), 3);

        let matched = compose(
            &a,
            &b,
            &ComposeOptions {
                filter_type: ComposeFilterType::Match,
                ..Default::default()
            },
        );
        assert_eq!(count_paths(&matched), 1);
    }

    #[test]
    fn unsorted_inputs_error_test() {
        let a = load_bool(
            "
0\t1\t1\t2\ttrue
0\t1\t2\t1\ttrue
1\ttrue
",
        );
        let b = load_bool(
            "
0\t1\t2\t1\ttrue
0\t1\t1\t2\ttrue
1\ttrue
",
        );
        let out = compose(&a, &b, &ComposeOptions::default());
        assert!(out.properties(ERROR, false) != 0);
        assert_eq!(out.num_states(), 0);
    }

    #[test]
    fn empty_composition_test() {
        // No output of the first machine ever matches an input of the
        // second.
        let a = load_bool(
            "
0\t1\t1\t5\ttrue
1\ttrue
",
        );
        let b = load_bool(
            "
0\t1\t6\t2\ttrue
1\ttrue
",
        );
        let untrimmed = compose(
            &a,
            &b,
            &ComposeOptions {
                connect: false,
                ..Default::default()
            },
        );
        assert_eq!(untrimmed.num_states(), 1);
        assert!(untrimmed.properties(NOT_COACCESSIBLE, true) != 0);

        let trimmed = compose(&a, &b, &ComposeOptions::default());
        assert_eq!(trimmed.num_states(), 0);
        assert_eq!(count_paths(&trimmed), 0);
    }

    #[test]
    fn identity_composition_test() {
        let a = load_tropical(
            "
0\t1\t1\t2\t0.5
1\t0
",
        );
        // The identity transducer over the output alphabet of `a`.
        let identity = load_tropical(
            "
0\t0\t2\t2\t0
0\t0
",
        );
        let out = compose(&a, &identity, &ComposeOptions::default());
        assert_eq!(count_paths(&out), 1);
        let arc = &out.arcs_slice(out.start())[0];
        assert_eq!((arc.ilabel, arc.olabel), (1, 2));
        let total = total_weight(&out, &ShortestDistanceOptions::default());
        assert!(total.approx_eq(&Tropical::new(0.5), 1e-6));
    }

    #[test]
    fn associativity_test() {
        let a = load_tropical(
            "
0\t1\t1\t2\t0.5
1\t0
",
        );
        let b = load_tropical(
            "
0\t1\t2\t3\t0.25
1\t0
",
        );
        let c = load_tropical(
            "
0\t1\t3\t4\t0.125
1\t0
",
        );
        let opts = ComposeOptions::default();
        let sdopts = ShortestDistanceOptions::default();

        let mut ab = compose(&a, &b, &opts);
        arc_sort_output(&mut ab);
        let ab_c = compose(&ab, &c, &opts);

        let mut bc = compose(&b, &c, &opts);
        arc_sort_input(&mut bc);
        let a_bc = compose(&a, &bc, &opts);

        let left = total_weight(&ab_c, &sdopts);
        let right = total_weight(&a_bc, &sdopts);
        assert!(left.approx_eq(&right, 1e-6));
        assert!(left.approx_eq(&Tropical::new(0.875), 1e-6));
    }

    #[test]
    fn cache_expands_each_state_once_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_output(&mut a);
        let mut b = ab_acceptor();
        arc_sort_input(&mut b);

        let cfst = ComposeFst::new(&a, &b, CacheOptions::default());
        let first = VectorFst::from_fst(&cfst);
        let expansions = cfst.expansions();
        assert_eq!(expansions, first.num_states());

        // A second full sweep is served from the cache.
        let second = VectorFst::from_fst(&cfst);
        assert_eq!(cfst.expansions(), expansions);
        assert_eq!(first.num_states(), second.num_states());
        for s in 0..first.num_states() {
            assert_eq!(
                first.arcs_slice(s as StateId),
                second.arcs_slice(s as StateId)
            );
        }
    }

    #[test]
    fn deterministic_arc_order_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_output(&mut a);
        let mut b = ab_ac_acceptor();
        arc_sort_input(&mut b);

        let one = compose(&a, &b, &ComposeOptions::default());
        let two = compose(&a, &b, &ComposeOptions::default());
        assert_eq!(one.num_states(), two.num_states());
        for s in 0..one.num_states() {
            assert_eq!(one.arcs_slice(s as StateId), two.arcs_slice(s as StateId));
        }
    }

    #[test]
    fn composed_matcher_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_input(&mut a);
        let mut b = ab_acceptor();
        arc_sort_input(&mut b);

        let filter = SequenceComposeFilter::new(
            SortedMatcher::new(&a, MatchType::MatchInput),
            SortedMatcher::new(&b, MatchType::MatchInput),
        );
        let cfst = ComposeFst::new_with_filter(filter, CacheOptions::default(), true);

        // Output matching is unavailable: both inner matchers index
        // inputs.
        assert!(cfst.init_matcher(MatchType::MatchOutput).is_none());

        let start = cfst.start();
        let expected: Vec<Arc<bool>> = cfst.arcs(start).collect();
        let mut matcher = cfst.init_matcher(MatchType::MatchInput).unwrap();
        matcher.set_state(start);

        assert!(matcher.find(1));
        let mut got = Vec::new();
        while !matcher.done() {
            got.push(matcher.value());
            matcher.next();
        }
        let want: Vec<Arc<bool>> = expected.iter().filter(|arc| arc.ilabel == 1).cloned().collect();
        assert_eq!(got, want);

        // The epsilon query admits just the implicit self-loop here.
        assert!(matcher.find(EPSILON_LABEL));
        let loop_arc = matcher.value();
        assert_eq!(loop_arc.nextstate, start);
        assert_eq!(loop_arc.olabel, EPSILON_LABEL);
        matcher.next();
        assert!(matcher.done());

        assert!(!matcher.find(9));
    }

    #[test]
    fn symbol_table_mismatch_test() {
        use crate::symt::SymbolTable;

        let mut a = load_bool(
            "
0\t1\t1\t1\ttrue
1\ttrue
",
        );
        let mut out_syms = SymbolTable::new("out");
        out_syms.add_symbol("x");
        a.set_output_symbols(Some(out_syms));

        let mut b = load_bool(
            "
0\t1\t1\t1\ttrue
1\ttrue
",
        );
        let mut in_syms = SymbolTable::new("in");
        in_syms.add_symbol("x");
        in_syms.add_symbol("y");
        b.set_input_symbols(Some(in_syms));

        let out = compose(&a, &b, &ComposeOptions::default());
        assert!(out.properties(ERROR, false) != 0);
        assert_eq!(out.num_states(), 0);

        let unchecked = compose(
            &a,
            &b,
            &ComposeOptions {
                compat_symbols: false,
                ..Default::default()
            },
        );
        assert_eq!(unchecked.properties(ERROR, false), 0);
        assert_eq!(count_paths(&unchecked), 1);
    }

    #[test]
    fn lazy_start_and_final_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_output(&mut a);
        let mut b = ab_acceptor();
        arc_sort_input(&mut b);

        let cfst = ComposeFst::new(&a, &b, CacheOptions::default());
        let start = cfst.start();
        assert_eq!(start, 0);
        assert!(cfst.final_weight(start).is_zero());
        let arcs: Vec<Arc<bool>> = cfst.arcs(start).collect();
        assert_eq!(arcs.len(), 1);
        let mid = arcs[0].nextstate;
        let arcs: Vec<Arc<bool>> = cfst.arcs(mid).collect();
        assert_eq!(arcs.len(), 1);
        let last = arcs[0].nextstate;
        assert!(cfst.final_weight(last));
        assert_eq!(cfst.num_arcs(last), 0);
    }

    #[test]
    fn connect_sets_connectivity_props_test() {
        let mut a = ab_ac_acceptor();
        arc_sort_output(&mut a);
        let mut b = ab_acceptor();
        arc_sort_input(&mut b);
        let out = compose(&a, &b, &ComposeOptions::default());
        assert_eq!(
            out.properties(ACCESSIBLE | COACCESSIBLE, false),
            ACCESSIBLE | COACCESSIBLE
        );
    }
}
