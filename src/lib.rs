//! Weighted finite-state transducers with delayed composition.
//!
//! A transducer maps input strings to output strings with a weight drawn
//! from a semiring. The crate provides the FST data model over any
//! [`Semiring`], a lazy composition engine built from matchers, composition
//! filters and a state-tuple table, and the graph passes (connect, SCC,
//! topological sort) that turn a lazy result into a usable machine.

pub mod arcsort;
pub mod cache;
pub mod compose;
pub mod connect;
pub mod dfs;
pub mod filter;
pub mod invert;
pub mod matcher;
pub mod properties;
pub mod shortestdistance;
pub mod statetable;
pub mod symt;
pub mod topsort;
pub mod vector;

use std::fmt::{self, Debug, Display};
use std::io;
use std::str::FromStr;

use num_traits::Float;
use thiserror::Error;

use crate::symt::SymbolTable;

/// Alias for `i32` when it is used as a state id.
pub type StateId = i32;

/// Alias for `i32` when it is used as an arc label.
pub type Label = i32;

/// Sentinel for "no state".
pub const NO_STATE_ID: StateId = -1;

/// Sentinel for "no label"; never a real arc label.
pub const NO_LABEL: Label = -1;

/// The epsilon label, consuming no symbol on its side.
pub const EPSILON_LABEL: Label = 0;

// Algebraic properties a semiring declares through `Semiring::properties`.
pub const LEFT_SEMIRING: u64 = 0x01;
pub const RIGHT_SEMIRING: u64 = 0x02;
pub const COMMUTATIVE: u64 = 0x04;
pub const IDEMPOTENT: u64 = 0x08;
pub const PATH: u64 = 0x10;

/// Trait for weights in state machines.
///
/// A semiring supplies plus and times with their identities. Operations that
/// sum over paths additionally consult the declared algebraic properties;
/// composition for instance refuses weighted inputs over a non-commutative
/// semiring.
pub trait Semiring: Clone + PartialEq + Debug {
    fn plus(&self, rhs: &Self) -> Self;
    fn times(&self, rhs: &Self) -> Self;
    fn zero() -> Self;
    fn one() -> Self;

    /// Bitset of `LEFT_SEMIRING`, `RIGHT_SEMIRING`, `COMMUTATIVE`,
    /// `IDEMPOTENT` and `PATH`.
    fn properties() -> u64;

    /// Equality modulo `delta` for approximate fixpoints.
    fn approx_eq(&self, rhs: &Self, _delta: f32) -> bool {
        self == rhs
    }

    fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

/// Alias for `bool` when it is used as the Boolean semiring.
pub type BoolWeight = bool;

impl Semiring for bool {
    fn plus(&self, rhs: &Self) -> Self {
        self | rhs
    }
    fn times(&self, rhs: &Self) -> Self {
        self & rhs
    }
    fn zero() -> Self {
        false
    }
    fn one() -> Self {
        true
    }
    fn properties() -> u64 {
        LEFT_SEMIRING | RIGHT_SEMIRING | COMMUTATIVE | IDEMPOTENT | PATH
    }
}

/// The tropical semiring: min for plus, addition for times.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub struct Tropical<T>(pub T);

impl<T: Float> Tropical<T> {
    pub fn new(value: T) -> Self {
        Tropical(value)
    }

    pub fn value(&self) -> T {
        self.0
    }
}

impl<T: Float + Debug> Semiring for Tropical<T> {
    fn plus(&self, rhs: &Self) -> Self {
        Tropical(T::min(self.0, rhs.0))
    }
    fn times(&self, rhs: &Self) -> Self {
        Tropical(self.0 + rhs.0)
    }
    fn zero() -> Self {
        Tropical(T::infinity())
    }
    fn one() -> Self {
        Tropical(T::zero())
    }
    fn properties() -> u64 {
        LEFT_SEMIRING | RIGHT_SEMIRING | COMMUTATIVE | IDEMPOTENT | PATH
    }
    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        if self.0 == rhs.0 {
            return true;
        }
        match T::from(delta) {
            Some(d) => (self.0 - rhs.0).abs() <= d,
            None => false,
        }
    }
}

impl<T: Display> Display for Tropical<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Float + FromStr> FromStr for Tropical<T> {
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        T::from_str(s).map(Tropical)
    }
}

/// The log semiring: -log(e^-x + e^-y) for plus, addition for times.
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug)]
pub struct Log<T>(pub T);

impl<T: Float> Log<T> {
    pub fn new(value: T) -> Self {
        Log(value)
    }

    pub fn value(&self) -> T {
        self.0
    }
}

impl<T: Float + Debug> Semiring for Log<T> {
    fn plus(&self, rhs: &Self) -> Self {
        if self.0 == T::infinity() {
            *rhs
        } else if rhs.0 == T::infinity() {
            *self
        } else {
            let (lo, hi) = if self.0 < rhs.0 {
                (self.0, rhs.0)
            } else {
                (rhs.0, self.0)
            };
            Log(lo - (-(hi - lo)).exp().ln_1p())
        }
    }
    fn times(&self, rhs: &Self) -> Self {
        Log(self.0 + rhs.0)
    }
    fn zero() -> Self {
        Log(T::infinity())
    }
    fn one() -> Self {
        Log(T::zero())
    }
    fn properties() -> u64 {
        LEFT_SEMIRING | RIGHT_SEMIRING | COMMUTATIVE
    }
    fn approx_eq(&self, rhs: &Self, delta: f32) -> bool {
        if self.0 == rhs.0 {
            return true;
        }
        match T::from(delta) {
            Some(d) => (self.0 - rhs.0).abs() <= d,
            None => false,
        }
    }
}

impl<T: Display> Display for Log<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<T: Float + FromStr> FromStr for Log<T> {
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        T::from_str(s).map(Log)
    }
}

/// A transition: input label, output label, weight and target state.
///
/// Arcs are immutable by convention; operations that need to change a field
/// build an updated copy.
#[derive(Clone, PartialEq, Debug)]
pub struct Arc<W> {
    pub ilabel: Label,
    pub olabel: Label,
    pub weight: W,
    pub nextstate: StateId,
}

impl<W> Arc<W> {
    pub fn new(ilabel: Label, olabel: Label, weight: W, nextstate: StateId) -> Self {
        Arc {
            ilabel,
            olabel,
            weight,
            nextstate,
        }
    }
}

/// Generic base trait for weighted automata.
///
/// An implementation may hold its states in memory or compute them on
/// access; both present the same interface. A state id returned once keeps
/// its arc set and final weight for the lifetime of the machine.
pub trait Fst<W: Semiring> {
    /// The initial state, or `NO_STATE_ID` for the empty machine.
    fn start(&self) -> StateId;

    /// The final weight of `s`; `W::zero()` means non-final.
    fn final_weight(&self, s: StateId) -> W;

    fn num_arcs(&self, s: StateId) -> usize;

    /// Single-pass iterator over the arcs leaving `s`. Obtain a fresh
    /// iterator to restart.
    fn arcs<'a>(&'a self, s: StateId) -> Box<dyn Iterator<Item = Arc<W>> + 'a>;

    /// Returns the property bits in `mask` that are known. With `test` set,
    /// unknown bits are computed first where the representation allows it.
    fn properties(&self, mask: u64, test: bool) -> u64;

    fn input_symbols(&self) -> Option<&SymbolTable> {
        None
    }

    fn output_symbols(&self) -> Option<&SymbolTable> {
        None
    }

    fn num_input_epsilons(&self, s: StateId) -> usize {
        self.arcs(s).filter(|a| a.ilabel == EPSILON_LABEL).count()
    }

    fn num_output_epsilons(&self, s: StateId) -> usize {
        self.arcs(s).filter(|a| a.olabel == EPSILON_LABEL).count()
    }
}

/// Trait for machines whose full state set is materialized.
pub trait ExpandedFst<W: Semiring>: Fst<W> {
    fn num_states(&self) -> usize;
}

/// Trait for machines stored in a modifiable representation.
pub trait MutableFst<W: Semiring>: Fst<W> {
    fn set_start(&mut self, s: StateId);
    fn set_final(&mut self, s: StateId, weight: W);
    fn add_state(&mut self) -> StateId;
    fn add_arc(&mut self, s: StateId, arc: Arc<W>);

    /// Removes the listed states, renumbering the remainder densely and
    /// dropping arcs into removed states.
    fn delete_states(&mut self, states: &[StateId]);

    fn set_properties(&mut self, props: u64, mask: u64);
    fn set_input_symbols(&mut self, symbols: Option<SymbolTable>);
    fn set_output_symbols(&mut self, symbols: Option<SymbolTable>);
}

/// Trait for dumping a machine as tab-separated text, one arc per line.
pub trait DumpTsv {
    fn dump_tsv<Wr: io::Write>(&self, dest: &mut Wr) -> io::Result<()>;
}

/// Trait for loading a machine from tab-separated text.
///
/// Arc lines have five fields `src dst ilabel olabel weight`; final-state
/// lines have two fields `state weight`. State 0 is the start.
pub trait LoadTsv: Sized {
    fn load_tsv<R: io::Read>(src: R) -> Result<Self, TsvError>;
}

#[derive(Debug, Error)]
pub enum TsvError {
    #[error("read error: {0}")]
    Io(#[from] io::Error),
    #[error("line {0}: expected 2 or 5 fields, found {1}")]
    FieldCount(usize, usize),
    #[error("line {0}: unparsable field")]
    Parse(usize),
}

#[test]
fn tropical_semiring_test() {
    let a = Tropical::new(0.5f32);
    let b = Tropical::new(0.25f32);
    assert_eq!(a.plus(&b), b);
    assert_eq!(a.times(&b), Tropical::new(0.75));
    assert_eq!(a.times(&Tropical::one()), a);
    assert!(a.times(&Tropical::zero()).is_zero());
    assert!(Tropical::<f32>::properties() & COMMUTATIVE != 0);
}

#[test]
fn log_semiring_test() {
    let a = Log::new(0.0f64);
    let sum = a.plus(&a);
    assert!(sum.approx_eq(&Log::new(-(2.0f64.ln())), 1e-9));
    assert_eq!(a.plus(&Log::zero()), a);
    assert!(Log::<f64>::properties() & IDEMPOTENT == 0);
}

#[test]
fn bool_semiring_test() {
    assert_eq!(true.plus(&false), true);
    assert_eq!(true.times(&false), false);
    assert_eq!(BoolWeight::zero(), false);
    assert_eq!(BoolWeight::one(), true);
}
