//! Expanded mutable machines backed by per-state arc vectors.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::{BufRead, BufReader, Read, Write};
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::properties::{self, compute_properties, known_props, pair_mask};
use crate::symt::SymbolTable;
use crate::{
    Arc, DumpTsv, ExpandedFst, Fst, LoadTsv, MutableFst, Semiring, StateId, TsvError, NO_STATE_ID,
};

/// A weighted machine with all states materialized in memory.
#[derive(Clone, Debug)]
pub struct VectorFst<W> {
    start: StateId,
    arcs: Vec<Vec<Arc<W>>>,
    finals: Vec<W>,
    props: Cell<u64>,
    isymbols: Option<SymbolTable>,
    osymbols: Option<SymbolTable>,
}

impl<W: Semiring> VectorFst<W> {
    /// Constructs a new empty machine.
    pub fn new() -> Self {
        VectorFst {
            start: NO_STATE_ID,
            arcs: Vec::new(),
            finals: Vec::new(),
            props: Cell::new(0),
            isymbols: None,
            osymbols: None,
        }
    }

    pub fn arcs_slice(&self, s: StateId) -> &[Arc<W>] {
        &self.arcs[s as usize]
    }

    pub(crate) fn arcs_vec_mut(&mut self, s: StateId) -> &mut Vec<Arc<W>> {
        self.props.set(self.props.get() & properties::ERROR);
        &mut self.arcs[s as usize]
    }

    /// Copies any machine into vector form, interning states in
    /// breadth-first discovery order so the result is densely numbered from
    /// the start state.
    pub fn from_fst<F: Fst<W>>(src: &F) -> Self {
        let mut ret = VectorFst::new();
        ret.isymbols = src.input_symbols().cloned();
        ret.osymbols = src.output_symbols().cloned();

        let copy_mask = properties::ERROR
            | properties::ACCEPTOR
            | properties::NOT_ACCEPTOR
            | properties::WEIGHTED
            | properties::UNWEIGHTED
            | properties::CYCLIC
            | properties::ACYCLIC
            | properties::INITIAL_CYCLIC
            | properties::INITIAL_ACYCLIC;
        let copied = src.properties(copy_mask, false);

        let start = src.start();
        if start != NO_STATE_ID {
            let mut statemap: FxHashMap<StateId, StateId> = FxHashMap::default();
            let mut queue = VecDeque::new();
            statemap.insert(start, ret.add_state());
            queue.push_back(start);
            while let Some(s) = queue.pop_front() {
                let ns = statemap[&s];
                ret.set_final(ns, src.final_weight(s));
                for arc in src.arcs(s) {
                    let nt = match statemap.get(&arc.nextstate) {
                        Some(&t) => t,
                        None => {
                            let t = ret.add_state();
                            statemap.insert(arc.nextstate, t);
                            queue.push_back(arc.nextstate);
                            t
                        }
                    };
                    ret.add_arc(ns, Arc::new(arc.ilabel, arc.olabel, arc.weight, nt));
                }
            }
            ret.set_start(statemap[&start]);
        }

        ret.props.set(copied);
        ret
    }

    /// Renumbers states so that state `s` becomes `order[s]`, rewriting arc
    /// targets and the start state. `order` must be a permutation.
    pub fn state_sort(&mut self, order: &[StateId]) {
        assert_eq!(order.len(), self.arcs.len());
        let n = self.arcs.len();
        let mut new_arcs: Vec<Vec<Arc<W>>> = (0..n).map(|_| Vec::new()).collect();
        let mut new_finals: Vec<W> = (0..n).map(|_| W::zero()).collect();
        for s in (0..n).rev() {
            let ns = order[s] as usize;
            new_finals[ns] = self.finals.pop().unwrap();
            new_arcs[ns] = self
                .arcs
                .pop()
                .unwrap()
                .into_iter()
                .map(|a| {
                    let t = order[a.nextstate as usize];
                    Arc::new(a.ilabel, a.olabel, a.weight, t)
                })
                .collect();
        }
        self.arcs = new_arcs;
        self.finals = new_finals;
        if self.start != NO_STATE_ID {
            self.start = order[self.start as usize];
        }
        self.props.set(self.props.get() & properties::ERROR);
    }
}

impl<W: Semiring> Default for VectorFst<W> {
    fn default() -> Self {
        VectorFst::new()
    }
}

impl<W: Semiring> Fst<W> for VectorFst<W> {
    fn start(&self) -> StateId {
        self.start
    }

    fn final_weight(&self, s: StateId) -> W {
        self.finals[s as usize].clone()
    }

    fn num_arcs(&self, s: StateId) -> usize {
        self.arcs[s as usize].len()
    }

    fn arcs<'a>(&'a self, s: StateId) -> Box<dyn Iterator<Item = Arc<W>> + 'a> {
        Box::new(self.arcs[s as usize].iter().cloned())
    }

    fn properties(&self, mask: u64, test: bool) -> u64 {
        if test {
            let unknown = pair_mask(mask) & !known_props(self.props.get());
            if unknown != 0 {
                let computed = compute_properties(self, unknown);
                self.props.set(self.props.get() | computed);
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

impl<W: Semiring> ExpandedFst<W> for VectorFst<W> {
    fn num_states(&self) -> usize {
        self.arcs.len()
    }
}

impl<W: Semiring> MutableFst<W> for VectorFst<W> {
    fn set_start(&mut self, s: StateId) {
        self.start = s;
        self.props.set(self.props.get() & properties::ERROR);
    }

    fn set_final(&mut self, s: StateId, weight: W) {
        self.finals[s as usize] = weight;
        self.props.set(self.props.get() & properties::ERROR);
    }

    fn add_state(&mut self) -> StateId {
        let n = self.arcs.len();
        self.arcs.push(Vec::new());
        self.finals.push(W::zero());
        self.props.set(self.props.get() & properties::ERROR);
        n as StateId
    }

    fn add_arc(&mut self, s: StateId, arc: Arc<W>) {
        self.arcs[s as usize].push(arc);
        self.props.set(self.props.get() & properties::ERROR);
    }

    fn delete_states(&mut self, states: &[StateId]) {
        let mut remove = vec![false; self.arcs.len()];
        for &s in states {
            remove[s as usize] = true;
        }

        // Map old ids to new ones, marking removed states with the
        // no-state sentinel.
        let mut newstates: Vec<StateId> = Vec::with_capacity(self.arcs.len());
        let mut newst: StateId = 0;
        for s in 0..self.arcs.len() {
            if remove[s] {
                newstates.push(NO_STATE_ID);
            } else {
                newstates.push(newst);
                newst += 1;
            }
        }

        let mut all_newarcs: Vec<Vec<Arc<W>>> = Vec::new();
        let mut new_finals: Vec<W> = Vec::new();
        for s in 0..self.arcs.len() {
            if remove[s] {
                continue;
            }
            new_finals.push(self.finals[s].clone());
            let newarcs = self.arcs[s]
                .iter()
                .filter_map(|a| {
                    let ns = newstates[a.nextstate as usize];
                    if ns == NO_STATE_ID {
                        None
                    } else {
                        Some(Arc::new(a.ilabel, a.olabel, a.weight.clone(), ns))
                    }
                })
                .collect();
            all_newarcs.push(newarcs);
        }
        self.arcs = all_newarcs;
        self.finals = new_finals;
        if self.start != NO_STATE_ID {
            self.start = newstates[self.start as usize];
        }
        self.props.set(self.props.get() & properties::ERROR);
    }

    fn set_properties(&mut self, props: u64, mask: u64) {
        self.props
            .set((self.props.get() & !mask) | (props & mask));
    }

    fn set_input_symbols(&mut self, symbols: Option<SymbolTable>) {
        self.isymbols = symbols;
    }

    fn set_output_symbols(&mut self, symbols: Option<SymbolTable>) {
        self.osymbols = symbols;
    }
}

impl<W: Semiring + Display> DumpTsv for VectorFst<W> {
    fn dump_tsv<Wr: Write>(&self, dest: &mut Wr) -> std::io::Result<()> {
        for s in 0..self.arcs.len() {
            let fw = &self.finals[s];
            if !fw.is_zero() {
                writeln!(dest, "{}\t{}", s, fw)?;
            }
            for arc in &self.arcs[s] {
                writeln!(
                    dest,
                    "{}\t{}\t{}\t{}\t{}",
                    s, arc.nextstate, arc.ilabel, arc.olabel, arc.weight
                )?;
            }
        }
        Ok(())
    }
}

impl<W: Semiring + FromStr> LoadTsv for VectorFst<W> {
    fn load_tsv<R: Read>(src: R) -> Result<Self, TsvError> {
        let mut ret = VectorFst::new();
        let reader = BufReader::new(src);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let vals: Vec<&str> = line.split_whitespace().collect();
            let parse_state = |v: &str| -> Result<StateId, TsvError> {
                v.parse().map_err(|_| TsvError::Parse(lineno + 1))
            };
            let parse_weight = |v: &str| -> Result<W, TsvError> {
                v.parse().map_err(|_| TsvError::Parse(lineno + 1))
            };
            match vals.len() {
                2 => {
                    let s = parse_state(vals[0])?;
                    let w = parse_weight(vals[1])?;
                    while ret.num_states() <= s as usize {
                        ret.add_state();
                    }
                    ret.set_final(s, w);
                }
                5 => {
                    let s = parse_state(vals[0])?;
                    let t = parse_state(vals[1])?;
                    let il = vals[2].parse().map_err(|_| TsvError::Parse(lineno + 1))?;
                    let ol = vals[3].parse().map_err(|_| TsvError::Parse(lineno + 1))?;
                    let w = parse_weight(vals[4])?;
                    let max_st = s.max(t);
                    while ret.num_states() <= max_st as usize {
                        ret.add_state();
                    }
                    ret.add_arc(s, Arc::new(il, ol, w, t));
                }
                n => return Err(TsvError::FieldCount(lineno + 1, n)),
            }
        }
        if ret.num_states() > 0 {
            ret.set_start(0);
        }
        Ok(ret)
    }
}

#[test]
fn load_dump_roundtrip_test() {
    let src = "
0\t1\t1\t2\ttrue
0\t2\t1\t3\ttrue
1\t1\t3\t4\ttrue
1\ttrue
2\ttrue
"
    .trim();
    let fst = VectorFst::<bool>::load_tsv(src.as_bytes()).unwrap();
    assert_eq!(fst.start(), 0);
    assert_eq!(fst.num_states(), 3);
    assert_eq!(fst.num_arcs(0), 2);
    assert!(fst.final_weight(1));
    assert!(!fst.final_weight(0));

    let mut buf = Vec::new();
    fst.dump_tsv(&mut buf).unwrap();
    let dumped = String::from_utf8(buf).unwrap();
    assert_eq!(dumped.trim(), src);
}

#[test]
fn delete_states_test() {
    let mut fst = VectorFst::<bool>::load_tsv(
        "
0\t5\t1\t1\ttrue
5\t2\t2\t2\ttrue
5\ttrue
2\t3\t3\t3\ttrue
3\t0\t4\t4\ttrue
3\t4\t9\t9\ttrue
1\t0\t9\t9\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();

    fst.delete_states(&[1, 4, 5]);
    assert_eq!(fst.num_states(), 3);
    assert_eq!(fst.start(), 0);
    // State 5 was removed, so the start state keeps no outgoing arcs.
    assert_eq!(fst.num_arcs(0), 0);
    // Old state 2 is now state 1 and its arc into old state 3 survives.
    assert_eq!(fst.num_arcs(1), 1);
    assert_eq!(fst.arcs_slice(1)[0].nextstate, 2);
}

#[test]
fn from_fst_interns_reachable_test() {
    let fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t1\t1\ttrue
1\t2\t2\t2\ttrue
2\ttrue
3\t0\t7\t7\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();
    let copy = VectorFst::from_fst(&fst);
    // State 3 is unreachable from the start and is not copied.
    assert_eq!(copy.num_states(), 3);
    assert_eq!(copy.start(), 0);
    assert!(copy.final_weight(2));
}

#[test]
fn properties_compute_test() {
    use crate::properties::*;
    let fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t2\t2\ttrue
0\t1\t1\t1\ttrue
1\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();
    assert_eq!(fst.properties(I_LABEL_SORTED, false), 0);
    let p = fst.properties(I_LABEL_SORTED | ACCEPTOR | CYCLIC, true);
    assert_eq!(p & I_LABEL_SORTED, 0);
    assert!(fst.properties(NOT_I_LABEL_SORTED, false) != 0);
    assert!(p & ACCEPTOR != 0);
    assert_eq!(p & CYCLIC, 0);
    assert!(fst.properties(ACYCLIC, false) != 0);
}

#[test]
fn state_sort_test() {
    let mut fst = VectorFst::<bool>::load_tsv(
        "
0\t1\t1\t1\ttrue
1\ttrue
"
        .trim()
        .as_bytes(),
    )
    .unwrap();
    fst.state_sort(&[1, 0]);
    assert_eq!(fst.start(), 1);
    assert!(fst.final_weight(0));
    assert_eq!(fst.arcs_slice(1)[0].nextstate, 0);
}
