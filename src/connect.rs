//! Removal of states that lie on no successful path, via Tarjan's
//! single-pass strongly-connected-components algorithm.

use crate::dfs::{dfs_visit, DfsVisitor};
use crate::properties::{
    ACCESSIBLE, ACYCLIC, COACCESSIBLE, CYCLIC, INITIAL_ACYCLIC, INITIAL_CYCLIC, NOT_ACCESSIBLE,
    NOT_COACCESSIBLE,
};
use crate::vector::VectorFst;
use crate::{Arc, ExpandedFst, Fst, MutableFst, Semiring, StateId, NO_STATE_ID};

/**
 * Visitor computing strongly-connected components, accessibility and
 * coaccessibility in one depth-first pass.
 *
 * After the visit, `scc[s]` numbers components in reverse discovery
 * order, which is a topological order on the condensation when the input
 * is acyclic. `props` accumulates the cyclicity and connectivity bits.
 */
pub struct SccVisitor<'a, F> {
    fst: &'a F,
    pub scc: Vec<StateId>,
    pub access: Vec<bool>,
    pub coaccess: Vec<bool>,
    pub props: u64,
    start: StateId,
    nstates: StateId,
    nscc: StateId,
    dfnumber: Vec<StateId>,
    lowlink: Vec<StateId>,
    onstack: Vec<bool>,
    scc_stack: Vec<StateId>,
}

impl<'a, F> SccVisitor<'a, F> {
    pub fn new<W: Semiring>(fst: &'a F) -> Self
    where
        F: Fst<W>,
    {
        SccVisitor {
            fst,
            scc: Vec::new(),
            access: Vec::new(),
            coaccess: Vec::new(),
            props: ACYCLIC | INITIAL_ACYCLIC | ACCESSIBLE | COACCESSIBLE,
            start: fst.start(),
            nstates: 0,
            nscc: 0,
            dfnumber: Vec::new(),
            lowlink: Vec::new(),
            onstack: Vec::new(),
            scc_stack: Vec::new(),
        }
    }

    fn ensure(&mut self, s: StateId) {
        while self.dfnumber.len() <= s as usize {
            self.scc.push(-1);
            self.access.push(false);
            self.coaccess.push(false);
            self.dfnumber.push(-1);
            self.lowlink.push(-1);
            self.onstack.push(false);
        }
    }
}

impl<'a, W: Semiring, F: Fst<W>> DfsVisitor<W> for SccVisitor<'a, F> {
    fn init_state(&mut self, s: StateId, root: StateId) -> bool {
        self.ensure(s);
        self.scc_stack.push(s);
        self.dfnumber[s as usize] = self.nstates;
        self.lowlink[s as usize] = self.nstates;
        self.onstack[s as usize] = true;
        if root == self.start {
            self.access[s as usize] = true;
        } else {
            self.access[s as usize] = false;
            self.props |= NOT_ACCESSIBLE;
            self.props &= !ACCESSIBLE;
        }
        self.nstates += 1;
        true
    }

    fn back_arc(&mut self, s: StateId, arc: &Arc<W>) -> bool {
        let t = arc.nextstate;
        if self.dfnumber[t as usize] < self.lowlink[s as usize] {
            self.lowlink[s as usize] = self.dfnumber[t as usize];
        }
        if self.coaccess[t as usize] {
            self.coaccess[s as usize] = true;
        }
        self.props |= CYCLIC;
        self.props &= !ACYCLIC;
        if t == self.start {
            self.props |= INITIAL_CYCLIC;
            self.props &= !INITIAL_ACYCLIC;
        }
        true
    }

    fn forward_or_cross_arc(&mut self, s: StateId, arc: &Arc<W>) -> bool {
        let t = arc.nextstate;
        if self.dfnumber[t as usize] < self.dfnumber[s as usize]
            && self.onstack[t as usize]
            && self.dfnumber[t as usize] < self.lowlink[s as usize]
        {
            self.lowlink[s as usize] = self.dfnumber[t as usize];
        }
        if self.coaccess[t as usize] {
            self.coaccess[s as usize] = true;
        }
        true
    }

    fn finish_state(&mut self, s: StateId, parent: StateId) {
        if !self.fst.final_weight(s).is_zero() {
            self.coaccess[s as usize] = true;
        }
        if self.dfnumber[s as usize] == self.lowlink[s as usize] {
            // Root of a new component: check it for coaccessibility, then
            // pop it off the stack in one pass.
            let mut scc_coaccess = false;
            let mut i = self.scc_stack.len();
            loop {
                i -= 1;
                let t = self.scc_stack[i];
                if self.coaccess[t as usize] {
                    scc_coaccess = true;
                }
                if t == s {
                    break;
                }
            }
            loop {
                let t = *self.scc_stack.last().unwrap();
                self.scc[t as usize] = self.nscc;
                if scc_coaccess {
                    self.coaccess[t as usize] = true;
                }
                self.onstack[t as usize] = false;
                self.scc_stack.pop();
                if t == s {
                    break;
                }
            }
            if !scc_coaccess {
                self.props |= NOT_COACCESSIBLE;
                self.props &= !COACCESSIBLE;
            }
            self.nscc += 1;
        }
        if parent != NO_STATE_ID {
            if self.coaccess[s as usize] {
                self.coaccess[parent as usize] = true;
            }
            if self.lowlink[s as usize] < self.lowlink[parent as usize] {
                self.lowlink[parent as usize] = self.lowlink[s as usize];
            }
        }
    }

    fn finish_visit(&mut self) {
        // Renumber so components come out in topological order when the
        // input is acyclic.
        for c in self.scc.iter_mut() {
            *c = self.nscc - 1 - *c;
        }
    }
}

/**
 * Deletes all states that are not both accessible and coaccessible.
 */
pub fn connect<W, F>(fst: &mut F)
where
    W: Semiring,
    F: MutableFst<W> + ExpandedFst<W>,
{
    let (access, coaccess) = {
        let mut visitor = SccVisitor::new(&*fst);
        dfs_visit(&*fst, &mut visitor);
        (visitor.access, visitor.coaccess)
    };
    let mut dstates = Vec::new();
    for s in 0..access.len() {
        if !access[s] || !coaccess[s] {
            dstates.push(s as StateId);
        }
    }
    fst.delete_states(&dstates);
    fst.set_properties(
        ACCESSIBLE | COACCESSIBLE,
        ACCESSIBLE | NOT_ACCESSIBLE | COACCESSIBLE | NOT_COACCESSIBLE,
    );
}

/**
 * Builds an acyclic machine with one state per component of the input,
 * keeping arcs between distinct components and dropping the rest. Also
 * returns the state-to-component mapping.
 */
pub fn condense<W, F>(ifst: &F) -> (VectorFst<W>, Vec<StateId>)
where
    W: Semiring,
    F: ExpandedFst<W>,
{
    let scc = {
        let mut visitor = SccVisitor::new(ifst);
        dfs_visit(ifst, &mut visitor);
        visitor.scc
    };
    let mut ofst: VectorFst<W> = VectorFst::new();
    for s in 0..scc.len() {
        let c = scc[s];
        while ofst.num_states() as StateId <= c {
            ofst.add_state();
        }
        if s as StateId == ifst.start() {
            ofst.set_start(c);
        }
        let fw = ifst.final_weight(s as StateId);
        if !fw.is_zero() {
            let cur = ofst.final_weight(c);
            ofst.set_final(c, cur.plus(&fw));
        }
        for arc in ifst.arcs(s as StateId) {
            let nextc = scc[arc.nextstate as usize];
            if nextc != c {
                while ofst.num_states() as StateId <= nextc {
                    ofst.add_state();
                }
                ofst.add_arc(c, Arc::new(arc.ilabel, arc.olabel, arc.weight, nextc));
            }
        }
    }
    ofst.set_properties(
        ACYCLIC | INITIAL_ACYCLIC,
        ACYCLIC | CYCLIC | INITIAL_ACYCLIC | INITIAL_CYCLIC,
    );
    (ofst, scc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DumpTsv, LoadTsv};

    #[test]
    fn scc_visitor_test() {
        // One two-state cycle feeding a final tail state.
        let fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
1\t0\t2\t2\ttrue
1\t2\t3\t3\ttrue
2\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let mut visitor = SccVisitor::new(&fst);
        dfs_visit(&fst, &mut visitor);
        assert_eq!(visitor.scc, vec![0, 0, 1]);
        assert_eq!(visitor.access, vec![true, true, true]);
        assert_eq!(visitor.coaccess, vec![true, true, true]);
        assert!(visitor.props & CYCLIC != 0);
        assert!(visitor.props & INITIAL_CYCLIC != 0);
    }

    #[test]
    fn connect_test() {
        // State 2 is unreachable from the start; state 3 reaches no final.
        let mut fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
0\t3\t2\t2\ttrue
1\ttrue
2\t1\t5\t5\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();

        connect(&mut fst);

        let mut buf = Vec::new();
        fst.dump_tsv(&mut buf).unwrap();
        let dumped = String::from_utf8(buf).unwrap();
        assert_eq!(
            dumped.trim(),
            "
0\t1\t1\t1\ttrue
1\ttrue
"
            .trim()
        );
        assert!(fst.properties(ACCESSIBLE | COACCESSIBLE, false) == ACCESSIBLE | COACCESSIBLE);
    }

    #[test]
    fn connect_idempotent_test() {
        let src = "
0\t1\t1\t1\ttrue
0\t2\t2\t2\ttrue
1\ttrue
3\t1\t4\t4\ttrue
";
        let mut once = VectorFst::<bool>::load_tsv(src.trim().as_bytes()).unwrap();
        connect(&mut once);
        let mut twice = VectorFst::<bool>::load_tsv(src.trim().as_bytes()).unwrap();
        connect(&mut twice);
        connect(&mut twice);

        let mut buf1 = Vec::new();
        once.dump_tsv(&mut buf1).unwrap();
        let mut buf2 = Vec::new();
        twice.dump_tsv(&mut buf2).unwrap();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn condense_test() {
        let fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
1\t0\t2\t2\ttrue
1\t2\t3\t3\ttrue
2\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let (condensed, scc) = condense(&fst);
        assert_eq!(scc, vec![0, 0, 1]);
        assert_eq!(condensed.num_states(), 2);
        assert_eq!(condensed.start(), 0);
        assert!(condensed.final_weight(1));
        // The in-component arcs are gone; one arc crosses into the tail.
        assert_eq!(condensed.num_arcs(0), 1);
        assert_eq!(condensed.arcs_slice(0)[0].nextstate, 1);
        assert!(condensed.properties(ACYCLIC, false) != 0);
    }
}
