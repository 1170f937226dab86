//! Topological sorting of acyclic machines.

use crate::dfs::{dfs_visit, DfsVisitor};
use crate::properties::{
    ACYCLIC, CYCLIC, INITIAL_ACYCLIC, INITIAL_CYCLIC, NOT_TOP_SORTED, TOP_SORTED,
};
use crate::vector::VectorFst;
use crate::{Arc, MutableFst, Semiring, StateId, NO_STATE_ID};

/// Visitor collecting states in finishing-time order; a back arc marks
/// the machine cyclic and aborts the traversal.
pub struct TopOrderVisitor {
    pub order: Vec<StateId>,
    pub acyclic: bool,
    finish: Vec<StateId>,
}

impl TopOrderVisitor {
    pub fn new() -> Self {
        TopOrderVisitor {
            order: Vec::new(),
            acyclic: true,
            finish: Vec::new(),
        }
    }
}

impl Default for TopOrderVisitor {
    fn default() -> Self {
        TopOrderVisitor::new()
    }
}

impl<W: Semiring> DfsVisitor<W> for TopOrderVisitor {
    fn back_arc(&mut self, _s: StateId, _arc: &Arc<W>) -> bool {
        self.acyclic = false;
        false
    }

    fn finish_state(&mut self, s: StateId, _parent: StateId) {
        self.finish.push(s);
    }

    fn finish_visit(&mut self) {
        if self.acyclic {
            self.order = vec![NO_STATE_ID; self.finish.len()];
            for i in 0..self.finish.len() {
                self.order[self.finish[self.finish.len() - i - 1] as usize] = i as StateId;
            }
        }
        self.finish.clear();
    }
}

/// Topologically sorts the machine in place if it is acyclic, so that
/// every arc goes from a smaller to a larger state id; a cyclic machine
/// is left unchanged. Returns whether the machine was acyclic.
pub fn top_sort<W: Semiring>(fst: &mut VectorFst<W>) -> bool {
    let mut visitor = TopOrderVisitor::new();
    dfs_visit(&*fst, &mut visitor);
    if visitor.acyclic {
        fst.state_sort(&visitor.order);
        fst.set_properties(
            ACYCLIC | INITIAL_ACYCLIC | TOP_SORTED,
            ACYCLIC | CYCLIC | INITIAL_ACYCLIC | INITIAL_CYCLIC | TOP_SORTED | NOT_TOP_SORTED,
        );
    } else {
        fst.set_properties(
            CYCLIC | NOT_TOP_SORTED,
            CYCLIC | ACYCLIC | TOP_SORTED | NOT_TOP_SORTED,
        );
    }
    visitor.acyclic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DumpTsv, ExpandedFst, Fst, LoadTsv};

    #[test]
    fn top_sort_orders_arcs_test() {
        let mut fst = VectorFst::<bool>::load_tsv(
            "
0\t2\t1\t1\ttrue
2\t1\t2\t2\ttrue
1\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        assert!(top_sort(&mut fst));
        assert_eq!(fst.start(), 0);
        for s in 0..fst.num_states() {
            for arc in fst.arcs_slice(s as StateId) {
                assert!(arc.nextstate > s as StateId);
            }
        }
        assert!(fst.properties(TOP_SORTED, false) != 0);

        // A second application is a no-op.
        let mut buf1 = Vec::new();
        fst.dump_tsv(&mut buf1).unwrap();
        assert!(top_sort(&mut fst));
        let mut buf2 = Vec::new();
        fst.dump_tsv(&mut buf2).unwrap();
        assert_eq!(buf1, buf2);
    }

    #[test]
    fn top_sort_detects_cycle_test() {
        let src = "
0\ttrue
0\t0\t1\t1\ttrue
";
        let mut fst = VectorFst::<bool>::load_tsv(src.trim().as_bytes()).unwrap();
        assert!(!top_sort(&mut fst));
        assert_eq!(
            fst.properties(CYCLIC | NOT_TOP_SORTED, false),
            CYCLIC | NOT_TOP_SORTED
        );
        let mut buf = Vec::new();
        fst.dump_tsv(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().trim(), src.trim());
    }
}
