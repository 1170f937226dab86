//! Depth-first traversal with arc-classification callbacks.
//!
//! The traversal keeps its own stack rather than recursing, so machines
//! with very deep path structure do not overflow the native stack.

use crate::{Arc, ExpandedFst, Semiring, StateId, NO_STATE_ID};

/// Type for the node color-state used during the visit.
#[derive(Clone, Copy, PartialEq, Debug)]
enum NodeColor {
    White,
    Grey,
    Black,
}

/// Trait for structs defining `dfs_visit` callbacks.
///
/// A callback returning false aborts the remainder of the traversal;
/// `finish_visit` still runs.
pub trait DfsVisitor<W: Semiring> {
    /// Called when `s` is discovered; `root` is the root of its tree.
    fn init_state(&mut self, _s: StateId, _root: StateId) -> bool {
        true
    }

    fn tree_arc(&mut self, _s: StateId, _arc: &Arc<W>) -> bool {
        true
    }

    /// Target is on the current path.
    fn back_arc(&mut self, _s: StateId, _arc: &Arc<W>) -> bool {
        true
    }

    /// Target was already finished.
    fn forward_or_cross_arc(&mut self, _s: StateId, _arc: &Arc<W>) -> bool {
        true
    }

    /// Called when `s` is finished; `parent` is its tree parent or
    /// `NO_STATE_ID` at a root.
    fn finish_state(&mut self, _s: StateId, _parent: StateId) {}

    fn finish_visit(&mut self) {}
}

/// Traverses every state of the machine depth-first: the start's tree
/// first, then each remaining state as a fresh root in id order.
pub fn dfs_visit<'a, W, F, V>(fst: &'a F, visitor: &mut V)
where
    W: Semiring,
    F: ExpandedFst<W>,
    V: DfsVisitor<W>,
{
    let nstates = fst.num_states();
    let start = fst.start();
    if nstates == 0 || start == NO_STATE_ID {
        visitor.finish_visit();
        return;
    }

    let mut colors = vec![NodeColor::White; nstates];
    let mut stack: Vec<(StateId, Box<dyn Iterator<Item = Arc<W>> + 'a>)> = Vec::new();
    let mut scan = 0usize;
    let mut root = start;

    'roots: loop {
        colors[root as usize] = NodeColor::Grey;
        if !visitor.init_state(root, root) {
            break 'roots;
        }
        stack.push((root, fst.arcs(root)));

        while !stack.is_empty() {
            let s = stack.last().unwrap().0;
            let next_arc = stack.last_mut().unwrap().1.next();
            match next_arc {
                None => {
                    colors[s as usize] = NodeColor::Black;
                    stack.pop();
                    let parent = stack.last().map(|t| t.0).unwrap_or(NO_STATE_ID);
                    visitor.finish_state(s, parent);
                }
                Some(arc) => {
                    let t = arc.nextstate;
                    match colors[t as usize] {
                        NodeColor::White => {
                            if !visitor.tree_arc(s, &arc) {
                                break 'roots;
                            }
                            colors[t as usize] = NodeColor::Grey;
                            if !visitor.init_state(t, root) {
                                break 'roots;
                            }
                            stack.push((t, fst.arcs(t)));
                        }
                        NodeColor::Grey => {
                            if !visitor.back_arc(s, &arc) {
                                break 'roots;
                            }
                        }
                        NodeColor::Black => {
                            if !visitor.forward_or_cross_arc(s, &arc) {
                                break 'roots;
                            }
                        }
                    }
                }
            }
        }

        while scan < nstates && colors[scan] != NodeColor::White {
            scan += 1;
        }
        if scan == nstates {
            break;
        }
        root = scan as StateId;
    }

    visitor.finish_visit();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorFst;
    use crate::LoadTsv;

    struct EventLog {
        log: String,
    }

    impl DfsVisitor<bool> for EventLog {
        fn init_state(&mut self, s: StateId, root: StateId) -> bool {
            self.log.push_str(&format!("EN{},{}\n", s, root));
            true
        }
        fn tree_arc(&mut self, s: StateId, arc: &Arc<bool>) -> bool {
            self.log
                .push_str(&format!("VT{},{},{}\n", s, arc.nextstate, arc.ilabel));
            true
        }
        fn back_arc(&mut self, s: StateId, arc: &Arc<bool>) -> bool {
            self.log
                .push_str(&format!("VB{},{},{}\n", s, arc.nextstate, arc.ilabel));
            true
        }
        fn forward_or_cross_arc(&mut self, s: StateId, arc: &Arc<bool>) -> bool {
            self.log
                .push_str(&format!("VX{},{},{}\n", s, arc.nextstate, arc.ilabel));
            true
        }
        fn finish_state(&mut self, s: StateId, _parent: StateId) {
            self.log.push_str(&format!("EX{}\n", s));
        }
    }

    #[test]
    fn dfs_visit_test() {
        let fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
1\t2\t2\t2\ttrue
1\ttrue
2\t3\t3\t3\ttrue
3\t0\t4\t4\ttrue
3\t4\t9\t9\ttrue
5\t0\t9\t9\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();

        let mut visitor = EventLog { log: String::new() };
        dfs_visit(&fst, &mut visitor);
        assert_eq!(
            visitor.log.trim(),
            "
EN0,0
VT0,1,1
EN1,0
VT1,2,2
EN2,0
VT2,3,3
EN3,0
VB3,0,4
VT3,4,9
EN4,0
EX4
EX3
EX2
EX1
EX0
EN5,5
VX5,0,9
EX5
"
            .trim()
        );
    }

    #[test]
    fn dfs_abort_test() {
        struct StopAtBack {
            saw_back: bool,
            finishes: usize,
        }
        impl DfsVisitor<bool> for StopAtBack {
            fn back_arc(&mut self, _s: StateId, _arc: &Arc<bool>) -> bool {
                self.saw_back = true;
                false
            }
            fn finish_state(&mut self, _s: StateId, _parent: StateId) {
                self.finishes += 1;
            }
        }

        let fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
1\t0\t2\t2\ttrue
1\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let mut v = StopAtBack {
            saw_back: false,
            finishes: 0,
        };
        dfs_visit(&fst, &mut v);
        assert!(v.saw_back);
        assert_eq!(v.finishes, 0);
    }
}
