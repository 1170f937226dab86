//! In-place sorting of each state's arcs by label.
//!
//! Composition matches against one side of one machine by binary search,
//! so that side must be sorted first. The sort is stable and records the
//! resulting property bit.

use crate::properties::{
    I_LABEL_SORTED, NOT_I_LABEL_SORTED, NOT_O_LABEL_SORTED, O_LABEL_SORTED,
};
use crate::vector::VectorFst;
use crate::{ExpandedFst, MutableFst, Semiring, StateId};

/// Sorts every state's arcs by input label.
pub fn arc_sort_input<W: Semiring>(fst: &mut VectorFst<W>) {
    for s in 0..fst.num_states() {
        fst.arcs_vec_mut(s as StateId).sort_by_key(|a| a.ilabel);
    }
    fst.set_properties(
        I_LABEL_SORTED,
        I_LABEL_SORTED | NOT_I_LABEL_SORTED | O_LABEL_SORTED | NOT_O_LABEL_SORTED,
    );
}

/// Sorts every state's arcs by output label.
pub fn arc_sort_output<W: Semiring>(fst: &mut VectorFst<W>) {
    for s in 0..fst.num_states() {
        fst.arcs_vec_mut(s as StateId).sort_by_key(|a| a.olabel);
    }
    fst.set_properties(
        O_LABEL_SORTED,
        O_LABEL_SORTED | NOT_O_LABEL_SORTED | I_LABEL_SORTED | NOT_I_LABEL_SORTED,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fst, LoadTsv};

    #[test]
    fn arc_sort_test() {
        let mut fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t3\t1\ttrue
0\t1\t1\t3\ttrue
0\t1\t2\t2\ttrue
1\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();

        arc_sort_input(&mut fst);
        let ilabels: Vec<_> = fst.arcs_slice(0).iter().map(|a| a.ilabel).collect();
        assert_eq!(ilabels, vec![1, 2, 3]);
        assert!(fst.properties(I_LABEL_SORTED, false) != 0);

        arc_sort_output(&mut fst);
        let olabels: Vec<_> = fst.arcs_slice(0).iter().map(|a| a.olabel).collect();
        assert_eq!(olabels, vec![1, 2, 3]);
        assert!(fst.properties(O_LABEL_SORTED, false) != 0);
        assert_eq!(fst.properties(I_LABEL_SORTED, false), 0);
    }
}
