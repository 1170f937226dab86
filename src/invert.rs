//! Inversion: swap the input and output sides of every arc.

use crate::properties::{
    I_LABEL_SORTED, NOT_I_LABEL_SORTED, NOT_O_LABEL_SORTED, O_LABEL_SORTED,
};
use crate::vector::VectorFst;
use crate::{ExpandedFst, Fst, MutableFst, Semiring, StateId};

/// Swaps input and output labels on every arc, and the symbol tables with
/// them, turning a transducer for `x -> y` into one for `y -> x`.
pub fn invert<W: Semiring>(fst: &mut VectorFst<W>) {
    let sorted = fst.properties(
        I_LABEL_SORTED | NOT_I_LABEL_SORTED | O_LABEL_SORTED | NOT_O_LABEL_SORTED,
        false,
    );
    for s in 0..fst.num_states() {
        for arc in fst.arcs_vec_mut(s as StateId) {
            std::mem::swap(&mut arc.ilabel, &mut arc.olabel);
        }
    }
    let isymbols = fst.input_symbols().cloned();
    let osymbols = fst.output_symbols().cloned();
    fst.set_input_symbols(osymbols);
    fst.set_output_symbols(isymbols);

    // Sortedness moves across with the labels.
    let mut swapped = 0;
    if sorted & I_LABEL_SORTED != 0 {
        swapped |= O_LABEL_SORTED;
    }
    if sorted & NOT_I_LABEL_SORTED != 0 {
        swapped |= NOT_O_LABEL_SORTED;
    }
    if sorted & O_LABEL_SORTED != 0 {
        swapped |= I_LABEL_SORTED;
    }
    if sorted & NOT_O_LABEL_SORTED != 0 {
        swapped |= NOT_I_LABEL_SORTED;
    }
    fst.set_properties(
        swapped,
        I_LABEL_SORTED | NOT_I_LABEL_SORTED | O_LABEL_SORTED | NOT_O_LABEL_SORTED,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arcsort::arc_sort_output;
    use crate::symt::SymbolTable;
    use crate::LoadTsv;

    #[test]
    fn invert_test() {
        let mut fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t5\ttrue
1\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let mut syms = SymbolTable::new("in");
        syms.add_symbol("<eps>");
        fst.set_input_symbols(Some(syms));

        arc_sort_output(&mut fst);
        invert(&mut fst);

        let arc = &fst.arcs_slice(0)[0];
        assert_eq!(arc.ilabel, 5);
        assert_eq!(arc.olabel, 1);
        assert!(fst.input_symbols().is_none());
        assert_eq!(fst.output_symbols().unwrap().name(), "in");
        assert!(fst.properties(I_LABEL_SORTED, false) != 0);
    }
}
