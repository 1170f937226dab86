//! Single-source shortest distance over the semiring.

use std::collections::VecDeque;

use crate::{ExpandedFst, Semiring, StateId, NO_STATE_ID};

#[derive(Clone, Copy, Debug)]
pub struct ShortestDistanceOptions {
    /// Convergence threshold for the approximate fixpoint.
    pub delta: f32,
}

impl Default for ShortestDistanceOptions {
    fn default() -> Self {
        ShortestDistanceOptions {
            delta: 1.0 / 1024.0,
        }
    }
}

/// Computes, for every state, the plus-sum over all paths from the start
/// of the times-product of arc weights along the path. Worklist
/// relaxation with residual weights; converges for acyclic machines and
/// for cyclic ones whose cycle weights approximately vanish under
/// repeated plus.
pub fn shortest_distance<W, F>(fst: &F, opts: &ShortestDistanceOptions) -> Vec<W>
where
    W: Semiring,
    F: ExpandedFst<W>,
{
    let n = fst.num_states();
    let mut distance = vec![W::zero(); n];
    let mut rdistance = vec![W::zero(); n];
    let mut enqueued = vec![false; n];
    let start = fst.start();
    if start == NO_STATE_ID {
        return distance;
    }

    distance[start as usize] = W::one();
    rdistance[start as usize] = W::one();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    enqueued[start as usize] = true;

    while let Some(s) = queue.pop_front() {
        enqueued[s as usize] = false;
        let r = rdistance[s as usize].clone();
        rdistance[s as usize] = W::zero();
        for arc in fst.arcs(s) {
            let t = arc.nextstate as usize;
            let w = r.times(&arc.weight);
            let nd = distance[t].plus(&w);
            if !distance[t].approx_eq(&nd, opts.delta) {
                distance[t] = nd;
                rdistance[t] = rdistance[t].plus(&w);
                if !enqueued[t] {
                    queue.push_back(arc.nextstate);
                    enqueued[t] = true;
                }
            }
        }
    }

    distance
}

/// The plus-sum of full successful path weights: distances into final
/// states, multiplied by their final weights.
pub fn total_weight<W, F>(fst: &F, opts: &ShortestDistanceOptions) -> W
where
    W: Semiring,
    F: ExpandedFst<W>,
{
    let distance = shortest_distance(fst, opts);
    let mut total = W::zero();
    for (s, d) in distance.iter().enumerate() {
        let fw = fst.final_weight(s as StateId);
        if !fw.is_zero() && !d.is_zero() {
            total = total.plus(&d.times(&fw));
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorFst;
    use crate::{LoadTsv, Tropical};

    #[test]
    fn shortest_distance_tropical_test() {
        // Two routes into state 2: direct cost 1.0, via state 1 cost 0.7.
        let fst = VectorFst::<Tropical<f32>>::load_tsv(
            "
0\t1\t1\t1\t0.5
0\t2\t2\t2\t1.0
1\t2\t3\t3\t0.2
2\t0
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let d = shortest_distance(&fst, &ShortestDistanceOptions::default());
        assert!(d[0].approx_eq(&Tropical::new(0.0), 1e-6));
        assert!(d[1].approx_eq(&Tropical::new(0.5), 1e-6));
        assert!(d[2].approx_eq(&Tropical::new(0.7), 1e-6));
        let total = total_weight(&fst, &ShortestDistanceOptions::default());
        assert!(total.approx_eq(&Tropical::new(0.7), 1e-6));
    }

    #[test]
    fn shortest_distance_boolean_test() {
        let fst = VectorFst::<bool>::load_tsv(
            "
0\t1\t1\t1\ttrue
1\t1\t2\t2\ttrue
2\t3\t3\t3\ttrue
1\ttrue
"
            .trim()
            .as_bytes(),
        )
        .unwrap();
        let d = shortest_distance(&fst, &ShortestDistanceOptions::default());
        assert_eq!(d, vec![true, true, false, false]);
        assert!(total_weight(&fst, &ShortestDistanceOptions::default()));
    }
}
