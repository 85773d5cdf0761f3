//! Transition probabilities of the threading HMM.
//!
//! Within a block the hidden state of a new lineage is the point where it coalesces into the
//! local tree. [`TransMatrix`] stores the compressed per-time vectors from which any entry of the
//! within-block transition matrix is computed in constant time. [`TransMatrixSwitch`] describes
//! the transitions across a block boundary, where the tree changes by an SPR.
//!
//! The compressed vectors use the cumulative coalescence intensity
//! `C[0] = 0`, `C[b + 1] = C[b] + time_steps[b] * nbranches[b] / (2 * popsizes[b])`.
//! With `T = ntimes`, `R` the root age and `n`, `r`, `m` the lineage counts:
//! - `E[b] = (exp(-C[b]) - exp(-C[b + 1])) / m[b]` for `b < T - 2`, `E[T - 2] = exp(-C[T - 2]) /
//!   m[T - 2]`, the probability of coalescing into one particular branch during epoch `b`
//! - `B[b] = sum_{k <= b} (n[k] + 1) * time_steps[k] * exp(C[k]) / (r[k] + 1)`
//! - `G[a] = exp(C[a]) * time_steps[a] * ((n[a] + 1) / (r[a] + 1) - n[a] / (r[a] + 1 + [a < R]))`
//! - `norecombs[a] = exp(-rho * max(L[a], 1))`, where `L[a]` is the tree length including a new
//!   branch up to time `a`
//! - `D[a] = (1 - norecombs[a]) / W[a]`, where `W[a]` is the recombination weight of the new
//!   branch up to time `a`
//!
//! The recombination part of a row is `D[a] * E[b] * (B[min(a, b)] - [a <= b] * G[a])` towards
//! other branches, and `D[a] * E[b] * (2 * B[min(a, b)] - 2 * [a <= b] * G[a] - B[min(c, b)])`
//! back onto the source branch of age `c`. The second term depends on the source branch, so
//! every row carries a scale factor that rescales its recombination part to exactly
//! `1 - norecombs[a]`. Together with `norecombs[a]` on the diagonal, each row sums to one.

use tracing::trace;

use crate::error::{InvariantViolation, Result};
use crate::lineages::LineageCounts;
use crate::model::Model;
use crate::states::State;
use crate::tree::Genealogy;

mod switch;

pub use switch::{get_deterministic_transitions, TransMatrixSwitch};

/// Compressed within-block transition matrix. See the module documentation for the meaning of
/// the vectors.
#[derive(Clone, Debug, PartialEq)]
pub struct TransMatrix {
    ntimes: usize,
    nstates: usize,
    b: Vec<f64>,
    d: Vec<f64>,
    e: Vec<f64>,
    g: Vec<f64>,
    norecombs: Vec<f64>,
    rowscale: Vec<f64>,
}

impl TransMatrix {
    /// Compute the transition vectors for a local tree.
    ///
    /// # Parameters
    /// - `tree` the local tree
    /// - `model` the model at the position of the block
    /// - `states` the coalescence states of `tree`
    /// - `lineages` the lineage counts of `tree`
    ///
    /// # Errors
    /// Fails if the lineage counts were computed for a different time grid.
    pub fn new(
        tree: &Genealogy,
        model: &Model,
        states: &[State],
        lineages: &LineageCounts,
    ) -> Result<Self> {
        let ntimes = model.ntimes();
        if lineages.ntimes() != ntimes {
            return Err(InvariantViolation::ShapeMismatch {
                what: "lineage counts and model use different time grids",
            }
            .into());
        }

        let times = model.times();
        let steps = model.time_steps();
        let popsizes = model.popsizes();
        let nbranches = lineages.nbranches();
        let nrecombs = lineages.nrecombs();
        let ncoals = lineages.ncoals();
        let root_age = tree.age(tree.root());
        let top = ntimes - 2;

        // cumulative coalescence intensity
        let mut c = vec![0.0_f64; ntimes];
        for k in 1..ntimes {
            c[k] = c[k - 1] + steps[k - 1] * nbranches[k - 1] as f64 / (2.0 * popsizes[k - 1]);
        }

        let mut e = vec![0.0; ntimes];
        for k in 0..=top {
            if ncoals[k] == 0 {
                continue;
            }
            let survive = if k < top {
                -(c[k] - c[k + 1]).exp_m1()
            } else {
                1.0
            };
            e[k] = survive * (-c[k]).exp() / ncoals[k] as f64;
        }

        let treelen = tree.tree_len(times, false);

        let mut b = vec![0.0; ntimes];
        let mut d = vec![0.0; ntimes];
        let mut g = vec![0.0; ntimes];
        let mut norecombs = vec![0.0; ntimes];
        let mut b_sum = 0.0_f64;
        let mut w_sum = 0.0_f64;
        for k in 0..=top {
            let n = nbranches[k] as f64;
            let r = nrecombs[k] as f64;
            let below_root = if k < root_age { 1.0 } else { 0.0 };
            let full = (n + 1.0) * steps[k] / (r + 1.0);
            let partial = n * steps[k] / (r + 1.0 + below_root);

            b_sum += full * c[k].exp();
            b[k] = b_sum;
            g[k] = c[k].exp() * (full - partial);

            let mut len = treelen + times[k];
            if k > root_age {
                len += times[k] - times[root_age];
            }
            let rho_len = model.rho * len.max(1.0);
            norecombs[k] = (-rho_len).exp();

            let weight = w_sum + partial;
            d[k] = if weight > 0.0 {
                -(-rho_len).exp_m1() / weight
            } else {
                0.0
            };
            w_sum += full;
        }
        b[ntimes - 1] = b[top];

        let mut matrix = Self {
            ntimes,
            nstates: states.len(),
            b,
            d,
            e,
            g,
            norecombs,
            rowscale: Vec::new(),
        };
        matrix.rowscale = matrix.row_scales(tree, states);

        trace!(
            nstates = states.len(),
            root_age,
            treelen,
            "computed transition vectors"
        );
        Ok(matrix)
    }

    /// Unscaled recombination weight of moving from time `a` on a branch of age `c` to time `b`,
    /// either onto the same branch or onto another one.
    fn recomb_weight(&self, a: usize, b: usize, c: usize, same_branch: bool) -> f64 {
        let indicator = if a <= b { 1.0 } else { 0.0 };
        let x = if same_branch {
            2.0 * self.b[a.min(b)] - 2.0 * indicator * self.g[a] - self.b[c.min(b)]
        } else {
            self.b[a.min(b)] - indicator * self.g[a]
        };
        self.d[a] * self.e[b] * x.max(0.0)
    }

    /// Factor for every state that scales the recombination part of its row to
    /// `1 - norecombs[a]`.
    fn row_scales(&self, tree: &Genealogy, states: &[State]) -> Vec<f64> {
        let mut count = vec![0usize; self.ntimes];
        let mut branch_times = vec![Vec::new(); tree.nnodes()];
        for state in states {
            count[state.time] += 1;
            branch_times[state.node].push(state.time);
        }

        // weight of a row if every destination were on another branch
        let other: Vec<f64> = (0..self.ntimes)
            .map(|a| {
                (0..self.ntimes)
                    .filter(|&b| count[b] > 0)
                    .map(|b| count[b] as f64 * self.recomb_weight(a, b, 0, false))
                    .sum::<f64>()
            })
            .collect();

        states
            .iter()
            .map(|state| {
                let (a, c) = (state.time, tree.age(state.node));
                let own: f64 = branch_times[state.node]
                    .iter()
                    .map(|&b| self.recomb_weight(a, b, c, true) - self.recomb_weight(a, b, c, false))
                    .sum();
                let total = other[a] + own;
                if total > 0.0 {
                    (1.0 - self.norecombs[a]) / total
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Log probability of moving from state `i` to state `j` within a block.
    ///
    /// # Parameters
    /// - `tree` the tree the matrix was computed for
    /// - `states` the coalescence states the matrix was computed for
    /// - `i` index of the source state
    /// - `j` index of the destination state
    ///
    /// # Panics
    /// If either index is not a valid state index.
    pub fn get_transition_prob(&self, tree: &Genealogy, states: &[State], i: usize, j: usize) -> f64 {
        let State {
            node: node1,
            time: a,
        } = states[i];
        let State {
            node: node2,
            time: b,
        } = states[j];
        let same_branch = node1 == node2;

        let mut p = self.rowscale[i] * self.recomb_weight(a, b, tree.age(node1), same_branch);
        if same_branch && a == b {
            p += self.norecombs[a];
        }

        p.ln()
    }

    /// Materialize the full matrix of log transition probabilities. Row `i` holds the
    /// transitions out of state `i`.
    pub fn to_dense(&self, tree: &Genealogy, states: &[State]) -> Vec<Vec<f64>> {
        (0..states.len())
            .map(|i| {
                (0..states.len())
                    .map(|j| self.get_transition_prob(tree, states, i, j))
                    .collect()
            })
            .collect()
    }

    pub fn ntimes(&self) -> usize {
        self.ntimes
    }

    pub fn nstates(&self) -> usize {
        self.nstates
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    pub fn d(&self) -> &[f64] {
        &self.d
    }

    pub fn e(&self) -> &[f64] {
        &self.e
    }

    pub fn g(&self) -> &[f64] {
        &self.g
    }

    pub fn norecombs(&self) -> &[f64] {
        &self.norecombs
    }

    /// Per-state scale of the recombination part of each row
    pub fn rowscale(&self) -> &[f64] {
        &self.rowscale
    }
}

/// Log prior probability of each state at the first block of a chain: the probability that a
/// new lineage coalesces into the tree at that point.
pub fn calc_state_priors(
    states: &[State],
    lineages: &LineageCounts,
    model: &Model,
) -> Result<Vec<f64>> {
    let ntimes = model.ntimes();
    if lineages.ntimes() != ntimes {
        return Err(InvariantViolation::ShapeMismatch {
            what: "lineage counts and model use different time grids",
        }
        .into());
    }

    let steps = model.time_steps();
    let popsizes = model.popsizes();
    let nbranches = lineages.nbranches();
    let ncoals = lineages.ncoals();
    let top = ntimes - 2;

    let mut priors = vec![0.0; ntimes];
    let mut c = 0.0_f64;
    for k in 0..=top {
        let rate = steps[k] * nbranches[k] as f64 / (2.0 * popsizes[k]);
        let coal = if k < top { -(-rate).exp_m1() } else { 1.0 };
        if ncoals[k] > 0 {
            priors[k] = ((-c).exp() * coal / ncoals[k] as f64).ln();
        }
        c += rate;
    }

    Ok(states.iter().map(|state| priors[state.time]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::States;
    use crate::tree::tests::caterpillar;

    fn setup(rho: f64) -> (Genealogy, Model, States, LineageCounts) {
        let tree = caterpillar();
        let model = Model::with_log_times(8, 20_000.0, 1e4, rho, 2.5e-8).unwrap();
        let states = States::from_tree(&tree, model.ntimes());
        let lineages = LineageCounts::from_tree(&tree, model.ntimes()).unwrap();
        (tree, model, states, lineages)
    }

    #[test]
    fn rows_sum_to_one() {
        for rho in [1e-10, 1.5e-8, 1e-6] {
            let (tree, model, states, lineages) = setup(rho);
            let matrix = TransMatrix::new(&tree, &model, &states, &lineages).unwrap();

            for (i, row) in matrix.to_dense(&tree, &states).iter().enumerate() {
                let sum: f64 = row.iter().map(|p| p.exp()).sum();
                assert!((sum - 1.0).abs() < 1e-9, "row {i} sums to {sum} at rho {rho}");
                assert!(row.iter().all(|p| !p.is_nan()));
            }
        }
    }

    #[test]
    fn no_recombination_keeps_state() {
        let (tree, model, states, lineages) = setup(0.0);
        let matrix = TransMatrix::new(&tree, &model, &states, &lineages).unwrap();

        for i in 0..states.len() {
            for j in 0..states.len() {
                let p = matrix.get_transition_prob(&tree, &states, i, j);
                if i == j {
                    assert_eq!(p, 0.0);
                } else {
                    assert_eq!(p, f64::NEG_INFINITY);
                }
            }
        }
    }

    #[test]
    fn recombination_moves_mass_off_diagonal() {
        let (tree, model, states, lineages) = setup(1e-8);
        let matrix = TransMatrix::new(&tree, &model, &states, &lineages).unwrap();

        let stay = matrix.get_transition_prob(&tree, &states, 0, 0).exp();
        assert!(stay < 1.0);
        assert!(stay > 0.9);

        // a leaf state can move to any other branch
        let last = states.len() - 1;
        assert!(matrix.get_transition_prob(&tree, &states, 0, last) > f64::NEG_INFINITY);
    }

    #[test]
    fn priors_sum_to_one() {
        let (_, model, states, lineages) = setup(1e-8);
        let priors = calc_state_priors(&states, &lineages, &model).unwrap();

        assert_eq!(priors.len(), states.len());
        let sum: f64 = priors.iter().map(|p| p.exp()).sum();
        assert!((sum - 1.0).abs() < 1e-9, "priors sum to {sum}");
    }

    #[test]
    fn reject_foreign_lineages() {
        let (tree, model, states, _) = setup(1e-8);
        let lineages = LineageCounts::from_tree(&tree, 6).unwrap();
        assert!(TransMatrix::new(&tree, &model, &states, &lineages).is_err());
    }
}
