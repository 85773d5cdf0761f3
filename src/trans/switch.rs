use tracing::trace;

use crate::error::{InvariantViolation, Result};
use crate::lineages::LineageCounts;
use crate::model::Model;
use crate::states::{State, StateLookup, States};
use crate::tree::{Genealogy, Spr};

/// Transition matrix across a block boundary.
///
/// Most states of the previous tree have exactly one successor in the next tree. Two source
/// states are special: the recombination point (`recombsrc`), whose lineage may follow either
/// the regrafted branch or the remaining sibling, and the recoalescence point (`recoalsrc`),
/// whose lineage is redistributed over the branches around the new coalescence node.
#[derive(Clone, Debug, PartialEq)]
pub struct TransMatrixSwitch {
    nstates1: usize,
    nstates2: usize,
    recoalsrc: Option<usize>,
    recombsrc: Option<usize>,
    determ: Vec<Option<usize>>,
    determprob: Vec<f64>,
    recoalrow: Vec<f64>,
    recombrow: Vec<f64>,
}

impl TransMatrixSwitch {
    /// Compute the switch transitions between two consecutive trees.
    ///
    /// # Parameters
    /// - `last_tree` the tree before the block boundary
    /// - `tree` the tree after the block boundary
    /// - `spr` the SPR separating the trees, in terms of the nodes of `last_tree`
    /// - `mapping` node mapping from `last_tree` to `tree`
    /// - `states1`, `states2` coalescence states of the two trees
    /// - `model` the model at the block boundary
    /// - `lineages` lineage counts of `last_tree`
    ///
    /// # Errors
    /// Fails if a regular state has no successor, or if `tree` does not contain the regrafted
    /// branch of the SPR.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        last_tree: &Genealogy,
        tree: &Genealogy,
        spr: &Spr,
        mapping: &[Option<usize>],
        states1: &[State],
        states2: &States,
        model: &Model,
        lineages: &LineageCounts,
    ) -> Result<Self> {
        if lineages.ntimes() != model.ntimes() {
            return Err(InvariantViolation::ShapeMismatch {
                what: "lineage counts and model use different time grids",
            }
            .into());
        }

        let lookup = states2.lookup_table();
        let determ =
            get_deterministic_transitions(last_tree, tree, spr, mapping, states1, &lookup)?;

        let find_source = |node, time| states1.iter().position(|s| *s == State::new(node, time));
        let recombsrc = find_source(spr.recomb_node, spr.recomb_time);
        let recoalsrc = find_source(spr.coal_node, spr.coal_time);

        for (i, target) in determ.iter().enumerate() {
            if target.is_none() && Some(i) != recombsrc && Some(i) != recoalsrc {
                return Err(InvariantViolation::MissingDeterministicTarget {
                    node: states1[i].node,
                    time: states1[i].time,
                }
                .into());
            }
        }

        let recombrow = match recombsrc {
            Some(_) => calc_recomb_row(last_tree, tree, spr, mapping, states2.len(), &lookup)?,
            None => Vec::new(),
        };
        let recoalrow = match recoalsrc {
            Some(_) => calc_recoal_row(last_tree, tree, spr, mapping, states2, model, lineages)?,
            None => Vec::new(),
        };

        trace!(
            nstates1 = states1.len(),
            nstates2 = states2.len(),
            ?recombsrc,
            ?recoalsrc,
            "computed switch transitions"
        );

        Ok(Self {
            nstates1: states1.len(),
            nstates2: states2.len(),
            recoalsrc,
            recombsrc,
            determprob: vec![0.0; determ.len()],
            determ,
            recoalrow,
            recombrow,
        })
    }

    /// Log probability of switching from state `i` of the previous tree to state `j` of the
    /// next tree.
    pub fn get_transition_prob(&self, i: usize, j: usize) -> f64 {
        if Some(i) == self.recoalsrc {
            self.recoalrow[j]
        } else if Some(i) == self.recombsrc {
            self.recombrow[j]
        } else if self.determ[i] == Some(j) {
            self.determprob[i]
        } else {
            f64::NEG_INFINITY
        }
    }

    /// Materialize the full `nstates1 x nstates2` matrix of log transition probabilities.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        (0..self.nstates1)
            .map(|i| {
                (0..self.nstates2)
                    .map(|j| self.get_transition_prob(i, j))
                    .collect()
            })
            .collect()
    }

    pub fn nstates1(&self) -> usize {
        self.nstates1
    }

    pub fn nstates2(&self) -> usize {
        self.nstates2
    }

    pub fn recoalsrc(&self) -> Option<usize> {
        self.recoalsrc
    }

    pub fn recombsrc(&self) -> Option<usize> {
        self.recombsrc
    }

    /// Deterministic successor of every state, `None` for the two stochastic rows
    pub fn determ(&self) -> &[Option<usize>] {
        &self.determ
    }

    pub fn recoalrow(&self) -> &[f64] {
        &self.recoalrow
    }

    pub fn recombrow(&self) -> &[f64] {
        &self.recombrow
    }
}

/// Successor of each state of `last_tree` in `tree`, following the node mapping and the SPR.
///
/// A state on a branch untouched by the SPR keeps its time and moves to the image of its node.
/// States on the broken branch move to the sibling branch that replaced it, and states on the
/// coalescence branch above the coalescence point move up onto the new coalescence node. States
/// on the recombination branch above the recombination point follow the sibling. The
/// recoalescence point itself has no deterministic successor.
pub fn get_deterministic_transitions(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
    states1: &[State],
    lookup2: &StateLookup,
) -> Result<Vec<Option<usize>>> {
    check_link_shape(last_tree, tree, spr, mapping)?;
    if let Some(state) = states1.iter().find(|s| s.node >= last_tree.nnodes()) {
        return Err(InvariantViolation::NodeOutOfRange {
            node: state.node,
            target: state.node,
            nnodes: last_tree.nnodes(),
        }
        .into());
    }

    let lookup = |node: Option<usize>, time| node.and_then(|node| lookup2.lookup(node, time));

    let mut determ = Vec::with_capacity(states1.len());
    for state in states1 {
        let State {
            node: node1,
            time: time1,
        } = *state;

        if node1 == spr.coal_node && time1 == spr.coal_time {
            // stochastic transition
            determ.push(None);
        } else if node1 != spr.recomb_node {
            let mut node2 = match last_tree.children(node1) {
                [Some(c1), Some(c2)] if c1 == spr.recomb_node => mapping[c2],
                [Some(c1), Some(c2)] if c2 == spr.recomb_node => mapping[c1],
                _ => mapping[node1],
            };

            // the new coalescence node sits on this branch below the state
            let on_coal_branch = spr.coal_node == node1
                || (node2.is_some() && node2 == mapping[spr.coal_node]);
            if on_coal_branch && spr.coal_time <= time1 {
                node2 = node2.and_then(|node| tree.parent(node));
            }

            determ.push(lookup(node2, time1));
        } else if spr.recomb_time >= time1 {
            // below the recombination point the lineage stays on the regrafted branch
            determ.push(lookup(mapping[spr.recomb_node], time1));
        } else {
            // above the recombination point the lineage follows the remaining sibling
            let (node2, time2) = sibling_successor(last_tree, tree, spr, mapping)?;
            determ.push(lookup(node2, time2));
        }
    }

    Ok(determ)
}

/// Check that the SPR nodes exist in `last_tree` and that `mapping` maps every node of
/// `last_tree` into `tree`.
fn check_link_shape(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
) -> std::result::Result<(), InvariantViolation> {
    let nnodes = last_tree.nnodes();
    if mapping.len() != nnodes {
        return Err(InvariantViolation::MappingLength {
            expected: nnodes,
            found: mapping.len(),
        });
    }
    if spr.recomb_node >= nnodes {
        return Err(InvariantViolation::InvalidRecombNode {
            node: spr.recomb_node,
        });
    }
    if spr.coal_node >= nnodes {
        return Err(InvariantViolation::NodeOutOfRange {
            node: spr.recomb_node,
            target: spr.coal_node,
            nnodes,
        });
    }
    for (node, target) in mapping.iter().enumerate() {
        if let Some(target) = *target {
            if target >= tree.nnodes() {
                return Err(InvariantViolation::NodeOutOfRange {
                    node,
                    target,
                    nnodes: tree.nnodes(),
                });
            }
        }
    }
    Ok(())
}

/// State of `tree` that continues the branch above the broken node: the image of the former
/// sibling of the recombination node, at the age of the broken node. If the lineage recoalesced
/// onto the sibling, the new coalescence node takes its place.
fn sibling_successor(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
) -> Result<(Option<usize>, usize)> {
    let broken = last_tree
        .parent(spr.recomb_node)
        .ok_or(InvariantViolation::InvalidRecombNode {
            node: spr.recomb_node,
        })?;
    let time2 = last_tree.age(broken);
    let other = last_tree
        .sibling(spr.recomb_node)
        .ok_or(InvariantViolation::SprTopologyMismatch)?;

    let node2 = if other == spr.coal_node {
        mapping[other].and_then(|node| tree.parent(node))
    } else {
        mapping[other]
    };

    Ok((node2, time2))
}

fn calc_recomb_row(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
    nstates2: usize,
    lookup2: &StateLookup,
) -> Result<Vec<f64>> {
    let stay = mapping[spr.recomb_node].and_then(|node| lookup2.lookup(node, spr.recomb_time));
    let (node2, time2) = sibling_successor(last_tree, tree, spr, mapping)?;
    let escape = node2.and_then(|node| lookup2.lookup(node, time2));

    let mut row = vec![f64::NEG_INFINITY; nstates2];
    match (stay, escape) {
        (Some(j1), Some(j2)) if j1 != j2 => {
            row[j1] = 0.5_f64.ln();
            row[j2] = 0.5_f64.ln();
        }
        (Some(j), _) | (None, Some(j)) => row[j] = 0.0,
        (None, None) => {
            return Err(InvariantViolation::MissingDeterministicTarget {
                node: spr.recomb_node,
                time: spr.recomb_time,
            }
            .into())
        }
    }

    Ok(row)
}

/// Row of the recoalescence point. The lineage that sat at the coalescence point may end up on
/// the regrafted branch above the recombination time, or at the coalescence time on either
/// branch below the new coalescence node or on the branch above it.
fn calc_recoal_row(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
    states2: &[State],
    model: &Model,
    lineages: &LineageCounts,
) -> Result<Vec<f64>> {
    let steps = model.time_steps();
    let popsizes = model.popsizes();
    let nbranches = lineages.nbranches();
    let ncoals = lineages.ncoals();

    let k = spr.recomb_time;
    let a = spr.coal_time;

    let broken = last_tree
        .parent(spr.recomb_node)
        .ok_or(InvariantViolation::InvalidRecombNode {
            node: spr.recomb_node,
        })?;
    let broken_age = last_tree.age(broken);

    // the branch below the new coalescence node that is not the regrafted branch
    let node3 = if broken == spr.coal_node {
        last_tree
            .sibling(spr.recomb_node)
            .and_then(|sibling| mapping[sibling])
    } else {
        mapping[spr.coal_node]
    };
    let mapped_recomb = mapping[spr.recomb_node].ok_or(InvariantViolation::BrokenRecombBranch {
        node: spr.recomb_node,
    })?;
    let parent = tree
        .parent(mapped_recomb)
        .ok_or(InvariantViolation::SprTopologyMismatch)?;
    if node3.and_then(|node| tree.parent(node)) != Some(parent) {
        return Err(InvariantViolation::SprTopologyMismatch.into());
    }
    let parent_age = tree.age(parent);

    let mut row = vec![0.0_f64; states2.len()];
    let mut total = 0.0_f64;
    for (j, state) in states2.iter().enumerate() {
        let (node2, b) = (state.node, state.time);
        let allowed = (node2 == mapped_recomb && b >= k)
            || (Some(node2) == node3 && b == a)
            || (node2 == parent && b == a);
        if !allowed {
            continue;
        }

        // the new lineage only counts as a coalescence target from the new node upwards
        let kbn = nbranches[b] as f64;
        let kcn = ncoals[b] as f64 + if b >= parent_age { 1.0 } else { 0.0 };

        let mut twon = 0.0_f64;
        for m in k..b {
            let count = nbranches[m] as f64 + 1.0 - if m < broken_age { 1.0 } else { 0.0 };
            twon += steps[m] * count / (2.0 * popsizes[m]);
        }

        row[j] = -(-steps[b] * kbn / (2.0 * popsizes[b])).exp_m1() / kcn * (-twon).exp();
        total += row[j];
    }

    for p in row.iter_mut() {
        *p = if total > 0.0 && *p > 0.0 {
            (*p / total).ln()
        } else {
            f64::NEG_INFINITY
        };
    }

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgError;
    use crate::tree::tests::caterpillar;
    use crate::tree::{apply_spr, make_node_mapping};

    struct Switch {
        states1: States,
        states2: States,
        matrix: TransMatrixSwitch,
    }

    fn switch(spr: Spr) -> Switch {
        let model = Model::with_log_times(6, 20_000.0, 1e4, 1.5e-8, 2.5e-8).unwrap();
        let last_tree = caterpillar();
        let mut tree = last_tree.clone();
        apply_spr(&mut tree, Some(&spr)).unwrap();
        let mapping = make_node_mapping(&last_tree.parents(), Some(spr.recomb_node)).unwrap();

        let states1 = States::from_tree(&last_tree, 6);
        let states2 = States::from_tree(&tree, 6);
        let lineages = LineageCounts::from_tree(&last_tree, 6).unwrap();
        let matrix = TransMatrixSwitch::new(
            &last_tree, &tree, &spr, &mapping, &states1, &states2, &model, &lineages,
        )
        .unwrap();

        Switch {
            states1,
            states2,
            matrix,
        }
    }

    #[test]
    fn deterministic_successors() {
        let Switch {
            states1,
            states2,
            matrix,
        } = switch(Spr::new(0, 1, 3, 3));
        assert_eq!(states1.len(), 20);
        assert_eq!(states2.len(), 21);

        let successor = |node, time| {
            let i = states1.iter().position(|s| *s == State::new(node, time)).unwrap();
            matrix.determ()[i].map(|j| states2[j])
        };

        // untouched branches keep their state
        assert_eq!(successor(2, 3), Some(State::new(2, 3)));
        assert_eq!(successor(5, 4), Some(State::new(5, 4)));
        // the broken node is replaced by the sibling of the recombination node
        assert_eq!(successor(4, 3), Some(State::new(1, 3)));
        // above the recombination point the lineage follows the sibling
        assert_eq!(successor(0, 2), Some(State::new(1, 2)));
        // above the coalescence point the lineage moves onto the new node
        assert_eq!(successor(3, 4), Some(State::new(4, 4)));
        assert_eq!(successor(3, 3), None);
    }

    #[test]
    fn reject_short_mapping() {
        let last_tree = caterpillar();
        let spr = Spr::new(0, 1, 3, 3);
        let mut tree = last_tree.clone();
        apply_spr(&mut tree, Some(&spr)).unwrap();

        let states1 = States::from_tree(&last_tree, 6);
        let lookup = States::from_tree(&tree, 6).lookup_table();
        let mapping = vec![Some(0), Some(1), Some(2)];

        let err = get_deterministic_transitions(&last_tree, &tree, &spr, &mapping, &states1, &lookup)
            .unwrap_err();
        assert_eq!(
            err,
            ArgError::Invariant(InvariantViolation::MappingLength {
                expected: 7,
                found: 3
            })
        );

        // a mapping pointing outside of the next tree
        let mut mapping = make_node_mapping(&last_tree.parents(), Some(0)).unwrap();
        mapping[2] = Some(9);
        let err = get_deterministic_transitions(&last_tree, &tree, &spr, &mapping, &states1, &lookup)
            .unwrap_err();
        assert_eq!(
            err,
            ArgError::Invariant(InvariantViolation::NodeOutOfRange {
                node: 2,
                target: 9,
                nnodes: 7
            })
        );
    }

    #[test]
    fn rows_sum_to_one() {
        let Switch { matrix, .. } = switch(Spr::new(0, 1, 3, 3));
        for (i, row) in matrix.to_dense().iter().enumerate() {
            let sum: f64 = row.iter().map(|p| p.exp()).sum();
            assert!((sum - 1.0).abs() < 1e-9, "row {i} sums to {sum}");
        }
    }

    #[test]
    fn recomb_row_splits_evenly() {
        let Switch {
            states2, matrix, ..
        } = switch(Spr::new(0, 1, 3, 3));
        let row = matrix.recombrow();
        let targets: Vec<State> = (0..row.len())
            .filter(|&j| row[j] > f64::NEG_INFINITY)
            .map(|j| states2[j])
            .collect();

        assert_eq!(targets, vec![State::new(0, 1), State::new(1, 2)]);
        assert!((row.iter().map(|p| p.exp()).sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn recoal_row_targets() {
        let Switch {
            states2, matrix, ..
        } = switch(Spr::new(0, 1, 3, 3));
        let row = matrix.recoalrow();
        let targets: Vec<State> = (0..row.len())
            .filter(|&j| row[j] > f64::NEG_INFINITY)
            .map(|j| states2[j])
            .collect();

        // the regrafted branch above the recombination time, and the coalescence time on the
        // other child and on the new coalescence node
        assert_eq!(
            targets,
            vec![
                State::new(0, 1),
                State::new(0, 2),
                State::new(0, 3),
                State::new(3, 3),
                State::new(4, 3),
            ]
        );
    }

    #[test]
    fn recoalesce_onto_broken_branch() {
        let Switch { matrix, .. } = switch(Spr::new(0, 1, 4, 3));
        for row in matrix.to_dense() {
            let sum: f64 = row.iter().map(|p| p.exp()).sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }
}
