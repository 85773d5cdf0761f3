use rayon::prelude::*;
use tracing::instrument;

use super::ArgSequence;
use crate::error::Result;
use crate::lineages::LineageCounts;
use crate::model::Model;
use crate::states::States;
use crate::trans::{TransMatrix, TransMatrixSwitch};

/// Everything the HMM needs for one block: the states and lineage counts of the local tree, the
/// within-block transition matrix, and the switch matrix from the previous block (absent for the
/// first block and for blocks behind a null SPR).
#[derive(Clone, Debug)]
pub struct BlockTransitions {
    pub start: usize,
    pub states: States,
    pub lineages: LineageCounts,
    pub matrix: TransMatrix,
    pub switch: Option<TransMatrixSwitch>,
}

impl ArgSequence {
    /// Compute the transition matrices of every block in parallel. Each block uses a model
    /// localized to its start position, which shares the time grid of `model`.
    #[instrument(skip_all, fields(ntrees = self.num_trees()))]
    pub fn transition_matrices(&self, model: &Model) -> Result<Vec<BlockTransitions>> {
        let starts: Vec<usize> = self.iter_coords().map(|(start, _, _)| start).collect();
        let ntimes = model.ntimes();

        (0..self.blocks.len())
            .into_par_iter()
            .map(|i| -> Result<BlockTransitions> {
                let block = &self.blocks[i];
                let local = model.local_model(starts[i]);

                let lineages = LineageCounts::from_tree(&block.tree, ntimes)?;
                let states = States::from_tree(&block.tree, ntimes);
                let matrix = TransMatrix::new(&block.tree, &local, &states, &lineages)?;

                let switch = match (i.checked_sub(1), &block.spr, &block.mapping) {
                    (Some(prev), Some(spr), Some(mapping)) => {
                        let last_tree = &self.blocks[prev].tree;
                        let last_lineages = LineageCounts::from_tree(last_tree, ntimes)?;
                        let last_states = States::from_tree(last_tree, ntimes);
                        Some(TransMatrixSwitch::new(
                            last_tree,
                            &block.tree,
                            spr,
                            mapping,
                            &last_states,
                            &states,
                            &local,
                            &last_lineages,
                        )?)
                    }
                    _ => None,
                };

                Ok(BlockTransitions {
                    start: starts[i],
                    states,
                    lineages,
                    matrix,
                    switch,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::FlatTrees;

    #[test]
    fn matrices_per_block() {
        let flat = FlatTrees {
            ptrees: vec![vec![4, 4, 5, 6, 5, 6, -1], vec![4, 5, 5, 4, 6, 6, -1]],
            ages: vec![vec![0, 0, 0, 0, 2, 3, 4], vec![0, 0, 0, 0, 3, 3, 4]],
            sprs: vec![[-1, -1, -1, -1], [0, 1, 3, 3]],
            blocklens: vec![10, 20],
        };
        let arg = ArgSequence::from_flat(&flat, 500).unwrap();
        let model = Model::with_log_times(6, 20_000.0, 1e4, 1e-9, 2.5e-8).unwrap();

        let blocks = arg.transition_matrices(&model).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].start, 500);
        assert_eq!(blocks[1].start, 510);
        assert!(blocks[0].switch.is_none());

        let switch = blocks[1].switch.as_ref().unwrap();
        assert_eq!(switch.nstates1(), blocks[0].states.len());
        assert_eq!(switch.nstates2(), blocks[1].states.len());
    }

    #[test]
    fn reject_node_at_top_index() {
        let flat = FlatTrees {
            ptrees: vec![vec![2, 2, -1]],
            ages: vec![vec![0, 0, 3]],
            sprs: vec![[-1; 4]],
            blocklens: vec![5],
        };
        let arg = ArgSequence::from_flat(&flat, 0).unwrap();
        let model = Model::with_log_times(4, 1000.0, 1e4, 1e-9, 2.5e-8).unwrap();
        assert!(arg.transition_matrices(&model).is_err());
    }
}
