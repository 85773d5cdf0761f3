use tracing::debug;

use super::{ArgSequence, Block};
use crate::error::{InvariantViolation, Result};
use crate::tree::{make_node_mapping, Genealogy, Spr};

/// An ARG in the flattened layout used at the foreign boundary: one parent array and one age
/// array per block, four integers per SPR, and the block lengths. Missing parents and null SPRs
/// are encoded as `-1`.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FlatTrees {
    pub ptrees: Vec<Vec<i32>>,
    pub ages: Vec<Vec<i32>>,
    pub sprs: Vec<[i32; 4]>,
    pub blocklens: Vec<i32>,
}

impl FlatTrees {
    pub fn ntrees(&self) -> usize {
        self.blocklens.len()
    }

    /// Number of nodes per tree, taken from the first parent array
    pub fn nnodes(&self) -> usize {
        self.ptrees.first().map_or(0, Vec::len)
    }
}

fn to_index(value: i32, what: &'static str) -> std::result::Result<usize, InvariantViolation> {
    usize::try_from(value).map_err(|_| InvariantViolation::ShapeMismatch { what })
}

fn parse_parents(ptree: &[i32]) -> std::result::Result<Vec<Option<usize>>, InvariantViolation> {
    ptree
        .iter()
        .map(|&parent| {
            if parent < 0 {
                Ok(None)
            } else {
                to_index(parent, "parent index").map(Some)
            }
        })
        .collect()
}

impl ArgSequence {
    /// Build a chain from flattened arrays. The node mapping of every block is derived from the
    /// parents of the previous tree and the recombination node of the block's SPR. Sample ids
    /// are set to the identity.
    ///
    /// # Errors
    /// Fails if the arrays have inconsistent shapes or the resulting chain is invalid.
    pub fn from_flat(flat: &FlatTrees, start_coord: usize) -> Result<ArgSequence> {
        let ntrees = flat.ntrees();
        if ntrees == 0 {
            return Err(InvariantViolation::ShapeMismatch {
                what: "no blocks given",
            }
            .into());
        }
        if flat.ptrees.len() != ntrees || flat.ages.len() != ntrees || flat.sprs.len() != ntrees {
            return Err(InvariantViolation::ShapeMismatch {
                what: "per-block arrays differ in length",
            }
            .into());
        }

        let nnodes = flat.nnodes();
        let mut arg = ArgSequence::new(start_coord, nnodes);
        let mut last_parents: Option<Vec<Option<usize>>> = None;

        for i in 0..ntrees {
            if flat.ptrees[i].len() != nnodes {
                return Err(InvariantViolation::ShapeMismatch {
                    what: "trees differ in node count",
                }
                .into());
            }

            let parents = parse_parents(&flat.ptrees[i])?;
            let ages = flat.ages[i]
                .iter()
                .map(|&age| to_index(age, "negative age"))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let tree = Genealogy::from_parents(&parents, &ages, nnodes)?;

            let spr = Spr::from_flat(flat.sprs[i])?;
            let mapping = match &last_parents {
                Some(last_parents) => Some(make_node_mapping(
                    last_parents,
                    spr.map(|spr| spr.recomb_node),
                )?),
                None => None,
            };
            let blocklen = to_index(flat.blocklens[i], "negative block length")?;

            arg.push_block(Block::new(tree, spr, mapping, blocklen))?;
            last_parents = Some(parents);
        }

        debug!(ntrees, nnodes, start_coord, "constructed ARG from arrays");
        Ok(arg)
    }

    /// Export the chain into flattened arrays. Leaves are relabelled by their sample ids, so
    /// leaf `i` of every tree is written at index `seqids[i]`. Internal nodes keep their index.
    ///
    /// # Errors
    /// Fails if the chain does not validate, or if an SPR points below the node it references.
    pub fn to_flat(&self) -> Result<FlatTrees> {
        self.validate()?;

        let nleaves = self.num_leaves();
        let perm: Vec<usize> = (0..self.nnodes)
            .map(|i| if i < nleaves { self.seqids[i] } else { i })
            .collect();

        let mut flat = FlatTrees::default();
        let mut last_ages: Option<Vec<i32>> = None;

        for block in &self.blocks {
            let tree = block.tree.permuted(&perm)?;
            let ptree = tree
                .nodes()
                .iter()
                .map(|node| node.parent.map_or(-1, |parent| parent as i32))
                .collect();
            let ages: Vec<i32> = tree.nodes().iter().map(|node| node.age as i32).collect();

            let spr = block.spr.map(|spr| Spr {
                recomb_node: perm[spr.recomb_node],
                coal_node: perm[spr.coal_node],
                ..spr
            });
            if let (Some(spr), Some(last_ages)) = (&spr, &last_ages) {
                if (spr.recomb_time as i32) < last_ages[spr.recomb_node] {
                    return Err(InvariantViolation::SprOutsideBranch {
                        node: spr.recomb_node,
                        time: spr.recomb_time,
                    }
                    .into());
                }
                if (spr.coal_time as i32) < last_ages[spr.coal_node] {
                    return Err(InvariantViolation::SprOutsideBranch {
                        node: spr.coal_node,
                        time: spr.coal_time,
                    }
                    .into());
                }
            }

            flat.ptrees.push(ptree);
            flat.sprs.push(Spr::to_flat(spr.as_ref()));
            flat.blocklens.push(block.blocklen as i32);
            flat.ages.push(ages.clone());
            last_ages = Some(ages);
        }

        Ok(flat)
    }
}
