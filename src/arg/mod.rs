use tracing::debug;

use crate::error::{ArgError, InvariantViolation, Result};
use crate::tree::{
    is_congruent, make_node_mapping, validate_bijection, validate_spr, validate_tree, Genealogy,
    NodeMapping, Spr,
};

mod bulk;
mod congruence;
mod transitions;

pub use bulk::FlatTrees;
pub use congruence::map_congruent_trees;
pub use transitions::BlockTransitions;

/// One block of an [`ArgSequence`]: a local tree that is valid for `blocklen` consecutive
/// positions, together with the SPR and the node mapping that lead from the tree of the
/// previous block to this one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub(crate) tree: Genealogy,
    pub(crate) spr: Option<Spr>,
    pub(crate) mapping: Option<NodeMapping>,
    pub(crate) blocklen: usize,
}

impl Block {
    pub fn new(
        tree: Genealogy,
        spr: Option<Spr>,
        mapping: Option<NodeMapping>,
        blocklen: usize,
    ) -> Self {
        Self {
            tree,
            spr,
            mapping,
            blocklen,
        }
    }

    pub fn tree(&self) -> &Genealogy {
        &self.tree
    }

    /// SPR from the previous tree to this tree. `None` if the topology did not change, and
    /// always `None` for the first block of a chain.
    pub fn spr(&self) -> Option<&Spr> {
        self.spr.as_ref()
    }

    /// Node mapping from the previous tree to this tree. Only the first block has none.
    pub fn mapping(&self) -> Option<&[Option<usize>]> {
        self.mapping.as_deref()
    }

    pub fn blocklen(&self) -> usize {
        self.blocklen
    }
}

/// The SPR and mapping removed from the first block of a chain that was split off exactly at a
/// block boundary. They are restored when the chain is appended back.
#[derive(Clone, Debug, PartialEq, Eq)]
struct DetachedLink {
    spr: Option<Spr>,
    mapping: NodeMapping,
}

/// An ancestral recombination graph over the genomic interval `[start_coord, end_coord)`,
/// stored as a chain of local tree blocks.
///
/// The block lengths sum to the length of the interval. Consecutive trees are connected by an
/// SPR (or the null SPR) and a node mapping, both stored on the later block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgSequence {
    start_coord: usize,
    end_coord: usize,
    nnodes: usize,
    blocks: Vec<Block>,
    seqids: Vec<usize>,
    detached: Option<DetachedLink>,
}

impl ArgSequence {
    /// Create an empty chain starting at `start_coord` for trees with `nnodes` nodes. Sample ids
    /// default to the identity on the leaves.
    pub fn new(start_coord: usize, nnodes: usize) -> Self {
        Self {
            start_coord,
            end_coord: start_coord,
            nnodes,
            blocks: Vec::new(),
            seqids: (0..(nnodes + 1) / 2).collect(),
            detached: None,
        }
    }

    /// Append a block to the end of the chain. The node mapping is derived from the SPR: the
    /// identity, except for the broken node.
    ///
    /// # Errors
    /// Fails if the block does not connect to the last tree of the chain, if the first block
    /// carries an SPR or if the block is empty.
    pub fn push(&mut self, tree: Genealogy, spr: Option<Spr>, blocklen: usize) -> Result<()> {
        let mapping = match self.blocks.last() {
            Some(last) => Some(make_node_mapping(
                &last.tree.parents(),
                spr.map(|spr| spr.recomb_node),
            )?),
            None => None,
        };
        self.push_block(Block::new(tree, spr, mapping, blocklen))
    }

    /// Append a block with an explicit node mapping to the end of the chain.
    ///
    /// # Errors
    /// See [`ArgSequence::push`]. The mapping is checked against the SPR and the two trees.
    pub fn push_block(&mut self, block: Block) -> Result<()> {
        if block.blocklen == 0 {
            return Err(InvariantViolation::ShapeMismatch {
                what: "block has length zero",
            }
            .into());
        }
        if block.tree.nnodes() != self.nnodes {
            return Err(InvariantViolation::ShapeMismatch {
                what: "tree has a different number of nodes than the chain",
            }
            .into());
        }

        validate_tree(&block.tree)?;
        match self.blocks.last() {
            Some(last) => validate_link(&last.tree, &block, self.blocks.len())?,
            None => {
                if block.spr.is_some() || block.mapping.is_some() {
                    return Err(InvariantViolation::FirstBlockNotNull.into());
                }
            }
        }

        self.end_coord += block.blocklen;
        self.blocks.push(block);
        Ok(())
    }

    /// Check all structural invariants of the chain: every tree is valid, block lengths add up
    /// to the covered interval, the first block carries neither SPR nor mapping, and every
    /// later block is connected to its predecessor by a valid SPR and mapping.
    pub fn validate(&self) -> std::result::Result<(), InvariantViolation> {
        let sum: usize = self.blocks.iter().map(|block| block.blocklen).sum();
        if sum != self.end_coord - self.start_coord {
            return Err(InvariantViolation::BlockLengthSum {
                sum,
                expected: self.end_coord - self.start_coord,
            });
        }

        for (i, block) in self.blocks.iter().enumerate() {
            if block.tree.nnodes() != self.nnodes {
                return Err(InvariantViolation::ShapeMismatch {
                    what: "tree has a different number of nodes than the chain",
                });
            }
            validate_tree(&block.tree)?;

            if i == 0 {
                if block.spr.is_some() || block.mapping.is_some() {
                    return Err(InvariantViolation::FirstBlockNotNull);
                }
            } else {
                validate_link(&self.blocks[i - 1].tree, block, i)?;
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // accessors

    pub fn start_coord(&self) -> usize {
        self.start_coord
    }

    pub fn end_coord(&self) -> usize {
        self.end_coord
    }

    /// Number of positions covered by the chain
    pub fn length(&self) -> usize {
        self.end_coord - self.start_coord
    }

    pub fn nnodes(&self) -> usize {
        self.nnodes
    }

    pub fn num_leaves(&self) -> usize {
        (self.nnodes + 1) / 2
    }

    pub fn num_trees(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn first_tree(&self) -> Option<&Genealogy> {
        self.blocks.first().map(|block| &block.tree)
    }

    pub fn last_tree(&self) -> Option<&Genealogy> {
        self.blocks.last().map(|block| &block.tree)
    }

    /// Sample id of every leaf
    pub fn seqids(&self) -> &[usize] {
        &self.seqids
    }

    /// Replace the sample ids of the leaves.
    ///
    /// # Errors
    /// The ids must be a permutation of `0..num_leaves()`.
    pub fn set_seqids(&mut self, seqids: Vec<usize>) -> Result<()> {
        let nleaves = self.num_leaves();
        let mut seen = vec![false; nleaves];
        let is_permutation = seqids.len() == nleaves
            && seqids.iter().all(|&id| {
                let fresh = id < nleaves && !seen[id];
                if fresh {
                    seen[id] = true;
                }
                fresh
            });

        if !is_permutation {
            return Err(ArgError::config(format!(
                "sample ids {seqids:?} are not a permutation of the {nleaves} leaves"
            )));
        }

        self.seqids = seqids;
        Ok(())
    }

    /// Reset the sample ids to the identity on the leaves
    pub fn set_default_seqids(&mut self) {
        self.seqids = (0..self.num_leaves()).collect();
    }

    /// Iterate over the blocks together with their genomic interval `[start, end)`.
    pub fn iter_coords(&self) -> impl Iterator<Item = (usize, usize, &Block)> + '_ {
        let mut start = self.start_coord;
        self.blocks.iter().map(move |block| {
            let block_start = start;
            start += block.blocklen;
            (block_start, start, block)
        })
    }

    /// Index and start coordinate of the block covering `pos`
    pub fn find_block(&self, pos: usize) -> Option<(usize, usize)> {
        self.iter_coords()
            .enumerate()
            .find(|(_, (start, end, _))| *start <= pos && pos < *end)
            .map(|(index, (start, _, _))| (index, start))
    }

    // ------------------------------------------------------------------
    // structural edits

    /// Split the chain at `pos`. This chain keeps `[start_coord, pos)` and the returned chain
    /// covers `[pos, end_coord)`. A block spanning `pos` is duplicated, and the first block of
    /// the returned chain loses its SPR and mapping.
    ///
    /// # Errors
    /// [`InvariantViolation::PositionOutOfRange`] if `pos` is not covered by the chain.
    pub fn partition(&mut self, pos: usize) -> Result<ArgSequence> {
        let (index, block_start) =
            self.find_block(pos)
                .ok_or(InvariantViolation::PositionOutOfRange {
                    pos,
                    start: self.start_coord,
                    end: self.end_coord,
                })?;

        let mut tail = self.blocks.split_off(index);

        let mut detached = None;
        if pos > block_start {
            // the block spans the split point, both chains get a copy
            let first = &tail[0];
            self.blocks.push(Block {
                tree: first.tree.clone(),
                spr: first.spr,
                mapping: first.mapping.clone(),
                blocklen: pos - block_start,
            });
        } else if index == 0 {
            detached = self.detached.take();
        } else if let Some(mapping) = tail[0].mapping.clone() {
            detached = Some(DetachedLink {
                spr: tail[0].spr,
                mapping,
            });
        }

        let first = &mut tail[0];
        first.spr = None;
        first.mapping = None;
        first.blocklen -= pos - block_start;

        let other = ArgSequence {
            start_coord: pos,
            end_coord: self.end_coord,
            nnodes: self.nnodes,
            blocks: tail,
            seqids: self.seqids.clone(),
            detached,
        };
        self.end_coord = pos;

        debug!(
            pos,
            ntrees1 = self.blocks.len(),
            ntrees2 = other.blocks.len(),
            "partitioned ARG"
        );

        self.validate()?;
        other.validate()?;
        Ok(other)
    }

    /// Append another chain to the end of this one. The chains must be contiguous and use the
    /// same sample ids. The first tree of `other` is connected to the last tree of this chain
    /// either by the SPR it lost when it was split off, or (if both trees have the same
    /// topology) by merging the two boundary blocks.
    ///
    /// # Errors
    /// [`InvariantViolation::IncompatibleChains`] if the chains cannot be joined.
    pub fn append(&mut self, other: ArgSequence) -> Result<()> {
        if self.nnodes != other.nnodes {
            return Err(InvariantViolation::IncompatibleChains { what: "node count" }.into());
        }
        if self.seqids != other.seqids {
            return Err(InvariantViolation::IncompatibleChains { what: "sample ids" }.into());
        }
        if self.end_coord != other.start_coord {
            return Err(InvariantViolation::IncompatibleChains {
                what: "coordinates",
            }
            .into());
        }

        let ArgSequence {
            end_coord,
            blocks: mut other_blocks,
            detached,
            ..
        } = other;

        if other_blocks.is_empty() {
            return Ok(());
        }

        if self.blocks.is_empty() {
            self.blocks = other_blocks;
            self.end_coord = end_coord;
            if detached.is_some() {
                self.detached = detached;
            }
            return Ok(());
        }

        let merge_index = self.blocks.len() - 1;
        let (spr, mapping, merge) = {
            let last = &self.blocks[merge_index].tree;
            let first = &other_blocks[0].tree;

            let restored = detached.filter(|link| {
                let block = Block::new(first.clone(), link.spr, Some(link.mapping.clone()), 1);
                validate_link(last, &block, merge_index + 1).is_ok()
            });

            match restored {
                Some(link) => (link.spr, link.mapping, false),
                None => {
                    let mapping = map_congruent_trees(last, &self.seqids, first, &self.seqids);
                    if !is_congruent(last, first, &mapping) {
                        return Err(InvariantViolation::IncompatibleChains {
                            what: "trees at the joining point",
                        }
                        .into());
                    }
                    (None, mapping, true)
                }
            }
        };
        other_blocks[0].spr = spr;
        other_blocks[0].mapping = Some(mapping);

        self.blocks.append(&mut other_blocks);
        self.end_coord = end_coord;
        if merge {
            self.remove_null_spr(merge_index);
        }

        debug!(ntrees = self.blocks.len(), merged = merge, "appended ARG");

        self.validate()?;
        Ok(())
    }

    /// Merge block `index` into its successor if the successor carries the null SPR. The
    /// successor takes over the SPR of the removed block, the composition of both mappings and
    /// the combined length. Returns whether the blocks were merged.
    pub fn remove_null_spr(&mut self, index: usize) -> bool {
        if index + 1 >= self.blocks.len() || self.blocks[index + 1].spr.is_some() {
            return false;
        }

        let removed = self.blocks.remove(index);
        let next = &mut self.blocks[index];

        next.mapping = match (removed.mapping, next.mapping.take()) {
            (None, _) => None,
            (Some(first), None) => Some(first),
            (Some(first), Some(second)) => Some(
                first
                    .iter()
                    .map(|node| node.and_then(|node| second.get(node).copied().flatten()))
                    .collect(),
            ),
        };
        next.spr = removed.spr;
        next.blocklen += removed.blocklen;

        true
    }

    /// Merge every block whose successor carries the null SPR into that successor. The tree
    /// sequence at every position and the total length are unchanged.
    pub fn remove_null_sprs(&mut self) -> Result<()> {
        let ntrees = self.blocks.len();

        let mut index = 0;
        while index + 1 < self.blocks.len() {
            if !self.remove_null_spr(index) {
                index += 1;
            }
        }

        debug!(
            removed = ntrees - self.blocks.len(),
            ntrees = self.blocks.len(),
            "removed null SPRs"
        );

        self.validate()?;
        Ok(())
    }
}

/// Check that `block` connects to the previous tree `last_tree`.
fn validate_link(
    last_tree: &Genealogy,
    block: &Block,
    index: usize,
) -> std::result::Result<(), InvariantViolation> {
    let mapping = block
        .mapping
        .as_ref()
        .ok_or(InvariantViolation::MissingMapping { block: index })?;
    if mapping.len() != last_tree.nnodes() {
        return Err(InvariantViolation::MappingLength {
            expected: last_tree.nnodes(),
            found: mapping.len(),
        });
    }
    validate_bijection(mapping, block.tree.nnodes())?;

    match &block.spr {
        Some(spr) => validate_spr(last_tree, &block.tree, spr, mapping),
        None if is_congruent(last_tree, &block.tree, mapping) => Ok(()),
        None => Err(InvariantViolation::SprTopologyMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::caterpillar;
    use crate::tree::apply_spr;

    /// Three blocks: the caterpillar, the caterpillar after regrafting 0 onto 3, and the same
    /// tree again behind a null SPR.
    fn three_blocks() -> ArgSequence {
        let tree1 = caterpillar();
        let spr = Spr::new(0, 1, 3, 3);
        let mut tree2 = tree1.clone();
        apply_spr(&mut tree2, Some(&spr)).unwrap();

        let mut arg = ArgSequence::new(100, 7);
        arg.push(tree1, None, 10).unwrap();
        arg.push(tree2.clone(), Some(spr), 20).unwrap();
        arg.push(tree2, None, 30).unwrap();
        arg
    }

    #[test]
    fn build_by_push() {
        let arg = three_blocks();
        assert_eq!(arg.num_trees(), 3);
        assert_eq!(arg.start_coord(), 100);
        assert_eq!(arg.end_coord(), 160);
        assert_eq!(arg.seqids(), &[0, 1, 2, 3]);
        assert_eq!(arg.find_block(100), Some((0, 100)));
        assert_eq!(arg.find_block(130), Some((2, 130)));
        assert_eq!(arg.find_block(160), None);
        assert!(arg.validate().is_ok());
    }

    #[test]
    fn reject_disconnected_block() {
        let mut arg = ArgSequence::new(0, 7);
        arg.push(caterpillar(), None, 10).unwrap();

        let mut tree2 = caterpillar();
        apply_spr(&mut tree2, Some(&Spr::new(0, 1, 3, 3))).unwrap();

        // the topology changed, but no SPR is given
        assert!(arg.push(tree2.clone(), None, 10).is_err());
        // SPR that does not lead to the tree
        assert!(arg.push(tree2, Some(Spr::new(1, 1, 2, 3)), 10).is_err());
        assert_eq!(arg.num_trees(), 1);

        let mut arg = ArgSequence::new(0, 7);
        let err = arg
            .push(caterpillar(), Some(Spr::new(0, 1, 3, 3)), 10)
            .unwrap_err();
        assert_eq!(err, ArgError::Invariant(InvariantViolation::FirstBlockNotNull));
    }

    #[test]
    fn partition_inside_block() {
        let mut arg = three_blocks();
        let original = arg.clone();
        let tail = arg.partition(115).unwrap();

        assert_eq!(arg.end_coord(), 115);
        assert_eq!(arg.num_trees(), 2);
        assert_eq!(arg.blocks()[1].blocklen(), 5);
        assert!(arg.blocks()[1].spr().is_some());

        assert_eq!(tail.start_coord(), 115);
        assert_eq!(tail.num_trees(), 2);
        assert_eq!(tail.blocks()[0].blocklen(), 15);
        assert!(tail.blocks()[0].spr().is_none());
        assert!(tail.blocks()[0].mapping().is_none());

        arg.append(tail).unwrap();
        assert_eq!(arg, original);
    }

    #[test]
    fn partition_at_block_start() {
        let mut arg = three_blocks();
        let original = arg.clone();
        let tail = arg.partition(110).unwrap();

        assert_eq!(arg.num_trees(), 1);
        assert_eq!(tail.num_trees(), 2);
        assert!(tail.blocks()[0].spr().is_none());

        arg.append(tail).unwrap();
        assert_eq!(arg, original);
    }

    #[test]
    fn partition_out_of_range() {
        let mut arg = three_blocks();
        let err = arg.partition(160).unwrap_err();
        assert_eq!(
            err,
            ArgError::Invariant(InvariantViolation::PositionOutOfRange {
                pos: 160,
                start: 100,
                end: 160
            })
        );
        assert!(arg.partition(99).is_err());
    }

    #[test]
    fn append_requires_same_samples() {
        let mut arg = three_blocks();
        let mut tail = arg.partition(120).unwrap();
        tail.set_seqids(vec![1, 0, 2, 3]).unwrap();

        let err = arg.append(tail).unwrap_err();
        assert_eq!(
            err,
            ArgError::Invariant(InvariantViolation::IncompatibleChains { what: "sample ids" })
        );
    }

    #[test]
    fn collapse_null_sprs() {
        let mut arg = three_blocks();
        arg.remove_null_sprs().unwrap();

        assert_eq!(arg.num_trees(), 2);
        assert_eq!(arg.length(), 60);
        assert_eq!(arg.blocks()[1].blocklen(), 50);
        assert_eq!(arg.blocks()[1].spr(), Some(&Spr::new(0, 1, 3, 3)));
    }

    #[test]
    fn seqids_must_be_permutation() {
        let mut arg = three_blocks();
        assert!(arg.set_seqids(vec![0, 1, 2]).is_err());
        assert!(arg.set_seqids(vec![0, 1, 1, 3]).is_err());
        arg.set_seqids(vec![3, 2, 1, 0]).unwrap();
        assert_eq!(arg.seqids(), &[3, 2, 1, 0]);
        arg.set_default_seqids();
        assert_eq!(arg.seqids(), &[0, 1, 2, 3]);
    }
}
