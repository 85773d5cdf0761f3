use crate::error::InvariantViolation;
use crate::tree::Genealogy;

/// Per-epoch lineage counts of a local tree.
///
/// For every time index `i`:
/// - `nbranches[i]` is the number of branches that cross epoch `i`
/// - `nrecombs[i]` is the number of branches on which a recombination at time `i` may occur
/// - `ncoals[i]` is the number of branches a new lineage may coalesce with at time `i`
///
/// A branch contributes to all three counts on each epoch it spans. At the top of the branch
/// only `nrecombs` and `ncoals` are incremented, except for the root, whose branch also counts
/// in `nbranches` at its top.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineageCounts {
    ntimes: usize,
    nbranches: Vec<usize>,
    nrecombs: Vec<usize>,
    ncoals: Vec<usize>,
}

impl LineageCounts {
    /// Create zeroed counters for a time grid with `ntimes` points.
    pub fn new(ntimes: usize) -> Self {
        Self {
            ntimes,
            nbranches: vec![0; ntimes],
            nrecombs: vec![0; ntimes],
            ncoals: vec![0; ntimes],
        }
    }

    /// Count the lineages of a tree into freshly allocated counters.
    pub fn from_tree(tree: &Genealogy, ntimes: usize) -> Result<Self, InvariantViolation> {
        let mut counts = Self::new(ntimes);
        counts.count(tree)?;
        Ok(counts)
    }

    /// Recount the lineages of a tree, reusing the counter arrays. The root branch is treated as
    /// extending to index `ntimes - 2`.
    ///
    /// # Errors
    /// [`InvariantViolation::AgeAtTopIndex`] if any node sits at index `ntimes - 1` or above.
    /// The counters are left zeroed in that case.
    pub fn count(&mut self, tree: &Genealogy) -> Result<(), InvariantViolation> {
        self.nbranches.fill(0);
        self.nrecombs.fill(0);
        self.ncoals.fill(0);

        let top = self.ntimes.saturating_sub(1);
        if let Some(node) = tree.nodes().iter().position(|node| node.age >= top) {
            return Err(InvariantViolation::AgeAtTopIndex {
                node,
                age: tree.age(node),
            });
        }

        for node in tree.nodes() {
            let parent_age = match node.parent {
                Some(parent) => tree.age(parent),
                None => self.ntimes - 2,
            };

            for j in node.age..parent_age {
                self.nbranches[j] += 1;
                self.nrecombs[j] += 1;
                self.ncoals[j] += 1;
            }

            self.nrecombs[parent_age] += 1;
            self.ncoals[parent_age] += 1;
            if node.parent.is_none() {
                self.nbranches[parent_age] += 1;
            }
        }

        // a single lineage remains above the last time point
        self.nbranches[self.ntimes - 1] = 1;

        Ok(())
    }

    pub fn ntimes(&self) -> usize {
        self.ntimes
    }

    pub fn nbranches(&self) -> &[usize] {
        &self.nbranches
    }

    pub fn nrecombs(&self) -> &[usize] {
        &self.nrecombs
    }

    pub fn ncoals(&self) -> &[usize] {
        &self.ncoals
    }
}
