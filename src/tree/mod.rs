use crate::error::InvariantViolation;

mod spr;
mod validate;

pub use spr::{apply_spr, make_node_mapping, NodeMapping, Spr};
pub use validate::{
    is_congruent, validate_bijection, validate_postorder, validate_spr, validate_tree,
    validate_tree_ages,
};

/// A single node of a local tree. Children and parent are indices into the node arena of the
/// owning [`Genealogy`], the age is an index into the time grid of the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalNode {
    pub parent: Option<usize>,
    pub child: [Option<usize>; 2],
    pub age: usize,
}

impl LocalNode {
    pub fn is_leaf(&self) -> bool {
        self.child[0].is_none()
    }
}

/// The local genealogy at one genomic position, stored as a fixed-capacity arena of nodes.
///
/// Leaves occupy the indices `0..num_leaves()`, internal nodes follow. The arena may reserve
/// more slots than nodes (see [`Genealogy::capacity`]), so a tree can be copied into another
/// arena without reallocation. SPR edits (see [`apply_spr`]) relabel nodes in place and never
/// change the number of nodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Genealogy {
    nodes: Vec<LocalNode>,
    nnodes: usize,
    root: usize,
}

impl Genealogy {
    /// Build a tree from a parent array (`None` for the root) and an age array. Children are
    /// assigned to their parents in index order. The arena reserves at least `capacity` slots.
    ///
    /// # Errors
    /// Returns the violated invariant if the arrays do not describe a valid tree.
    pub fn from_parents(
        parents: &[Option<usize>],
        ages: &[usize],
        capacity: usize,
    ) -> Result<Self, InvariantViolation> {
        let nnodes = parents.len();
        if ages.len() != nnodes {
            return Err(InvariantViolation::ShapeMismatch {
                what: "age array length differs from parent array length",
            });
        }

        let mut nodes = vec![LocalNode::default(); capacity.max(nnodes)];
        for (i, node) in nodes.iter_mut().take(nnodes).enumerate() {
            node.parent = parents[i];
            node.age = ages[i];
        }

        for (i, parent) in parents.iter().enumerate() {
            if let Some(parent) = *parent {
                if parent >= nnodes {
                    return Err(InvariantViolation::NodeOutOfRange {
                        node: i,
                        target: parent,
                        nnodes,
                    });
                }

                let child = &mut nodes[parent].child;
                if child[0].is_none() {
                    child[0] = Some(i);
                } else if child[1].is_none() {
                    child[1] = Some(i);
                } else {
                    return Err(InvariantViolation::ShapeMismatch {
                        what: "node has more than two children",
                    });
                }
            }
        }

        let root = parents
            .iter()
            .position(Option::is_none)
            .ok_or(InvariantViolation::MissingRoot)?;

        let tree = Self {
            nodes,
            nnodes,
            root,
        };
        validate_tree(&tree)?;
        Ok(tree)
    }

    /// Copy another tree into this arena.
    ///
    /// # Errors
    /// Fails if the other tree has more nodes than this arena has slots.
    pub fn copy_from(&mut self, other: &Genealogy) -> Result<(), InvariantViolation> {
        if other.nnodes > self.capacity() {
            return Err(InvariantViolation::CapacityExceeded {
                nnodes: other.nnodes,
                capacity: self.capacity(),
            });
        }

        self.nodes[..other.nnodes].copy_from_slice(&other.nodes[..other.nnodes]);
        self.nnodes = other.nnodes;
        self.root = other.root;
        Ok(())
    }

    /// Relabel the nodes of the tree. Node `i` of this tree becomes node `perm[i]` of the
    /// returned tree.
    pub fn permuted(&self, perm: &[usize]) -> Result<Genealogy, InvariantViolation> {
        validate_bijection(&perm.iter().map(|&p| Some(p)).collect::<Vec<_>>(), self.nnodes)?;

        let mut nodes = vec![LocalNode::default(); self.capacity()];
        for (i, node) in self.nodes().iter().enumerate() {
            nodes[perm[i]] = LocalNode {
                parent: node.parent.map(|p| perm[p]),
                child: node.child.map(|c| c.map(|c| perm[c])),
                age: node.age,
            };
        }

        Ok(Genealogy {
            nodes,
            nnodes: self.nnodes,
            root: perm[self.root],
        })
    }

    /// Recompute the cached root. The root is the first node without a parent.
    ///
    /// # Errors
    /// [`InvariantViolation::MissingRoot`] if every node has a parent. The cached root is left
    /// untouched in that case.
    pub fn set_root(&mut self) -> Result<(), InvariantViolation> {
        let root = self
            .nodes()
            .iter()
            .position(|node| node.parent.is_none())
            .ok_or(InvariantViolation::MissingRoot)?;
        self.root = root;
        Ok(())
    }

    /// Whether `node` lies in the subtree below `ancestor` (a node is its own descendant).
    /// Parent chains longer than the number of nodes are treated as not reaching `ancestor`.
    pub fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        let mut current = Some(node);
        for _ in 0..=self.nnodes {
            match current {
                Some(n) if n == ancestor => return true,
                Some(n) => current = self.parent(n),
                None => return false,
            }
        }
        false
    }

    pub fn nnodes(&self) -> usize {
        self.nnodes
    }

    /// Number of node slots in the arena
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_leaves(&self) -> usize {
        (self.nnodes + 1) / 2
    }

    pub fn root(&self) -> usize {
        self.root
    }

    /// The nodes of the tree (without the spare arena slots)
    pub fn nodes(&self) -> &[LocalNode] {
        &self.nodes[..self.nnodes]
    }

    pub fn node(&self, node: usize) -> &LocalNode {
        &self.nodes[node]
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.nodes[node].parent
    }

    pub fn children(&self, node: usize) -> [Option<usize>; 2] {
        self.nodes[node].child
    }

    pub fn age(&self, node: usize) -> usize {
        self.nodes[node].age
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        self.nodes[node].is_leaf()
    }

    /// The other child of the parent of `node`
    pub fn sibling(&self, node: usize) -> Option<usize> {
        let parent = self.parent(node)?;
        match self.nodes[parent].child {
            [Some(c0), c1] if c0 == node => c1,
            [c0, _] => c0,
        }
    }

    /// Parent array of the tree (`None` for the root)
    pub fn parents(&self) -> Vec<Option<usize>> {
        self.nodes().iter().map(|node| node.parent).collect()
    }

    pub fn ages(&self) -> Vec<usize> {
        self.nodes().iter().map(|node| node.age).collect()
    }

    /// Nodes in postorder: children always precede their parent and the root comes last.
    ///
    /// Only nodes reachable from the root are listed, so the order is shorter than
    /// [`Genealogy::nnodes`] if the arena is disconnected.
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nnodes);
        let mut stack = vec![(self.root, false)];

        // every node is popped at most twice in a well-formed arena
        let mut budget = 2 * self.nnodes;
        while let Some((node, expanded)) = stack.pop() {
            if budget == 0 {
                break;
            }
            budget -= 1;

            if expanded || self.is_leaf(node) {
                order.push(node);
            } else {
                stack.push((node, true));
                for child in self.nodes[node].child.iter().rev().flatten() {
                    stack.push((*child, false));
                }
            }
        }

        order
    }

    // ------------------------------------------------------------------
    // branch lengths

    /// Total branch length of the tree in generations. If `use_basal` is set, the basal stub
    /// above the root (one epoch long) is included.
    pub fn tree_len(&self, times: &[f64], use_basal: bool) -> f64 {
        self.nodes()
            .iter()
            .map(|node| match node.parent {
                Some(parent) => times[self.nodes[parent].age] - times[node.age],
                None if use_basal => times[node.age + 1] - times[node.age],
                None => 0.0,
            })
            .sum()
    }

    /// Tree length after adding a branch from the present up to `times[time]` on the branch
    /// above `node`. `treelen` is the basal tree length, if it is already known.
    pub fn tree_len_branch(
        &self,
        times: &[f64],
        node: usize,
        time: usize,
        treelen: Option<f64>,
        use_basal: bool,
    ) -> f64 {
        let treelen = treelen.unwrap_or_else(|| self.tree_len(times, true));

        let root_age = self.age(self.root);
        let mut treelen2 = treelen - (times[root_age + 1] - times[root_age]) + times[time];

        let root_time = if node == self.root {
            treelen2 += times[time] - times[root_age];
            times[time + 1] - times[time]
        } else {
            times[root_age + 1] - times[root_age]
        };

        if use_basal {
            treelen2 + root_time
        } else {
            treelen2
        }
    }

    /// Length of the basal stub once a branch joins the tree at `node` and `time`
    pub fn basal_branch(&self, times: &[f64], node: usize, time: usize) -> f64 {
        if node == self.root {
            times[time + 1] - times[time]
        } else {
            let root_age = self.age(self.root);
            times[root_age + 1] - times[root_age]
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Caterpillar tree over 4 leaves: 4 = (0, 1) at 2, 5 = (4, 2) at 3, 6 = (5, 3) at 4
    pub(crate) fn caterpillar() -> Genealogy {
        Genealogy::from_parents(
            &[Some(4), Some(4), Some(5), Some(6), Some(5), Some(6), None],
            &[0, 0, 0, 0, 2, 3, 4],
            8,
        )
        .unwrap()
    }

    #[test]
    fn build_from_parents() {
        let tree = caterpillar();
        assert_eq!(tree.nnodes(), 7);
        assert_eq!(tree.capacity(), 8);
        assert_eq!(tree.num_leaves(), 4);
        assert_eq!(tree.root(), 6);
        assert_eq!(tree.children(4), [Some(0), Some(1)]);
        assert_eq!(tree.children(6), [Some(5), Some(3)]);
        assert_eq!(tree.sibling(0), Some(1));
        assert_eq!(tree.sibling(1), Some(0));
        assert_eq!(tree.sibling(6), None);
        assert!(tree.is_leaf(3));
        assert!(!tree.is_leaf(5));
    }

    #[test]
    fn reject_malformed_arrays() {
        // two roots
        let err = Genealogy::from_parents(&[Some(2), None, None], &[0, 0, 1], 3).unwrap_err();
        assert!(matches!(err, InvariantViolation::RootMismatch { .. }));

        // parent out of range
        let err = Genealogy::from_parents(&[Some(7), Some(2), None], &[0, 0, 1], 3).unwrap_err();
        assert!(matches!(err, InvariantViolation::NodeOutOfRange { .. }));

        // parent younger than child
        let err = Genealogy::from_parents(&[Some(2), Some(2), None], &[3, 0, 1], 3).unwrap_err();
        assert!(matches!(err, InvariantViolation::AgeInversion { .. }));

        // three children
        let err =
            Genealogy::from_parents(&[Some(3), Some(3), Some(3), None], &[0, 0, 0, 1], 4)
                .unwrap_err();
        assert!(matches!(err, InvariantViolation::ShapeMismatch { .. }));
    }

    #[test]
    fn reject_disconnected_arena() {
        // nodes 4 and 5 are each other's parent and never reach the root 6
        let err = Genealogy::from_parents(
            &[Some(4), Some(5), Some(6), Some(6), Some(5), Some(4), None],
            &[0, 0, 0, 0, 1, 1, 2],
            7,
        )
        .unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::Unreachable {
                reached: 3,
                nnodes: 7
            }
        );
    }

    #[test]
    fn descendants() {
        let tree = caterpillar();
        assert!(tree.is_descendant(0, 4));
        assert!(tree.is_descendant(0, 6));
        assert!(tree.is_descendant(5, 5));
        assert!(!tree.is_descendant(4, 0));
        assert!(!tree.is_descendant(3, 5));
    }

    #[test]
    fn set_root_without_root() {
        let mut tree = caterpillar();
        tree.nodes[6].parent = Some(5);
        assert_eq!(tree.set_root(), Err(InvariantViolation::MissingRoot));
        assert_eq!(tree.root(), 6);
    }

    #[test]
    fn postorder_ends_in_root() {
        let tree = caterpillar();
        let order = tree.postorder();
        assert_eq!(order.len(), 7);
        assert_eq!(*order.last().unwrap(), tree.root());
        assert!(validate_postorder(&tree, &order));
    }

    #[test]
    fn copy_respects_capacity() {
        let tree = caterpillar();
        let mut small = Genealogy::from_parents(&[Some(2), Some(2), None], &[0, 0, 1], 3).unwrap();
        assert!(small.copy_from(&tree).is_err());

        let mut other = Genealogy::from_parents(&[Some(2), Some(2), None], &[0, 0, 1], 8).unwrap();
        other.copy_from(&tree).unwrap();
        assert_eq!(other.nodes(), tree.nodes());
        assert_eq!(other.root(), tree.root());
    }

    #[test]
    fn permute_nodes() {
        let tree = caterpillar();
        let perm = [0, 1, 2, 3, 5, 4, 6];
        let permuted = tree.permuted(&perm).unwrap();

        assert_eq!(permuted.children(5), [Some(0), Some(1)]);
        assert_eq!(permuted.children(4), [Some(5), Some(2)]);
        assert_eq!(permuted.age(5), 2);
        assert!(validate_tree(&permuted).is_ok());

        assert!(tree.permuted(&[0, 0, 1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn tree_lengths() {
        let tree = caterpillar();
        let times = [0.0, 10.0, 20.0, 40.0, 80.0, 160.0];

        // leaf branches: 20 + 20 + 40 + 80, internal: (40 - 20) + (80 - 40)
        assert_eq!(tree.tree_len(&times, false), 220.0);
        assert_eq!(tree.tree_len(&times, true), 300.0);

        // adding a branch up to time index 1 on a non-root branch
        assert_eq!(tree.tree_len_branch(&times, 0, 1, None, false), 230.0);
        assert_eq!(tree.tree_len_branch(&times, 0, 1, None, true), 310.0);
        assert_eq!(tree.basal_branch(&times, 0, 1), 80.0);
    }
}
