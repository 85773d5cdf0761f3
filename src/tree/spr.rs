use super::{validate_tree, Genealogy};
use crate::error::InvariantViolation;

/// Maps the nodes of one local tree onto the nodes of the next tree. `None` marks the node that
/// was broken by the SPR between the two trees.
pub type NodeMapping = Vec<Option<usize>>;

/// A subtree-prune-and-regraft operation: the branch above `recomb_node` is cut at
/// `recomb_time` and recoalesces onto the branch above `coal_node` at `coal_time`.
///
/// Node indices refer to the tree *before* the operation. Blocks without a topology change carry
/// no SPR at all (`Option<Spr>::None`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Spr {
    pub recomb_node: usize,
    pub recomb_time: usize,
    pub coal_node: usize,
    pub coal_time: usize,
}

impl Spr {
    pub fn new(recomb_node: usize, recomb_time: usize, coal_node: usize, coal_time: usize) -> Self {
        Self {
            recomb_node,
            recomb_time,
            coal_node,
            coal_time,
        }
    }

    /// Decode the flat four-integer encoding used at the foreign boundary, where a negative
    /// recombination node marks the null SPR.
    pub fn from_flat(flat: [i32; 4]) -> Result<Option<Spr>, InvariantViolation> {
        if flat[0] < 0 {
            return Ok(None);
        }

        let mut fields = [0usize; 4];
        for (field, value) in fields.iter_mut().zip(flat) {
            *field = usize::try_from(value).map_err(|_| InvariantViolation::ShapeMismatch {
                what: "negative field in non-null SPR",
            })?;
        }

        Ok(Some(Spr::new(fields[0], fields[1], fields[2], fields[3])))
    }

    /// Encode an optional SPR as four integers, using `-1` everywhere for the null SPR.
    pub fn to_flat(spr: Option<&Spr>) -> [i32; 4] {
        match spr {
            Some(spr) => [
                spr.recomb_node as i32,
                spr.recomb_time as i32,
                spr.coal_node as i32,
                spr.coal_time as i32,
            ],
            None => [-1; 4],
        }
    }
}

/// Apply an SPR operation to a tree in place. The parent of the recombination node is detached
/// from the tree and reused as the new coalescence node, so the number of nodes never changes.
/// A null SPR leaves the tree untouched.
///
/// The edit is made on a copy that replaces `tree` only once it validates, so a rejected SPR
/// leaves `tree` as it was.
///
/// # Parameters
/// - `tree` the tree to edit
/// - `spr` the operation, given in terms of the node indices of `tree`
///
/// # Errors
/// Returns the violated invariant if the SPR references missing nodes, if it regrafts a subtree
/// onto one of its own branches, or if the edited tree is malformed.
pub fn apply_spr(tree: &mut Genealogy, spr: Option<&Spr>) -> Result<(), InvariantViolation> {
    let Some(spr) = spr else {
        return Ok(());
    };

    let nnodes = tree.nnodes;
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
    if spr.coal_node == spr.recomb_node {
        return Err(InvariantViolation::SprTopologyMismatch);
    }
    if tree.parent(spr.recomb_node).is_none() {
        return Err(InvariantViolation::InvalidRecombNode {
            node: spr.recomb_node,
        });
    }
    if tree.is_descendant(spr.coal_node, spr.recomb_node) {
        return Err(InvariantViolation::CoalInsideSubtree {
            recomb_node: spr.recomb_node,
            coal_node: spr.coal_node,
        });
    }

    let mut edited = tree.clone();
    regraft(&mut edited, spr)?;
    edited.set_root()?;
    validate_tree(&edited)?;

    *tree = edited;
    Ok(())
}

/// Prune the branch above the recombination node and regraft it at the coalescence point.
fn regraft(tree: &mut Genealogy, spr: &Spr) -> Result<(), InvariantViolation> {
    let nodes = &mut tree.nodes;

    // the recoalescing node is the broken node
    let recoal = nodes[spr.recomb_node]
        .parent
        .ok_or(InvariantViolation::InvalidRecombNode {
            node: spr.recomb_node,
        })?;
    let other = if nodes[recoal].child[0] == Some(spr.recomb_node) {
        1
    } else {
        0
    };
    let recomb_sib = nodes[recoal].child[other].ok_or(InvariantViolation::SprTopologyMismatch)?;

    // prune: the sibling takes the place of the broken node
    let broke_parent = nodes[recoal].parent;
    nodes[recomb_sib].parent = broke_parent;
    let mut broke_slot = 0;
    if let Some(broke_parent) = broke_parent {
        broke_slot = if nodes[broke_parent].child[0] == Some(recoal) {
            0
        } else {
            1
        };
        nodes[broke_parent].child[broke_slot] = Some(recomb_sib);
    }

    // regraft
    if spr.coal_node == recoal {
        // recoalescing onto the broken branch, which is now the sibling branch
        nodes[recoal].child[other] = Some(recomb_sib);
        nodes[recoal].parent = broke_parent;
        nodes[recomb_sib].parent = Some(recoal);
        if let Some(broke_parent) = broke_parent {
            nodes[broke_parent].child[broke_slot] = Some(recoal);
        }
    } else {
        nodes[recoal].child[other] = Some(spr.coal_node);
        nodes[recoal].parent = nodes[spr.coal_node].parent;
        nodes[spr.coal_node].parent = Some(recoal);

        if let Some(parent) = nodes[recoal].parent {
            let child = &mut nodes[parent].child;
            if child[0] == Some(spr.coal_node) {
                child[0] = Some(recoal);
            } else {
                child[1] = Some(recoal);
            }
        }
    }
    nodes[recoal].age = spr.coal_time;

    Ok(())
}

/// Node mapping between a tree and its successor after an SPR: the identity on all nodes except
/// the broken node (the parent of the recombination node), which maps to `None`. A null SPR
/// yields the identity.
///
/// # Parameters
/// - `parents` parent array of the tree before the SPR
/// - `recomb_node` recombination node of the SPR, `None` for the null SPR
pub fn make_node_mapping(
    parents: &[Option<usize>],
    recomb_node: Option<usize>,
) -> Result<NodeMapping, InvariantViolation> {
    let mut mapping: NodeMapping = (0..parents.len()).map(Some).collect();

    if let Some(recomb_node) = recomb_node {
        let broken = parents
            .get(recomb_node)
            .copied()
            .flatten()
            .ok_or(InvariantViolation::InvalidRecombNode { node: recomb_node })?;
        mapping[broken] = None;
    }

    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::caterpillar;

    #[test]
    fn regraft_onto_other_leaf() {
        let mut tree = caterpillar();
        apply_spr(&mut tree, Some(&Spr::new(0, 1, 3, 3))).unwrap();

        // the broken node 4 is reused as the new parent of 0 and 3
        assert_eq!(tree.children(4), [Some(0), Some(3)]);
        assert_eq!(tree.age(4), 3);
        assert_eq!(tree.parent(4), Some(6));
        assert_eq!(tree.children(5), [Some(1), Some(2)]);
        assert_eq!(tree.children(6), [Some(5), Some(4)]);
        assert_eq!(tree.root(), 6);
    }

    #[test]
    fn regraft_onto_broken_branch() {
        // cutting 0 at time 1 and recoalescing above its old parent moves the broken node up
        let mut tree = caterpillar();
        apply_spr(&mut tree, Some(&Spr::new(0, 1, 4, 3))).unwrap();

        assert_eq!(tree.children(4), [Some(0), Some(1)]);
        assert_eq!(tree.age(4), 3);
        assert_eq!(tree.parent(1), Some(4));
        assert_eq!(tree.children(5), [Some(4), Some(2)]);
    }

    #[test]
    fn regraft_above_root() {
        let mut tree = caterpillar();
        apply_spr(&mut tree, Some(&Spr::new(3, 1, 5, 4))).unwrap();

        // the broken node is the old root, it is reused as the new root above 5
        assert_eq!(tree.root(), 6);
        assert_eq!(tree.children(6), [Some(5), Some(3)]);
        assert_eq!(tree.parent(5), Some(6));
    }

    #[test]
    fn null_spr_is_noop() {
        let mut tree = caterpillar();
        let before = tree.clone();
        apply_spr(&mut tree, None).unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn reject_root_recombination() {
        let mut tree = caterpillar();
        let err = apply_spr(&mut tree, Some(&Spr::new(6, 4, 3, 4))).unwrap_err();
        assert_eq!(err, InvariantViolation::InvalidRecombNode { node: 6 });
    }

    #[test]
    fn reject_regraft_into_own_subtree() {
        let mut tree = caterpillar();
        let before = tree.clone();
        let err = apply_spr(&mut tree, Some(&Spr::new(4, 2, 0, 2))).unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::CoalInsideSubtree {
                recomb_node: 4,
                coal_node: 0
            }
        );
        assert_eq!(tree, before);
    }

    #[test]
    fn failed_spr_keeps_tree() {
        let mut tree = caterpillar();
        let before = tree.clone();

        // coalescing at time 10 lifts the reused node above the root
        let err = apply_spr(&mut tree, Some(&Spr::new(0, 1, 3, 10))).unwrap_err();
        assert!(matches!(err, InvariantViolation::AgeInversion { .. }));
        assert_eq!(tree, before);
        assert!(validate_tree(&tree).is_ok());
    }

    #[test]
    fn node_mapping_marks_broken_node() {
        let tree = caterpillar();
        let mapping = make_node_mapping(&tree.parents(), Some(0)).unwrap();
        assert_eq!(
            mapping,
            vec![Some(0), Some(1), Some(2), Some(3), None, Some(5), Some(6)]
        );

        let identity = make_node_mapping(&tree.parents(), None).unwrap();
        assert!(identity.iter().enumerate().all(|(i, m)| *m == Some(i)));

        assert!(make_node_mapping(&tree.parents(), Some(6)).is_err());
    }

    #[test]
    fn flat_encoding() {
        assert_eq!(Spr::from_flat([-1, -1, -1, -1]).unwrap(), None);
        assert_eq!(
            Spr::from_flat([0, 1, 3, 3]).unwrap(),
            Some(Spr::new(0, 1, 3, 3))
        );
        assert!(Spr::from_flat([0, -1, 3, 3]).is_err());
        assert_eq!(Spr::to_flat(None), [-1; 4]);
        assert_eq!(Spr::to_flat(Some(&Spr::new(2, 0, 5, 3))), [2, 0, 5, 3]);
    }
}
