use crate::tree::{Genealogy, NodeMapping};

/// Map the nodes of `tree1` onto the nodes of `tree2` by topology.
///
/// Leaves are matched by sample id. Internal nodes are visited in postorder: if both children
/// map to siblings in `tree2`, the node maps to their common parent; if only one child is mapped,
/// the node inherits that mapping; otherwise the node is unmapped.
pub fn map_congruent_trees(
    tree1: &Genealogy,
    seqids1: &[usize],
    tree2: &Genealogy,
    seqids2: &[usize],
) -> NodeMapping {
    let nleaves2 = tree2.num_leaves().min(seqids2.len());
    let mut mapping = vec![None; tree1.nnodes()];

    for (leaf, seqid) in seqids1.iter().enumerate().take(tree1.num_leaves()) {
        mapping[leaf] = seqids2[..nleaves2].iter().position(|s| s == seqid);
    }

    for node in tree1.postorder() {
        if let [Some(c0), Some(c1)] = tree1.children(node) {
            mapping[node] = match (mapping[c0], mapping[c1]) {
                (Some(m0), Some(m1)) => {
                    let parent = tree2.parent(m0);
                    if parent == tree2.parent(m1) {
                        parent
                    } else {
                        None
                    }
                }
                (Some(m), None) | (None, Some(m)) => Some(m),
                (None, None) => None,
            };
        }
    }

    mapping
}
