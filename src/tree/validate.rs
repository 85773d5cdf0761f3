//! Structural validators. Every structural mutation (construction, SPR application,
//! partitioning, appending and collapsing of blocks) ends in one of these checks, and the checks
//! report the first invariant that does not hold.

use super::{apply_spr, Genealogy, Spr};
use crate::error::InvariantViolation;

/// Check the link structure of a tree: parent and child pointers agree, all indices are inside
/// the arena, exactly the cached root has no parent, no node is older than its parent, and every
/// node is reachable from the root.
pub fn validate_tree(tree: &Genealogy) -> Result<(), InvariantViolation> {
    let nnodes = tree.nnodes();
    if nnodes > tree.capacity() {
        return Err(InvariantViolation::CapacityExceeded {
            nnodes,
            capacity: tree.capacity(),
        });
    }
    if tree.root() >= nnodes {
        return Err(InvariantViolation::MissingRoot);
    }

    for (i, node) in tree.nodes().iter().enumerate() {
        for &child in node.child.iter().flatten() {
            if child >= nnodes {
                return Err(InvariantViolation::NodeOutOfRange {
                    node: i,
                    target: child,
                    nnodes,
                });
            }
            if tree.parent(child) != Some(i) {
                return Err(InvariantViolation::ChildLinkMismatch { parent: i, child });
            }
        }

        match node.parent {
            None => {
                if tree.root() != i {
                    return Err(InvariantViolation::RootMismatch {
                        cached: tree.root(),
                        found: i,
                    });
                }
            }
            Some(parent) => {
                if parent >= nnodes {
                    return Err(InvariantViolation::NodeOutOfRange {
                        node: i,
                        target: parent,
                        nnodes,
                    });
                }
                if !tree.children(parent).contains(&Some(i)) {
                    return Err(InvariantViolation::ChildLinkMismatch { parent, child: i });
                }
                if tree.age(parent) < node.age {
                    return Err(InvariantViolation::AgeInversion {
                        node: i,
                        age: node.age,
                        parent,
                        parent_age: tree.age(parent),
                    });
                }
            }
        }
    }

    if tree.parent(tree.root()).is_some() {
        return Err(InvariantViolation::MissingRoot);
    }

    // links are consistent at this point, so a short postorder means a detached cycle
    let reached = tree.postorder().len();
    if reached != nnodes {
        return Err(InvariantViolation::Unreachable { reached, nnodes });
    }

    Ok(())
}

/// Check that no node sits at the last time index of a grid with `ntimes` points. The last index
/// is reserved as the upper bound of the root branch.
pub fn validate_tree_ages(tree: &Genealogy, ntimes: usize) -> Result<(), InvariantViolation> {
    let top = ntimes.saturating_sub(1);
    match tree.nodes().iter().position(|node| node.age >= top) {
        Some(node) => Err(InvariantViolation::AgeAtTopIndex {
            node,
            age: tree.age(node),
        }),
        None => Ok(()),
    }
}

/// Whether `order` lists every node exactly once, with children before their parents.
pub fn validate_postorder(tree: &Genealogy, order: &[usize]) -> bool {
    if order.len() != tree.nnodes() {
        return false;
    }

    let mut seen = vec![false; tree.nnodes()];
    for &node in order {
        if node >= tree.nnodes() || seen[node] {
            return false;
        }
        if tree
            .children(node)
            .iter()
            .flatten()
            .any(|&child| !seen[child])
        {
            return false;
        }
        seen[node] = true;
    }

    true
}

/// Check that the mapped entries of a node mapping point into a tree of `nnodes` nodes and that
/// no two nodes map onto the same target.
pub fn validate_bijection(
    mapping: &[Option<usize>],
    nnodes: usize,
) -> Result<(), InvariantViolation> {
    let mut hit = vec![false; nnodes];
    for (node, target) in mapping.iter().enumerate() {
        if let Some(target) = *target {
            if target >= nnodes || hit[target] {
                return Err(InvariantViolation::MappingNotBijective { node });
            }
            hit[target] = true;
        }
    }
    Ok(())
}

/// Check that an SPR, together with the node mapping, transforms `last_tree` into `tree`.
///
/// The recombination point must lie on the branch above the recombination node, the
/// coalescence point on the branch above the coalescence node, and the recombination may not be
/// older than the coalescence. In `tree`, the mapped recombination node must be a child of a node
/// aged `coal_time` whose other child is the image of the coalescence node (or the image of the
/// former sibling if the lineage recoalesced onto its own broken branch). All other nodes must
/// be mapped onto a tree of the same shape.
pub fn validate_spr(
    last_tree: &Genealogy,
    tree: &Genealogy,
    spr: &Spr,
    mapping: &[Option<usize>],
) -> Result<(), InvariantViolation> {
    let nnodes = last_tree.nnodes();
    if mapping.len() != nnodes {
        return Err(InvariantViolation::MappingLength {
            expected: nnodes,
            found: mapping.len(),
        });
    }

    let recomb_node = spr.recomb_node;
    if recomb_node >= nnodes {
        return Err(InvariantViolation::InvalidRecombNode { node: recomb_node });
    }
    let mapped_recomb = mapping[recomb_node]
        .ok_or(InvariantViolation::BrokenRecombBranch { node: recomb_node })?;

    if spr.recomb_time > spr.coal_time {
        return Err(InvariantViolation::SprTimeOrder {
            recomb_time: spr.recomb_time,
            coal_time: spr.coal_time,
        });
    }

    let broken = last_tree
        .parent(recomb_node)
        .ok_or(InvariantViolation::InvalidRecombNode { node: recomb_node })?;
    if spr.recomb_time < last_tree.age(recomb_node) || spr.recomb_time > last_tree.age(broken) {
        return Err(InvariantViolation::SprOutsideBranch {
            node: recomb_node,
            time: spr.recomb_time,
        });
    }

    let coal_node = spr.coal_node;
    if coal_node >= nnodes {
        return Err(InvariantViolation::NodeOutOfRange {
            node: recomb_node,
            target: coal_node,
            nnodes,
        });
    }
    if spr.coal_time < last_tree.age(coal_node)
        || last_tree
            .parent(coal_node)
            .is_some_and(|parent| spr.coal_time > last_tree.age(parent))
    {
        return Err(InvariantViolation::SprOutsideBranch {
            node: coal_node,
            time: spr.coal_time,
        });
    }
    if last_tree.is_descendant(coal_node, recomb_node) {
        return Err(InvariantViolation::CoalInsideSubtree {
            recomb_node,
            coal_node,
        });
    }

    // the new tree must contain the regrafted branch
    if mapped_recomb >= tree.nnodes() {
        return Err(InvariantViolation::NodeOutOfRange {
            node: recomb_node,
            target: mapped_recomb,
            nnodes: tree.nnodes(),
        });
    }
    let recoal = tree
        .parent(mapped_recomb)
        .ok_or(InvariantViolation::SprTopologyMismatch)?;
    if tree.age(recoal) != spr.coal_time {
        return Err(InvariantViolation::SprTopologyMismatch);
    }

    let expected_sibling = match mapping[coal_node] {
        Some(mapped_coal) => Some(mapped_coal),
        None => last_tree
            .sibling(recomb_node)
            .and_then(|sibling| mapping[sibling]),
    };
    if expected_sibling.is_none() || tree.sibling(mapped_recomb) != expected_sibling {
        return Err(InvariantViolation::SprTopologyMismatch);
    }

    // the rest of the tree must be unchanged: the broken node is reused as the new parent
    let mut applied = last_tree.clone();
    apply_spr(&mut applied, Some(spr))?;
    let mut full_mapping = mapping.to_vec();
    full_mapping[broken] = Some(recoal);
    if !is_congruent(&applied, tree, &full_mapping) {
        return Err(InvariantViolation::SprTopologyMismatch);
    }

    Ok(())
}

/// Whether `mapping` is an isomorphism from `tree1` onto `tree2` that preserves ages.
pub fn is_congruent(tree1: &Genealogy, tree2: &Genealogy, mapping: &[Option<usize>]) -> bool {
    if tree1.nnodes() != tree2.nnodes() || mapping.len() != tree1.nnodes() {
        return false;
    }

    let mut hit = vec![false; tree2.nnodes()];
    for (node, target) in mapping.iter().enumerate() {
        let Some(target) = *target else {
            return false;
        };
        if target >= tree2.nnodes() || hit[target] {
            return false;
        }
        hit[target] = true;

        if tree1.age(node) != tree2.age(target) {
            return false;
        }
        let mapped_parent = tree1.parent(node).and_then(|parent| mapping[parent]);
        if mapped_parent != tree2.parent(target) {
            return false;
        }
    }

    true
}
