use libarghmm::arg::ArgSequence;
use libarghmm::model::Model;
use libarghmm::tree::{apply_spr, Genealogy, Spr};

/// Caterpillar over four leaves: node 4 joins leaves 0 and 1 at time 2, node 5 joins 4 and leaf
/// 2 at time 3, and the root 6 joins 5 and leaf 3 at time 4.
#[allow(dead_code)]
pub fn caterpillar() -> Genealogy {
    Genealogy::from_parents(
        &[Some(4), Some(4), Some(5), Some(6), Some(5), Some(6), None],
        &[0, 0, 0, 0, 2, 3, 4],
        7,
    )
    .unwrap()
}

/// Balanced tree over four leaves: node 4 joins 0 and 1 at time 1, node 5 joins 2 and 3 at time
/// 2, and the root 6 joins 4 and 5 at time 4.
#[allow(dead_code)]
pub fn balanced() -> Genealogy {
    Genealogy::from_parents(
        &[Some(4), Some(4), Some(5), Some(5), Some(6), Some(6), None],
        &[0, 0, 0, 0, 1, 2, 4],
        7,
    )
    .unwrap()
}

/// Caterpillar over eight leaves: node 8 joins leaves 0 and 1 at time 2, and every further
/// internal node `8 + k` joins its predecessor and leaf `k + 1` at time `2 * (k + 1)`.
#[allow(dead_code)]
pub fn caterpillar8() -> Genealogy {
    let mut parents: Vec<Option<usize>> = vec![Some(8)];
    parents.extend((1..8).map(|leaf| Some(leaf + 7)));
    parents.extend((9..15).map(Some));
    parents.push(None);

    let mut ages = vec![0; 8];
    ages.extend((1..8).map(|k| 2 * k));

    Genealogy::from_parents(&parents, &ages, 15).unwrap()
}

/// Model with 8 log-spaced time points up to 20000 generations and a constant population size
#[allow(dead_code)]
pub fn small_model(rho: f64) -> Model {
    Model::with_log_times(8, 20_000.0, 1e4, rho, 2.5e-8).unwrap()
}

/// The SPRs of [`spr_chain`], in order. Each one applies to the tree produced by the previous
/// one, starting from the caterpillar.
#[allow(dead_code)]
pub fn chain_sprs() -> [Spr; 3] {
    [
        Spr::new(0, 1, 3, 3),
        Spr::new(2, 1, 0, 2),
        Spr::new(1, 2, 3, 3),
    ]
}

/// A chain of six blocks starting at position 1000: the caterpillar, then three SPRs, two of
/// them followed by a block with the null SPR.
#[allow(dead_code)]
pub fn spr_chain() -> ArgSequence {
    let [spr1, spr2, spr3] = chain_sprs();
    let mut arg = ArgSequence::new(1000, 7);
    let mut tree = caterpillar();
    arg.push(tree.clone(), None, 7).unwrap();

    apply_spr(&mut tree, Some(&spr1)).unwrap();
    arg.push(tree.clone(), Some(spr1), 5).unwrap();
    arg.push(tree.clone(), None, 4).unwrap();

    apply_spr(&mut tree, Some(&spr2)).unwrap();
    arg.push(tree.clone(), Some(spr2), 9).unwrap();

    apply_spr(&mut tree, Some(&spr3)).unwrap();
    arg.push(tree.clone(), Some(spr3), 3).unwrap();
    arg.push(tree, None, 6).unwrap();

    arg
}

/// Sum of the probabilities of a row of log probabilities
#[allow(dead_code)]
pub fn row_sum(row: &[f64]) -> f64 {
    row.iter().map(|p| p.exp()).sum()
}
