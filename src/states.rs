use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::ops::Deref;

use twox_hash::XxHash64;

use crate::tree::Genealogy;

/// A coalescence point on a local tree: a new lineage joins the branch above `node` at time
/// index `time`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct State {
    pub node: usize,
    pub time: usize,
}

impl State {
    pub fn new(node: usize, time: usize) -> Self {
        Self { node, time }
    }
}

/// The ordered list of coalescence states of a local tree. States are grouped by node in
/// increasing node order, and by increasing time within a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct States(Vec<State>);

impl States {
    /// Enumerate the coalescence states of a tree. A non-root node contributes every time index
    /// from its own age to its parent's age (both inclusive). The root branch extends up to
    /// index `ntimes - 2`.
    pub fn from_tree(tree: &Genealogy, ntimes: usize) -> Self {
        let top = ntimes.saturating_sub(2);
        let states = tree
            .nodes()
            .iter()
            .enumerate()
            .flat_map(|(i, node)| {
                let upper = node.parent.map_or(top, |parent| tree.age(parent));
                (node.age..=upper).map(move |time| State::new(i, time))
            })
            .collect();

        Self(states)
    }

    /// Build the reverse index of this state list.
    pub fn lookup_table(&self) -> StateLookup {
        StateLookup::new(self)
    }

    /// Number of states at the given time index
    pub fn count_at(&self, time: usize) -> usize {
        self.0.iter().filter(|state| state.time == time).count()
    }

    pub fn into_inner(self) -> Vec<State> {
        self.0
    }
}

impl Deref for States {
    type Target = [State];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<State>> for States {
    fn from(states: Vec<State>) -> Self {
        Self(states)
    }
}

/// Reverse index from `(node, time)` to the position of the state in a [`States`] list.
#[derive(Clone, Debug, Default)]
pub struct StateLookup {
    index: HashMap<State, usize, BuildHasherDefault<XxHash64>>,
}

impl StateLookup {
    fn new(states: &[State]) -> Self {
        let mut index = HashMap::with_capacity_and_hasher(states.len(), Default::default());
        for (i, state) in states.iter().enumerate() {
            index.insert(*state, i);
        }
        Self { index }
    }

    /// Position of state `(node, time)`, or `None` if it is not a state of the tree
    pub fn lookup(&self, node: usize, time: usize) -> Option<usize> {
        self.index.get(&State::new(node, time)).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
