//! Error types shared by the whole crate.
//!
//! Two classes of errors exist: configuration errors, which are caused by inconsistent model
//! parameters, and structural invariant violations, which indicate that a tree, an SPR or the
//! block chain of an [`ArgSequence`] is malformed. Invariant violations are reported with a
//! dedicated [`InvariantViolation`] kind, so callers can tell which check failed.
//!
//! [`ArgSequence`]: crate::arg::ArgSequence

use thiserror::Error;

/// Main error type of the crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgError {
    /// Inconsistent model parameters (population size count, empty time grid, ...)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A structural validator rejected a tree, an SPR or the block chain
    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Type alias for results using [`ArgError`]
pub type Result<T> = std::result::Result<T, ArgError>;

impl ArgError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error is a structural invariant violation
    pub fn is_invariant(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

/// The individual structural checks performed by the validators. Every variant names the
/// condition that did not hold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("node {node} references node {target} outside of the arena of {nnodes} nodes")]
    NodeOutOfRange {
        node: usize,
        target: usize,
        nnodes: usize,
    },

    #[error("node {child} is a child of {parent}, but its parent pointer disagrees")]
    ChildLinkMismatch { parent: usize, child: usize },

    #[error("tree has root {cached}, but node {found} has no parent")]
    RootMismatch { cached: usize, found: usize },

    #[error("tree has no root")]
    MissingRoot,

    #[error("only {reached} of {nnodes} nodes are reachable from the root")]
    Unreachable { reached: usize, nnodes: usize },

    #[error("node {node} is aged {age}, but its parent {parent} is younger ({parent_age})")]
    AgeInversion {
        node: usize,
        age: usize,
        parent: usize,
        parent_age: usize,
    },

    #[error("node {node} has age {age}, which is the reserved top time index")]
    AgeAtTopIndex { node: usize, age: usize },

    #[error("tree with {nnodes} nodes exceeds capacity {capacity}")]
    CapacityExceeded { nnodes: usize, capacity: usize },

    #[error("SPR recombination node {node} is invalid in the previous tree")]
    InvalidRecombNode { node: usize },

    #[error("SPR recombination branch above node {node} is broken by its own SPR")]
    BrokenRecombBranch { node: usize },

    #[error("SPR recombination time {recomb_time} is older than coalescence time {coal_time}")]
    SprTimeOrder { recomb_time: usize, coal_time: usize },

    #[error("SPR time {time} lies outside of the branch above node {node}")]
    SprOutsideBranch { node: usize, time: usize },

    #[error("SPR coalescence node {coal_node} lies in the subtree of recombination node {recomb_node}")]
    CoalInsideSubtree { recomb_node: usize, coal_node: usize },

    #[error("SPR does not describe the topology change between the two trees")]
    SprTopologyMismatch,

    #[error("node mapping is not a bijection at node {node}")]
    MappingNotBijective { node: usize },

    #[error("node mapping has {found} entries, expected {expected}")]
    MappingLength { expected: usize, found: usize },

    #[error("block {block} follows a previous block but has no node mapping")]
    MissingMapping { block: usize },

    #[error("first block carries an SPR or a node mapping")]
    FirstBlockNotNull,

    #[error("block lengths sum to {sum}, but the chain spans {expected} bases")]
    BlockLengthSum { sum: usize, expected: usize },

    #[error("chains disagree on {what}")]
    IncompatibleChains { what: &'static str },

    #[error("position {pos} lies outside of the chain [{start}, {end})")]
    PositionOutOfRange { pos: usize, start: usize, end: usize },

    #[error("flattened input has inconsistent shape: {what}")]
    ShapeMismatch { what: &'static str },

    #[error("state ({node}, {time}) has no deterministic successor")]
    MissingDeterministicTarget { node: usize, time: usize },
}
