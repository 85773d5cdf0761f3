//! Core data structures of an ancestral recombination graph (ARG) sampler.
//!
//! An ARG over a genomic interval is stored as a chain of local trees ([`arg::ArgSequence`]),
//! each valid for a block of positions and connected to its predecessor by a
//! subtree-prune-and-regraft operation ([`tree::Spr`]). Time is discretized into a grid of
//! points ([`model::Model`]), and node ages are indices into that grid.
//!
//! On top of the chain, the crate computes the transition probabilities of the HMM used to
//! thread a new lineage through the ARG: the coalescence states of each local tree
//! ([`states::States`]), their lineage counts ([`lineages::LineageCounts`]), and the
//! within-block and block-switch transition matrices ([`trans`]).

pub mod arg;
pub mod error;
pub mod ffi;
pub mod lineages;
pub mod model;
pub mod states;
pub mod trans;
pub mod tree;

pub use error::{ArgError, InvariantViolation, Result};
