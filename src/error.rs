//! Error type shared across the crate.

use std::io;

use thiserror::Error;

use crate::osm::ItemType;

pub type Result<T> = std::result::Result<T, Error>;

/// All errors surfaced by this crate.
///
/// Everything except [`Error::InvalidLocation`] is fatal to the run.
/// `InvalidLocation` reports lossy input (a way with unresolved node
/// locations); the manager absorbs it, counts it and moves on.
#[derive(Debug, Error)]
pub enum Error {
    /// Ids must be strictly increasing within each object type. A repeated
    /// id is reported through this variant as well.
    #[error("out-of-order input: {kind} {id} after {kind} {prev}")]
    OutOfOrder { kind: ItemType, id: i64, prev: i64 },

    /// Object types must arrive as nodes, then ways, then relations.
    #[error("out-of-order input: {kind} {id} after first {after}")]
    TypeOrder {
        kind: ItemType,
        id: i64,
        after: ItemType,
    },

    /// A way contains node references whose locations were never resolved.
    #[error("invalid location in way {id}")]
    InvalidLocation { id: i64 },

    /// The configured item stash byte budget would be exceeded.
    #[error("item stash budget exceeded: {requested} more bytes over limit {limit}")]
    OutOfMemory { requested: usize, limit: usize },

    /// An operation was called in the wrong phase of the two-pass protocol.
    #[error("{op} called in {phase} phase")]
    StateMisuse {
        op: &'static str,
        phase: &'static str,
    },

    /// A regex string matcher failed to compile.
    #[error("invalid regex in tag filter: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
