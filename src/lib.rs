//! Assemble OpenStreetMap multipolygon areas from a streamed extract.
//!
//! Area assembly is a two-pass process. During the first pass every object
//! is offered to [`MultipolygonManager::pass1_object`]; relations that form
//! areas are kept and their way members are registered. After
//! [`prepare`](MultipolygonManager::prepare) the second pass offers the
//! objects again; each way completing a relation triggers assembly of that
//! relation, and closed tagged ways become areas on their own. Finished
//! areas pile up in an output buffer that is flushed to a callback in
//! chunks.
//!
//! Input must arrive grouped by type (nodes, then ways, then relations) and
//! sorted by id within each type, as produced by standard OSM extracts.

mod flat;

pub mod area;
pub mod assembler;
pub mod buffer;
pub mod error;
pub mod filter;
pub mod manager;
pub mod members;
pub mod osm;
pub mod projection;
pub mod relations;
pub mod stash;
pub mod writer;

// re-export what is needed for a typical assembly run
pub use crate::area::{Area, AreaStats};
pub use crate::assembler::{Assembler, RingAssembler, RingAssemblerConfig};
pub use crate::buffer::OutputBuffer;
pub use crate::error::{Error, Result};
pub use crate::filter::{StringMatcher, TagMatcher, TagsFilter};
pub use crate::manager::MultipolygonManager;
pub use crate::osm::{Location, Member, Node, Object, Relation, Tag, Tags, Way};
pub use crate::writer::WriteThread;
