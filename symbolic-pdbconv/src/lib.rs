//! Conversion of PDB debug information into a canonical debug information model.
//!
//! The input is a [`PdbInput`]: the type and id streams, the global symbol stream, and the
//! symbols, C13 line information and inlinee lines of each compilation unit, already split into
//! records. [`convert`] turns it into a [`DebugModel`]:
//!
//!  - A [`TypeGraph`] with one node per basic type and per type record, plus the expanded
//!    members of all structs, classes, unions and enums.
//!  - Units with their line tables and a deduplicated list of source files.
//!  - Procedures, global and thread-local variables.
//!  - A tree of scopes per procedure, holding locals with their locations and inline sites with
//!    their own line tables.
//!
//! Malformed records are skipped and logged via `tracing`, so a damaged PDB still yields all
//! information that can be recovered from it.
//!
//! # Parallelism
//!
//! The conversion runs as independent tasks on a [`TaskPool`]. Type expansion is partitioned by
//! type index, symbols by unit and by slices of the global symbol stream. Every task collects
//! its output into private [`ChunkList`]s, which are concatenated in launch order after all
//! tasks have been joined.
//!
//! ```
//! use symbolic_pdbconv::{convert, ConvertOptions, PdbInput};
//!
//! let model = convert(PdbInput::new(), &ConvertOptions::default()).unwrap();
//! assert!(model.procedures.is_empty());
//! ```

pub mod chunk;
mod convert;
pub mod cv;
mod error;
mod inline;
mod location;
mod model;
mod numeric;
mod reader;
mod records;
mod source;
mod symbols;
mod tasks;
mod types;
mod udt;
mod units;

#[cfg(test)]
mod testutils;

pub use crate::chunk::ChunkList;
pub use crate::convert::*;
pub use crate::error::*;
pub use crate::inline::*;
pub use crate::location::*;
pub use crate::model::*;
pub use crate::records::*;
pub use crate::source::*;
pub use crate::symbols::*;
pub use crate::tasks::*;
pub use crate::types::*;
pub use crate::udt::*;
pub use crate::units::*;
