//! A container format for time-ordered, named, strongly-typed data chunks
//! organized into frames: header, growable index, interned name table, and
//! an append-only payload region (see the module docs in each file).

pub mod chunk;
pub mod error;
pub mod handle;
pub mod index;
pub mod layout;
pub mod namelist;
pub mod types;

pub use error::{GsdError, Result};
pub use handle::{GsdFile, OpenMode};
pub use layout::IndexEntry;
pub use types::{make_version, sizeof_tag, ElementType, Version, CURRENT_VERSION};
