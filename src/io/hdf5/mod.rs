//! A self-contained HDF5 codec covering the subset of the format this
//! crate writes: superblock version 3, version 2 object headers, compact
//! groups, fixed-length datasets stored whole or as one deflated chunk,
//! attributes, and object references kept in a global heap.
//!
//! The reader accepts what the writer produces plus a few common variants
//! (continuation blocks, shuffle and fletcher32 filters, v1 attribute and
//! dataspace messages). Files using older superblocks, B-tree chunk
//! indexes or dense link storage are rejected with an error.

mod checksum;
mod format;
mod reader;
mod value;
mod writer;

pub use format::{Attribute, Dataspace, Datatype, SIGNATURE};
pub use reader::{H5File, Object};
pub use writer::{reference_list, H5Writer};
