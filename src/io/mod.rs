//! Storage layer: every file is an HDF5 file.
//!
//! ```text
//!   Data (key → array)         Dataset
//!        │                        │
//!        ▼                        ▼
//!   ┌──────────┐            ┌──────────┐
//!   │   h5      │            │   xr      │  dimension scales, DIMENSION_LIST,
//!   └──────────┘            └──────────┘  attributes (netCDF-4 layout)
//!        │                        │
//!        └──────────┬─────────────┘
//!                   ▼
//!             ┌──────────┐
//!             │  hdf5     │  groups, deflated datasets, attributes
//!             └──────────┘
//!
//!   table: Arrow record batches and Parquet export for the CLI
//! ```

pub mod h5;
pub mod hdf5;
pub mod path;
pub mod table;
pub mod xr;

pub use h5::{list_h5, read_h5, try_read_h5, try_write_h5, write_h5, Data};
pub use path::{normalize_h5_path, normalize_xr_path};
pub use xr::{is_container, read_xr, try_read_xr, try_write_xr, write_xr, write_xr_with, WriteOptions};
